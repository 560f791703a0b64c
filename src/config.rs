//! Engine configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Page size used for newly created files unless overridden.
pub const DEFAULT_PAGE_SIZE: usize = 8192;

/// Byte budget of the page cache (4 MiB).
pub const DEFAULT_BUFFER_POOL_BYTES: usize = 4 * 1024 * 1024;

/// A WAL file is rotated once it grows past this many bytes (10 MiB).
pub const DEFAULT_WAL_FILE_SIZE_LIMIT: u64 = 10 * 1024 * 1024;

/// Order in which unpinned pages are considered for eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Insertion order.
    Fifo,
    /// Access order.
    #[default]
    Lru,
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" => Ok(EvictionPolicy::Fifo),
            "lru" => Ok(EvictionPolicy::Lru),
            other => Err(format!("unknown eviction policy: {}", other)),
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionPolicy::Fifo => write!(f, "fifo"),
            EvictionPolicy::Lru => write!(f, "lru"),
        }
    }
}

/// Storage engine configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory where all data, index, WAL and state files live.
    pub base_dir: PathBuf,
    /// Page size for newly created files.
    pub page_size: usize,
    /// Byte budget of the buffer pool.
    pub buffer_pool_bytes: usize,
    /// Eviction order of the buffer pool.
    pub eviction_policy: EvictionPolicy,
    /// Whether page updates are logged and transactions are recoverable.
    pub enable_transactions: bool,
    /// Size past which the current WAL file is rotated.
    pub wal_file_size_limit: u64,
    /// Whether B-tree pages pushed onto the free list have their bodies zeroed.
    pub zero_freed_index_pages: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            base_dir: PathBuf::from("./vibestore_data"),
            page_size: DEFAULT_PAGE_SIZE,
            buffer_pool_bytes: DEFAULT_BUFFER_POOL_BYTES,
            eviction_policy: EvictionPolicy::default(),
            enable_transactions: true,
            wal_file_size_limit: DEFAULT_WAL_FILE_SIZE_LIMIT,
            zero_freed_index_pages: true,
        }
    }
}

impl StorageConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        StorageConfig {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_buffer_pool_bytes(mut self, bytes: usize) -> Self {
        self.buffer_pool_bytes = bytes;
        self
    }

    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    pub fn with_transactions(mut self, enabled: bool) -> Self {
        self.enable_transactions = enabled;
        self
    }

    pub fn with_wal_file_size_limit(mut self, limit: u64) -> Self {
        self.wal_file_size_limit = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.page_size, 8192);
        assert_eq!(config.buffer_pool_bytes, 4 * 1024 * 1024);
        assert_eq!(config.eviction_policy, EvictionPolicy::Lru);
        assert!(config.enable_transactions);
        assert_eq!(config.wal_file_size_limit, 10 * 1024 * 1024);
    }

    #[test]
    fn test_builder() {
        let config = StorageConfig::new("/tmp/x")
            .with_page_size(512)
            .with_buffer_pool_bytes(2048)
            .with_eviction_policy(EvictionPolicy::Fifo)
            .with_transactions(false);
        assert_eq!(config.base_dir, PathBuf::from("/tmp/x"));
        assert_eq!(config.page_size, 512);
        assert_eq!(config.buffer_pool_bytes, 2048);
        assert_eq!(config.eviction_policy, EvictionPolicy::Fifo);
        assert!(!config.enable_transactions);
    }

    #[test]
    fn test_parse_eviction_policy() {
        assert_eq!("FIFO".parse::<EvictionPolicy>(), Ok(EvictionPolicy::Fifo));
        assert_eq!("lru".parse::<EvictionPolicy>(), Ok(EvictionPolicy::Lru));
        assert!("clock".parse::<EvictionPolicy>().is_err());
        assert_eq!(EvictionPolicy::Fifo.to_string(), "fifo");
    }
}
