use crate::storage::page::PageKey;
use std::fmt::Debug;

/// Orders cached pages for eviction. Pinning is tracked by the pages
/// themselves; the buffer manager skips pinned candidates.
pub trait Replacer: Send + Sync + Debug {
    /// A page was added to the cache.
    fn record_insert(&mut self, key: &PageKey);

    /// A cached page was requested again.
    fn record_access(&mut self, key: &PageKey);

    /// A page left the cache.
    fn remove(&mut self, key: &PageKey);

    /// Cached pages, best eviction candidate first.
    fn candidates(&self) -> Vec<PageKey>;

    /// Number of tracked pages.
    fn size(&self) -> usize;
}
