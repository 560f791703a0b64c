//! Database files and the header bytes shared by every file kind.
//!
//! Byte 0 of every file holds the [`FileKind`] tag and byte 1 holds the
//! page size, stored as its base-2 logarithm. The rest of page 0 belongs to
//! whichever component owns the file.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::storage::error::{StorageError, StorageResult};

/// Offset of the file-kind tag.
pub const FILE_KIND_OFFSET: usize = 0;
/// Offset of the encoded page size.
pub const PAGE_SIZE_OFFSET: usize = 1;

/// Smallest supported page size.
pub const MIN_PAGE_SIZE: usize = 512;
/// Largest supported page size; offsets within a page must fit in a u16.
pub const MAX_PAGE_SIZE: usize = 32768;

/// What a file holds.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    HeapData = 1,
    BTreeIndex = 2,
    WriteAheadLog = 3,
    TransactionState = 4,
}

impl FileKind {
    pub fn from_u8(tag: u8) -> StorageResult<Self> {
        match tag {
            1 => Ok(FileKind::HeapData),
            2 => Ok(FileKind::BTreeIndex),
            3 => Ok(FileKind::WriteAheadLog),
            4 => Ok(FileKind::TransactionState),
            other => Err(StorageError::UnrecognizedFileKind(other)),
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileKind::HeapData => "heap",
            FileKind::BTreeIndex => "btree",
            FileKind::WriteAheadLog => "wal",
            FileKind::TransactionState => "txnstate",
        };
        write!(f, "{}", name)
    }
}

pub fn is_valid_page_size(page_size: usize) -> bool {
    (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) && page_size.is_power_of_two()
}

/// Encode a page size as its base-2 logarithm.
pub fn encode_page_size(page_size: usize) -> StorageResult<u8> {
    if !is_valid_page_size(page_size) {
        return Err(StorageError::InvalidPageSize(page_size));
    }
    Ok(page_size.trailing_zeros() as u8)
}

pub fn decode_page_size(encoded: u8) -> StorageResult<usize> {
    if encoded >= usize::BITS as u8 {
        return Err(StorageError::InvalidPageSize(usize::MAX));
    }
    let page_size = 1usize << encoded;
    if !is_valid_page_size(page_size) {
        return Err(StorageError::InvalidPageSize(page_size));
    }
    Ok(page_size)
}

/// An open database file.
pub struct DbFile {
    name: String,
    path: PathBuf,
    kind: FileKind,
    page_size: usize,
    handle: Mutex<File>,
}

/// Shared handle to an open file.
pub type DbFileRef = Arc<DbFile>;

impl DbFile {
    pub(crate) fn new(
        name: impl Into<String>,
        path: PathBuf,
        kind: FileKind,
        page_size: usize,
        handle: File,
    ) -> Self {
        DbFile {
            name: name.into(),
            path,
            kind,
            page_size,
            handle: Mutex::new(handle),
        }
    }

    /// Name relative to the base directory.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub(crate) fn handle(&self) -> MutexGuard<'_, File> {
        self.handle.lock()
    }

    /// Fail unless the file holds the expected kind of data.
    pub fn expect_kind(&self, expected: FileKind) -> StorageResult<()> {
        if self.kind != expected {
            return Err(StorageError::WrongFileKind {
                file: self.name.clone(),
                expected,
                found: self.kind,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for DbFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbFile")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("page_size", &self.page_size)
            .finish()
    }
}
