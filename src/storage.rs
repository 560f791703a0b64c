//! Storage layer implementation for vibestore.
//!
//! This module provides the foundation for persistent data storage using a page-based
//! architecture. Key components:
//!
//! - **File**: Every file starts with a kind tag and its encoded page size
//! - **FileManager**: Handles creating, opening, reading and writing files and pages
//! - **BufferManager**: In-memory page cache with a byte budget, pinning and FIFO/LRU eviction
//! - **SlottedPage**: Slotted page format for storing variable-length tuples
//! - **WAL**: Write-ahead log of page diffs, forced before dirty pages reach disk
//!
//! Higher layers go through [`StorageManager`], which ties the file manager and the
//! buffer manager together.

pub mod buffer;
pub mod disk;
pub mod error;
pub mod file;
pub mod manager;
pub mod page;
pub mod wal;

pub use buffer::{BufferManager, FlushObserver};
pub use disk::{FileManager, PageLoad, PageRead};
pub use error::{StorageError, StorageResult};
pub use file::{DbFile, DbFileRef, FileKind, MAX_PAGE_SIZE, MIN_PAGE_SIZE};
pub use manager::StorageManager;
pub use page::{DbPage, PageContents, PageKey, PageRef};
