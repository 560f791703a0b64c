//! Write-Ahead Logging (WAL) module.
//!
//! This module implements the write-ahead log:
//! - Log sequence numbers spanning numbered log files
//! - Record formatting with forward and backward traversal
//! - Byte-level page diffs for update records
//! - Appending, forcing and reading log files

pub mod diff;
pub mod lsn;
pub mod manager;
pub mod record;

pub use diff::{RedoSegment, UpdateSegment, diff_pages};
pub use lsn::{FIRST_RECORD_OFFSET, LSN};
pub use manager::{WalConfig, WalManager, wal_file_name};
pub use record::{PageRedo, PageUpdate, WalRecord, WalRecordPayload, WalRecordType};
