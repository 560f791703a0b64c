//! Access layer for tuple-oriented operations.
//!
//! This module provides abstractions for managing tables and indexes:
//!
//! - **HeapTupleFile**: A table stored in slotted pages, one file per table
//! - **BTreeIndex**: A B+-tree of (column values, file pointer) keys
//! - **Tuple**: Owned records addressed by a `FilePointer`
//! - **Value**: Type-safe representation of column values
//!
//! Every mutation goes through an [`AccessContext`], which logs the page
//! changes when transactions are enabled.

pub mod btree;
pub mod context;
pub mod heap;
pub mod scan;
pub mod schema;
pub mod tuple;
pub mod value;

pub use btree::BTreeIndex;
pub use btree::iterator::IndexScanner;
pub use btree::key::BTreeKey;
pub use context::AccessContext;
pub use heap::{HeapTupleFile, TupleFile};
pub use scan::TableScanner;
pub use schema::{ColumnInfo, TableSchema};
pub use tuple::{FilePointer, Tuple};
pub use value::{ColumnType, Value};
