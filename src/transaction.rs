//! Transaction support.
//!
//! Transactions are tracked per session. Every page change is logged to the
//! write-ahead log as a byte diff before the page may be written back, which
//! makes commit, rollback and crash recovery possible.

pub mod id;
pub mod manager;
pub mod state;
pub mod state_file;

pub use id::TransactionId;
pub use manager::TransactionManager;
pub use state::TransactionState;
pub use state_file::{TXNSTATE_FILENAME, TransactionStateFile};
