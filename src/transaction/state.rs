//! Per-session transaction bookkeeping.

use crate::storage::wal::LSN;
use crate::transaction::id::TransactionId;

/// State of the transaction a session is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionState {
    pub txn_id: TransactionId,
    /// Started by an explicit begin, as opposed to implicitly by a write.
    pub user_started: bool,
    /// Whether the START record has been written yet. It is deferred until
    /// the first logged page update.
    pub logged_start: bool,
    /// LSN of the last record this transaction wrote.
    pub last_lsn: Option<LSN>,
}

impl TransactionState {
    pub fn new(txn_id: TransactionId, user_started: bool) -> Self {
        Self {
            txn_id,
            user_started,
            logged_start: false,
            last_lsn: None,
        }
    }
}
