//! Per-client session state.
//!
//! A session identifies who holds page pins and carries the transaction the
//! client is currently running, if any.

use crate::transaction::TransactionState;

/// Identifies a session to the buffer manager's pin accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u32);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Session{}", self.0)
    }
}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    transaction: Option<TransactionState>,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Session {
            id,
            transaction: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn transaction(&self) -> Option<&TransactionState> {
        self.transaction.as_ref()
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    pub(crate) fn transaction_mut(&mut self) -> Option<&mut TransactionState> {
        self.transaction.as_mut()
    }

    pub(crate) fn set_transaction(&mut self, state: TransactionState) {
        self.transaction = Some(state);
    }

    pub(crate) fn take_transaction(&mut self) -> Option<TransactionState> {
        self.transaction.take()
    }
}
