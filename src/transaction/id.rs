//! Transaction identifiers.

use serde::{Deserialize, Serialize};

/// A unique identifier for a transaction, allocated from the persistent
/// transaction-state file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub u32);

impl TransactionId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Txn{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_id_display_and_order() {
        assert_eq!(TransactionId::new(42).to_string(), "Txn42");
        assert_eq!(TransactionId::new(42).value(), 42);
        assert!(TransactionId(1) < TransactionId(2));
    }
}
