//! Crash recovery from the write-ahead log.

pub mod redo_undo;

pub use redo_undo::{RECOVERY_SESSION, RecoveryStats, RedoUndoRecovery};
