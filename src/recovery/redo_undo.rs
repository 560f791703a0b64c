//! Redo/undo crash recovery.
//!
//! Recovery runs over the log range recorded in the transaction state file:
//! 1. Redo: replay every page change forward, noting which transactions
//!    never committed or aborted.
//! 2. Undo: walk the log backward, restoring before-images of the incomplete
//!    transactions and logging each restoration as a redo-only record, then
//!    abort them.
//!
//! Afterwards every page is flushed and the recovery range is emptied.

use std::collections::HashMap;
use std::fmt;

use log::{debug, info, warn};

use crate::session::SessionId;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::manager::StorageManager;
use crate::storage::wal::{LSN, WalRecord, WalRecordPayload};
use crate::transaction::{TransactionId, TransactionManager};

/// Pins taken while replaying the log belong to this session.
pub const RECOVERY_SESSION: SessionId = SessionId(0);

/// Recovery statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    /// First LSN of the recovery range.
    pub start_lsn: LSN,
    /// End of the log when recovery started.
    pub end_lsn: LSN,
    /// Records read by the redo pass.
    pub records_scanned: usize,
    /// Page updates replayed.
    pub records_redone: usize,
    /// Page updates rolled back.
    pub records_undone: usize,
    /// Transactions found without a commit or abort.
    pub incomplete_txns: usize,
}

impl fmt::Display for RecoveryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "range [{}, {}): {} records scanned, {} redone, {} undone, {} incomplete transactions",
            self.start_lsn,
            self.end_lsn,
            self.records_scanned,
            self.records_redone,
            self.records_undone,
            self.incomplete_txns
        )
    }
}

pub struct RedoUndoRecovery<'a> {
    storage: &'a StorageManager,
    txns: &'a TransactionManager,
}

impl<'a> RedoUndoRecovery<'a> {
    pub fn new(storage: &'a StorageManager, txns: &'a TransactionManager) -> Self {
        RedoUndoRecovery { storage, txns }
    }

    /// Bring every file back to a state containing exactly the committed
    /// transactions.
    pub fn recover(&self) -> StorageResult<RecoveryStats> {
        let (first, next) = self.txns.recovery_range();
        let mut stats = RecoveryStats {
            start_lsn: first,
            end_lsn: next,
            ..Default::default()
        };
        if first == next {
            debug!("Log range empty at {}, nothing to recover", first);
            return Ok(stats);
        }
        info!("Recovering log range [{}, {})", first, next);

        let (mut incomplete, max_txn) = self.redo_pass(first, next, &mut stats)?;
        stats.incomplete_txns = incomplete.len();
        self.undo_pass(first, next, &mut incomplete, &mut stats)?;

        self.storage.unpin_all(RECOVERY_SESSION)?;
        self.storage.flush_all(true)?;

        let wal = self.txns.wal();
        let state_file = self.txns.state_file();
        let durable = wal.force_all()?;
        if let Some(max_txn) = max_txn {
            if state_file.next_txn_id() <= max_txn.value() {
                state_file.set_next_txn_id(max_txn.value() + 1);
            }
        }
        state_file.set_next_lsn(durable);
        state_file.set_first_lsn(durable);
        state_file.save()?;

        info!("Recovery finished: {}", stats);
        Ok(stats)
    }

    /// Replay every record in `[first, next)`. Returns the transactions that
    /// are still open at the end, with their last LSN, and the highest
    /// transaction ID seen.
    fn redo_pass(
        &self,
        first: LSN,
        next: LSN,
        stats: &mut RecoveryStats,
    ) -> StorageResult<(HashMap<TransactionId, LSN>, Option<TransactionId>)> {
        let wal = self.txns.wal();
        let mut incomplete = HashMap::new();
        let mut max_txn: Option<TransactionId> = None;

        let mut lsn = first;
        loop {
            lsn = wal.normalize(lsn)?;
            if lsn >= next {
                break;
            }
            let (record, after) = wal.read_record(lsn)?;
            stats.records_scanned += 1;
            max_txn = max_txn.max(Some(record.txn_id));

            match &record.payload {
                WalRecordPayload::Start => {
                    incomplete.insert(record.txn_id, lsn);
                }
                WalRecordPayload::Commit | WalRecordPayload::Abort => {
                    incomplete.remove(&record.txn_id);
                }
                WalRecordPayload::UpdatePage(update) => {
                    let segments = update
                        .segments
                        .iter()
                        .map(|s| (s.offset, s.after.as_slice()));
                    self.redo_page(&update.file_name, update.page_no, segments, lsn)?;
                    incomplete.insert(record.txn_id, lsn);
                    stats.records_redone += 1;
                }
                WalRecordPayload::UpdatePageRedoOnly(redo) => {
                    let segments = redo.segments.iter().map(|s| (s.offset, s.after.as_slice()));
                    self.redo_page(&redo.file_name, redo.page_no, segments, lsn)?;
                    incomplete.insert(record.txn_id, lsn);
                    stats.records_redone += 1;
                }
            }
            lsn = after;
        }

        debug!(
            "Redo pass done: {} records, {} incomplete transactions",
            stats.records_scanned,
            incomplete.len()
        );
        Ok((incomplete, max_txn))
    }

    fn redo_page<'s>(
        &self,
        file_name: &str,
        page_no: u32,
        segments: impl Iterator<Item = (u16, &'s [u8])>,
        lsn: LSN,
    ) -> StorageResult<()> {
        let file = self.storage.open_file(file_name)?;
        let page = self.storage.load_page(RECOVERY_SESSION, &file, page_no, true)?;
        {
            let mut contents = page.write();
            for (offset, bytes) in segments {
                let end = offset as usize + bytes.len();
                if end > page.page_size() {
                    return Err(StorageError::Recovery(format!(
                        "redo segment at {} ends at {} past page {}",
                        lsn,
                        end,
                        page.key()
                    )));
                }
                contents.write_bytes(offset as usize, bytes);
            }
            contents.sync_old_data();
            contents.set_page_lsn(lsn);
        }
        self.storage.unpin_page(RECOVERY_SESSION, &page)
    }

    /// Walk backward from `next` undoing the incomplete transactions until
    /// each has reached its START record.
    fn undo_pass(
        &self,
        first: LSN,
        next: LSN,
        incomplete: &mut HashMap<TransactionId, LSN>,
        stats: &mut RecoveryStats,
    ) -> StorageResult<()> {
        let wal = self.txns.wal();
        let mut lsn = next;
        while !incomplete.is_empty() {
            if lsn <= first {
                return Err(StorageError::Recovery(format!(
                    "reached {} with {} transactions still incomplete",
                    first,
                    incomplete.len()
                )));
            }
            let (start, record) = wal.read_record_before(lsn)?;
            lsn = start;

            let Some(&last_lsn) = incomplete.get(&record.txn_id) else {
                continue;
            };
            match &record.payload {
                WalRecordPayload::Start => {
                    let abort = WalRecord::abort(record.txn_id, Some(last_lsn));
                    wal.write_record(&abort)?;
                    incomplete.remove(&record.txn_id);
                    info!("Aborted incomplete {}", record.txn_id);
                }
                WalRecordPayload::UpdatePage(update) => {
                    let clr = self.txns.apply_undo(
                        self.storage,
                        RECOVERY_SESSION,
                        record.txn_id,
                        Some(last_lsn),
                        update,
                    )?;
                    incomplete.insert(record.txn_id, clr);
                    stats.records_undone += 1;
                }
                WalRecordPayload::UpdatePageRedoOnly(_) => {}
                WalRecordPayload::Commit | WalRecordPayload::Abort => {
                    return Err(StorageError::Recovery(format!(
                        "{} at {} ended but was treated as incomplete",
                        record.txn_id, start
                    )));
                }
            }
        }
        if stats.records_undone > 0 {
            warn!("Rolled back {} updates of incomplete transactions", stats.records_undone);
        }
        Ok(())
    }
}
