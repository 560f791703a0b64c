//! Transaction manager.
//!
//! Logs page changes to the write-ahead log, commits and rolls back
//! transactions, and makes sure the log is forced before any logged page
//! reaches disk.

use std::sync::Arc;

use log::{debug, info};

use crate::session::{Session, SessionId};
use crate::storage::buffer::FlushObserver;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::manager::StorageManager;
use crate::storage::page::{DbPage, PageRef};
use crate::storage::wal::{
    LSN, PageRedo, PageUpdate, RedoSegment, WalConfig, WalManager, WalRecord, WalRecordPayload,
    diff_pages,
};
use crate::transaction::id::TransactionId;
use crate::transaction::state::TransactionState;
use crate::transaction::state_file::TransactionStateFile;

pub struct TransactionManager {
    wal: WalManager,
    state_file: TransactionStateFile,
}

impl TransactionManager {
    /// Open the transaction state and the log, and register with the buffer
    /// manager so dirty pages are never written ahead of their log records.
    pub fn open(storage: &StorageManager) -> StorageResult<Arc<Self>> {
        let config = storage.config();
        let state_file =
            TransactionStateFile::open_or_create(storage.file_manager().clone(), config.page_size)?;
        let wal = WalManager::open(WalConfig::from(config), state_file.next_lsn())?;
        info!(
            "Transaction manager opened: next txn {}, log range [{}, {})",
            state_file.next_txn_id(),
            state_file.first_lsn(),
            state_file.next_lsn()
        );

        let manager = Arc::new(TransactionManager { wal, state_file });
        storage
            .buffer_manager()
            .set_flush_observer(manager.clone() as Arc<dyn FlushObserver>);
        Ok(manager)
    }

    pub(crate) fn wal(&self) -> &WalManager {
        &self.wal
    }

    pub(crate) fn state_file(&self) -> &TransactionStateFile {
        &self.state_file
    }

    /// Give the session a new transaction. Nothing is logged until the
    /// transaction changes a page.
    pub fn start_transaction(&self, session: &mut Session, user_started: bool) -> StorageResult<TransactionId> {
        if session.in_transaction() {
            return Err(StorageError::TransactionInProgress);
        }
        let txn_id = self.state_file.allocate_txn_id();
        session.set_transaction(TransactionState::new(txn_id, user_started));
        debug!("{} started {} (user: {})", session.id(), txn_id, user_started);
        Ok(txn_id)
    }

    /// Log the changes made to `page` since it was last logged or loaded.
    ///
    /// Starts a transaction for the session if it has none. Does nothing for
    /// clean pages or pages whose bytes did not actually change.
    pub fn record_page_update(&self, session: &mut Session, page: &DbPage) -> StorageResult<()> {
        let mut contents = page.write();
        let segments = match contents.old_data() {
            Some(old) => diff_pages(old, contents.data()),
            None => return Ok(()),
        };
        if segments.is_empty() {
            return Ok(());
        }

        if !session.in_transaction() {
            self.start_transaction(session, false)?;
        }
        let state = session.transaction_mut().ok_or(StorageError::NoTransaction)?;
        if !state.logged_start {
            let lsn = self.wal.write_record(&WalRecord::start(state.txn_id))?;
            state.logged_start = true;
            state.last_lsn = Some(lsn);
        }

        let record = WalRecord::update_page(
            state.txn_id,
            state.last_lsn,
            PageUpdate {
                file_name: page.file().name().to_string(),
                page_no: page.page_no(),
                segments,
            },
        );
        let lsn = self.wal.write_record(&record)?;
        state.last_lsn = Some(lsn);

        contents.sync_old_data();
        contents.set_page_lsn(lsn);
        Ok(())
    }

    /// Commit the session's transaction and release its pins.
    pub fn commit(&self, storage: &StorageManager, session: &mut Session) -> StorageResult<()> {
        let state = session.take_transaction().ok_or(StorageError::NoTransaction)?;
        if state.logged_start {
            let lsn = self
                .wal
                .write_record(&WalRecord::commit(state.txn_id, state.last_lsn))?;
            self.force_wal(lsn)?;
        }
        storage.unpin_all(session.id())?;
        debug!("{} committed {}", session.id(), state.txn_id);
        Ok(())
    }

    /// Undo every change the session's transaction made, newest first, then
    /// log the abort and release the session's pins.
    pub fn rollback(&self, storage: &StorageManager, session: &mut Session) -> StorageResult<()> {
        let state = session.take_transaction().ok_or(StorageError::NoTransaction)?;
        if !state.logged_start {
            storage.unpin_all(session.id())?;
            debug!("{} rolled back {} (nothing logged)", session.id(), state.txn_id);
            return Ok(());
        }

        let mut last_lsn = state.last_lsn;
        let mut cursor = state.last_lsn;
        let mut undone = 0;
        while let Some(lsn) = cursor {
            let (record, _) = self.wal.read_record(lsn)?;
            if record.txn_id != state.txn_id {
                return Err(StorageError::Recovery(format!(
                    "record at {} belongs to {}, not {}",
                    lsn, record.txn_id, state.txn_id
                )));
            }
            match &record.payload {
                WalRecordPayload::Start => break,
                WalRecordPayload::UpdatePage(update) => {
                    last_lsn = Some(self.apply_undo(storage, session.id(), state.txn_id, last_lsn, update)?);
                    undone += 1;
                }
                WalRecordPayload::UpdatePageRedoOnly(_) => {}
                WalRecordPayload::Commit | WalRecordPayload::Abort => {
                    return Err(StorageError::Recovery(format!(
                        "{} already ended at {}",
                        state.txn_id, lsn
                    )));
                }
            }
            cursor = record.prev_lsn;
        }

        self.wal
            .write_record(&WalRecord::abort(state.txn_id, last_lsn))?;
        storage.unpin_all(session.id())?;
        info!("{} rolled back {} ({} updates undone)", session.id(), state.txn_id, undone);
        Ok(())
    }

    /// Restore the before-images of `update` and log the restoration as a
    /// redo-only record chained after `prev_lsn`. Returns that record's LSN.
    pub(crate) fn apply_undo(
        &self,
        storage: &StorageManager,
        session: SessionId,
        txn_id: TransactionId,
        prev_lsn: Option<LSN>,
        update: &PageUpdate,
    ) -> StorageResult<LSN> {
        let file = storage.open_file(&update.file_name)?;
        let page = storage.load_page(session, &file, update.page_no, true)?;
        let result = self.undo_into_page(&page, txn_id, prev_lsn, update);
        storage.unpin_page(session, &page)?;
        result
    }

    fn undo_into_page(
        &self,
        page: &PageRef,
        txn_id: TransactionId,
        prev_lsn: Option<LSN>,
        update: &PageUpdate,
    ) -> StorageResult<LSN> {
        let mut contents = page.write();
        let mut redo = Vec::with_capacity(update.segments.len());
        for segment in &update.segments {
            let end = segment.offset as usize + segment.before.len();
            if end > page.page_size() {
                return Err(StorageError::Recovery(format!(
                    "undo segment ends at {} past page {}",
                    end,
                    page.key()
                )));
            }
            contents.write_bytes(segment.offset as usize, &segment.before);
            redo.push(RedoSegment {
                offset: segment.offset,
                after: segment.before.clone(),
            });
        }

        let record = WalRecord::update_page_redo_only(
            txn_id,
            prev_lsn,
            PageRedo {
                file_name: update.file_name.clone(),
                page_no: update.page_no,
                segments: redo,
            },
        );
        let lsn = self.wal.write_record(&record)?;
        contents.sync_old_data();
        contents.set_page_lsn(lsn);
        Ok(lsn)
    }

    /// Force the log through `lsn` and persist the new end of the durable
    /// log in the transaction state file.
    pub fn force_wal(&self, lsn: LSN) -> StorageResult<()> {
        if let Some(durable) = self.wal.force(lsn)? {
            self.state_file.set_next_lsn(durable);
            self.state_file.save()?;
        }
        Ok(())
    }

    /// Flush every page and move the start of the recovery range to the end
    /// of the log. Only valid while no transaction is running.
    pub fn checkpoint(&self, storage: &StorageManager) -> StorageResult<LSN> {
        storage.flush_all(true)?;
        let durable = self.wal.force_all()?;
        self.state_file.set_next_lsn(durable);
        self.state_file.set_first_lsn(durable);
        self.state_file.save()?;
        info!("Checkpoint at {}", durable);
        Ok(durable)
    }

    /// Range of log records recovery would process.
    pub fn recovery_range(&self) -> (LSN, LSN) {
        (self.state_file.first_lsn(), self.state_file.next_lsn())
    }

    /// Every log record in the recovery range, oldest first.
    pub fn log_records(&self) -> StorageResult<Vec<(LSN, WalRecord)>> {
        let (first, next) = self.recovery_range();
        self.wal.scan(first, next)
    }
}

impl FlushObserver for TransactionManager {
    fn before_write_dirty_pages(&self, pages: &[PageRef]) -> StorageResult<()> {
        let max_lsn = pages.iter().filter_map(|p| p.read().page_lsn()).max();
        if let Some(lsn) = max_lsn {
            self.force_wal(lsn)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::storage::file::FileKind;
    use anyhow::Result;
    use tempfile::tempdir;

    fn setup(dir: &std::path::Path) -> Result<(StorageManager, Arc<TransactionManager>)> {
        let storage = StorageManager::new(StorageConfig::new(dir).with_page_size(512))?;
        let txns = TransactionManager::open(&storage)?;
        Ok((storage, txns))
    }

    #[test]
    fn test_clean_page_logs_nothing() -> Result<()> {
        let dir = tempdir()?;
        let (storage, txns) = setup(dir.path())?;
        let file = storage.create_file("t.dat", FileKind::HeapData)?;
        let mut session = Session::new(SessionId(1));

        let page = storage.load_page(session.id(), &file, 1, true)?;
        let before = txns.wal().next_lsn();
        txns.record_page_update(&mut session, &page)?;
        assert_eq!(txns.wal().next_lsn(), before);
        assert!(!session.in_transaction());
        Ok(())
    }

    #[test]
    fn test_update_starts_transaction_lazily() -> Result<()> {
        let dir = tempdir()?;
        let (storage, txns) = setup(dir.path())?;
        let file = storage.create_file("t.dat", FileKind::HeapData)?;
        let mut session = Session::new(SessionId(1));

        txns.start_transaction(&mut session, true)?;
        assert!(!session.transaction().map(|t| t.logged_start).unwrap_or(true));

        let page = storage.load_page(session.id(), &file, 1, true)?;
        page.write().write_bytes(100, b"hello");
        txns.record_page_update(&mut session, &page)?;

        let state = session.transaction().expect("transaction");
        assert!(state.logged_start);
        let last = state.last_lsn.expect("last lsn");
        assert_eq!(page.read().page_lsn(), Some(last));
        assert_eq!(page.read().old_data().map(|d| d[100..105].to_vec()), Some(b"hello".to_vec()));

        let records = txns.wal().scan(LSN::default(), txns.wal().next_lsn())?;
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0].1.payload, WalRecordPayload::Start));
        match &records[1].1.payload {
            WalRecordPayload::UpdatePage(update) => {
                assert_eq!(update.page_no, 1);
                assert_eq!(update.segments.len(), 1);
                assert_eq!(update.segments[0].offset, 100);
                assert_eq!(update.segments[0].after, b"hello".to_vec());
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(records[1].1.prev_lsn, Some(records[0].0));
        Ok(())
    }

    #[test]
    fn test_commit_forces_and_unpins() -> Result<()> {
        let dir = tempdir()?;
        let (storage, txns) = setup(dir.path())?;
        let file = storage.create_file("t.dat", FileKind::HeapData)?;
        let mut session = Session::new(SessionId(1));

        let page = storage.load_page(session.id(), &file, 1, true)?;
        page.write().write_bytes(10, &[1, 2, 3]);
        txns.record_page_update(&mut session, &page)?;
        assert!(session.in_transaction());

        txns.commit(&storage, &mut session)?;
        assert!(!session.in_transaction());
        assert_eq!(page.pin_count(), 0);
        assert_eq!(txns.wal().durable_lsn(), txns.wal().next_lsn());
        assert_eq!(txns.state_file().next_lsn(), txns.wal().next_lsn());
        Ok(())
    }

    #[test]
    fn test_rollback_restores_bytes() -> Result<()> {
        let dir = tempdir()?;
        let (storage, txns) = setup(dir.path())?;
        let file = storage.create_file("t.dat", FileKind::HeapData)?;
        let mut session = Session::new(SessionId(1));

        let page = storage.load_page(session.id(), &file, 1, true)?;
        page.write().write_bytes(20, b"first");
        txns.record_page_update(&mut session, &page)?;
        page.write().write_bytes(22, b"XY");
        txns.record_page_update(&mut session, &page)?;
        assert_eq!(&page.read().data()[20..25], b"fiXYt");

        txns.rollback(&storage, &mut session)?;
        assert_eq!(&page.read().data()[20..25], &[0u8; 5]);
        assert!(!session.in_transaction());

        let records = txns.wal().scan(LSN::default(), txns.wal().next_lsn())?;
        let kinds: Vec<_> = records.iter().map(|(_, r)| r.record_type()).collect();
        use crate::storage::wal::WalRecordType::*;
        assert_eq!(
            kinds,
            vec![Start, UpdatePage, UpdatePage, UpdatePageRedoOnly, UpdatePageRedoOnly, Abort]
        );
        Ok(())
    }

    #[test]
    fn test_rollback_without_changes() -> Result<()> {
        let dir = tempdir()?;
        let (storage, txns) = setup(dir.path())?;
        let mut session = Session::new(SessionId(1));

        txns.start_transaction(&mut session, true)?;
        assert!(matches!(
            txns.start_transaction(&mut session, true),
            Err(StorageError::TransactionInProgress)
        ));
        txns.rollback(&storage, &mut session)?;
        assert!(matches!(
            txns.commit(&storage, &mut session),
            Err(StorageError::NoTransaction)
        ));
        assert_eq!(txns.wal().next_lsn(), LSN::default());
        Ok(())
    }

    #[test]
    fn test_checkpoint_moves_first_lsn() -> Result<()> {
        let dir = tempdir()?;
        let (storage, txns) = setup(dir.path())?;
        let file = storage.create_file("t.dat", FileKind::HeapData)?;
        let mut session = Session::new(SessionId(1));

        let page = storage.load_page(session.id(), &file, 1, true)?;
        page.write().write_bytes(0, b"abc");
        txns.record_page_update(&mut session, &page)?;
        txns.commit(&storage, &mut session)?;

        let end = txns.checkpoint(&storage)?;
        assert_eq!(txns.recovery_range(), (end, end));
        assert!(!page.is_dirty());
        Ok(())
    }
}
