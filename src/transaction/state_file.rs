//! Persistent transaction state (`txnstate.dat`).
//!
//! ```text
//! | kind (1) | page size (1) | next txn ID (4) |
//! | first LSN file (2) | first LSN offset (4) | next LSN file (2) | next LSN offset (4) |
//! ```
//!
//! The file is read and written directly through the file manager so that
//! saving it never goes through the buffer pool's flush path.

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use parking_lot::Mutex;

use crate::storage::disk::FileManager;
use crate::storage::error::StorageResult;
use crate::storage::file::{DbFile, FileKind};
use crate::storage::wal::LSN;
use crate::transaction::id::TransactionId;

pub const TXNSTATE_FILENAME: &str = "txnstate.dat";

const NEXT_TXN_ID_OFFSET: usize = 2;
const FIRST_LSN_OFFSET: usize = 6;
const NEXT_LSN_OFFSET: usize = 12;

pub struct TransactionStateFile {
    file_manager: Arc<FileManager>,
    file: DbFile,
    page: Mutex<Vec<u8>>,
}

impl TransactionStateFile {
    /// Create the file with transaction IDs starting at 1 and an empty log.
    pub fn create(file_manager: Arc<FileManager>, page_size: usize) -> StorageResult<Self> {
        let file = file_manager.create_file(TXNSTATE_FILENAME, FileKind::TransactionState, page_size)?;
        let mut page = vec![0u8; page_size];
        file_manager.load_page(&file, 0, &mut page, false)?;
        let state = Self {
            file_manager,
            file,
            page: Mutex::new(page),
        };
        state.set_next_txn_id(1);
        state.set_first_lsn(LSN::default());
        state.set_next_lsn(LSN::default());
        state.save()?;
        Ok(state)
    }

    pub fn open(file_manager: Arc<FileManager>) -> StorageResult<Self> {
        let file = file_manager.open_file(TXNSTATE_FILENAME)?;
        file.expect_kind(FileKind::TransactionState)?;
        let mut page = vec![0u8; file.page_size()];
        file_manager.load_page(&file, 0, &mut page, false)?;
        Ok(Self {
            file_manager,
            file,
            page: Mutex::new(page),
        })
    }

    /// Open the file if present, otherwise create it.
    pub fn open_or_create(file_manager: Arc<FileManager>, page_size: usize) -> StorageResult<Self> {
        if file_manager.file_exists(TXNSTATE_FILENAME) {
            Self::open(file_manager)
        } else {
            Self::create(file_manager, page_size)
        }
    }

    pub fn next_txn_id(&self) -> u32 {
        LittleEndian::read_u32(&self.page.lock()[NEXT_TXN_ID_OFFSET..NEXT_TXN_ID_OFFSET + 4])
    }

    pub fn set_next_txn_id(&self, id: u32) {
        LittleEndian::write_u32(&mut self.page.lock()[NEXT_TXN_ID_OFFSET..NEXT_TXN_ID_OFFSET + 4], id);
    }

    /// Hand out the next transaction ID. The counter is persisted with the
    /// next save.
    pub fn allocate_txn_id(&self) -> TransactionId {
        let mut page = self.page.lock();
        let id = LittleEndian::read_u32(&page[NEXT_TXN_ID_OFFSET..NEXT_TXN_ID_OFFSET + 4]);
        LittleEndian::write_u32(
            &mut page[NEXT_TXN_ID_OFFSET..NEXT_TXN_ID_OFFSET + 4],
            id.wrapping_add(1).max(1),
        );
        TransactionId(id)
    }

    fn read_lsn(&self, offset: usize) -> LSN {
        let page = self.page.lock();
        LSN::new(
            LittleEndian::read_u16(&page[offset..offset + 2]),
            LittleEndian::read_u32(&page[offset + 2..offset + 6]),
        )
    }

    fn write_lsn(&self, offset: usize, lsn: LSN) {
        let mut page = self.page.lock();
        LittleEndian::write_u16(&mut page[offset..offset + 2], lsn.file_no);
        LittleEndian::write_u32(&mut page[offset + 2..offset + 6], lsn.offset);
    }

    /// Where recovery starts scanning the log.
    pub fn first_lsn(&self) -> LSN {
        self.read_lsn(FIRST_LSN_OFFSET)
    }

    pub fn set_first_lsn(&self, lsn: LSN) {
        self.write_lsn(FIRST_LSN_OFFSET, lsn);
    }

    /// End of the durable log.
    pub fn next_lsn(&self) -> LSN {
        self.read_lsn(NEXT_LSN_OFFSET)
    }

    pub fn set_next_lsn(&self, lsn: LSN) {
        self.write_lsn(NEXT_LSN_OFFSET, lsn);
    }

    /// Write the page and sync the file.
    pub fn save(&self) -> StorageResult<()> {
        let page = self.page.lock();
        self.file_manager.save_page(&self.file, 0, &page)?;
        self.file_manager.sync_file(&self.file)?;
        debug!(
            "Saved transaction state: next txn {}, first {}, next {}",
            LittleEndian::read_u32(&page[NEXT_TXN_ID_OFFSET..NEXT_TXN_ID_OFFSET + 4]),
            LSN::new(
                LittleEndian::read_u16(&page[FIRST_LSN_OFFSET..FIRST_LSN_OFFSET + 2]),
                LittleEndian::read_u32(&page[FIRST_LSN_OFFSET + 2..FIRST_LSN_OFFSET + 6]),
            ),
            LSN::new(
                LittleEndian::read_u16(&page[NEXT_LSN_OFFSET..NEXT_LSN_OFFSET + 2]),
                LittleEndian::read_u32(&page[NEXT_LSN_OFFSET + 2..NEXT_LSN_OFFSET + 6]),
            ),
        );
        Ok(())
    }
}
