//! Shared handles used by tuple files and indexes.

use std::sync::Arc;

use crate::session::{Session, SessionId};
use crate::storage::error::StorageResult;
use crate::storage::file::DbFileRef;
use crate::storage::manager::StorageManager;
use crate::storage::page::{DbPage, PageRef};
use crate::transaction::TransactionManager;

/// Storage plus the optional transaction manager, handed to every access
/// method at construction time.
pub struct AccessContext {
    storage: Arc<StorageManager>,
    transactions: Option<Arc<TransactionManager>>,
}

impl AccessContext {
    pub fn new(storage: Arc<StorageManager>, transactions: Option<Arc<TransactionManager>>) -> Self {
        Self {
            storage,
            transactions,
        }
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    pub fn transactions(&self) -> Option<&Arc<TransactionManager>> {
        self.transactions.as_ref()
    }

    pub fn load_page(
        &self,
        session: SessionId,
        file: &DbFileRef,
        page_no: u32,
        create: bool,
    ) -> StorageResult<PageRef> {
        self.storage.load_page(session, file, page_no, create)
    }

    /// Log what changed in `page`. The caller must not hold the page's lock.
    pub fn log_page_write(&self, session: &mut Session, page: &DbPage) -> StorageResult<()> {
        if let Some(txns) = &self.transactions {
            txns.record_page_update(session, page)?;
        }
        page.write().discard_unchanged();
        Ok(())
    }

    pub fn release(&self, session: SessionId, page: &PageRef) -> StorageResult<()> {
        self.storage.unpin_page(session, page)
    }
}
