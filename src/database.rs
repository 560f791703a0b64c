use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;
use log::{info, warn};

use crate::access::{AccessContext, BTreeIndex, ColumnType, HeapTupleFile, TableSchema};
use crate::config::StorageConfig;
use crate::recovery::{RecoveryStats, RedoUndoRecovery};
use crate::session::{Session, SessionId};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::file::FileKind;
use crate::storage::manager::StorageManager;
use crate::transaction::{TransactionId, TransactionManager};

/// Kind, page size and length of one file in the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStats {
    pub name: String,
    pub kind: FileKind,
    pub page_size: usize,
    pub num_pages: u32,
}

/// High-level database interface that wires the storage, transaction and
/// access layers together
pub struct Database {
    storage: Arc<StorageManager>,
    transactions: Option<Arc<TransactionManager>>,
    context: Arc<AccessContext>,
    tables: DashMap<String, Arc<HeapTupleFile>>,
    indexes: DashMap<String, Arc<BTreeIndex>>,
    next_session: AtomicU32,
    /// False when opened without recovery; such a database must not checkpoint.
    recovered: bool,
    recovery: Option<RecoveryStats>,
}

fn table_file_name(name: &str) -> String {
    format!("{}.tbl", name)
}

fn index_file_name(name: &str) -> String {
    format!("{}.idx", name)
}

impl Database {
    /// Open (or initialize) the data directory, running recovery first when
    /// transactions are enabled.
    pub fn open(config: StorageConfig) -> StorageResult<Self> {
        Self::open_with(config, true)
    }

    /// Open the data directory without recovering, leaving the recovery
    /// range in the log untouched so it can be inspected. Shutdown then does
    /// not checkpoint; the next regular `open` still recovers.
    pub fn open_without_recovery(config: StorageConfig) -> StorageResult<Self> {
        Self::open_with(config, false)
    }

    fn open_with(config: StorageConfig, recover: bool) -> StorageResult<Self> {
        let storage = Arc::new(StorageManager::new(config)?);

        let (transactions, recovery) = if storage.config().enable_transactions {
            let txns = TransactionManager::open(&storage)?;
            let stats = if recover {
                Some(RedoUndoRecovery::new(&storage, &txns).recover()?)
            } else {
                let (first, next) = txns.recovery_range();
                info!("Skipping recovery of log range [{}, {})", first, next);
                None
            };
            (Some(txns), stats)
        } else {
            info!("Transactions disabled, no recovery");
            (None, None)
        };

        let context = Arc::new(AccessContext::new(storage.clone(), transactions.clone()));
        Ok(Self {
            storage,
            transactions,
            context,
            tables: DashMap::new(),
            indexes: DashMap::new(),
            // Session 0 belongs to recovery.
            next_session: AtomicU32::new(1),
            recovered: recover,
            recovery,
        })
    }

    pub fn storage(&self) -> &Arc<StorageManager> {
        &self.storage
    }

    pub fn context(&self) -> &Arc<AccessContext> {
        &self.context
    }

    pub fn transactions(&self) -> Option<&Arc<TransactionManager>> {
        self.transactions.as_ref()
    }

    /// What recovery did when the database was opened.
    pub fn recovery_stats(&self) -> Option<&RecoveryStats> {
        self.recovery.as_ref()
    }

    pub fn new_session(&self) -> Session {
        Session::new(SessionId(self.next_session.fetch_add(1, Ordering::Relaxed)))
    }

    /// Create a new table
    pub fn create_table(&self, name: &str, schema: TableSchema) -> StorageResult<Arc<HeapTupleFile>> {
        let table = Arc::new(HeapTupleFile::create(
            self.context.clone(),
            &table_file_name(name),
            schema,
        )?);
        self.tables.insert(name.to_string(), table.clone());
        Ok(table)
    }

    /// Open a table for reading/writing
    pub fn open_table(&self, name: &str) -> StorageResult<Arc<HeapTupleFile>> {
        if let Some(table) = self.tables.get(name) {
            return Ok(table.clone());
        }
        let table = Arc::new(HeapTupleFile::open(self.context.clone(), &table_file_name(name))?);
        Ok(self.tables.entry(name.to_string()).or_insert(table).clone())
    }

    pub fn create_index(&self, name: &str, key_columns: Vec<ColumnType>) -> StorageResult<Arc<BTreeIndex>> {
        let index = Arc::new(BTreeIndex::create(
            self.context.clone(),
            &index_file_name(name),
            key_columns,
        )?);
        self.indexes.insert(name.to_string(), index.clone());
        Ok(index)
    }

    pub fn open_index(&self, name: &str) -> StorageResult<Arc<BTreeIndex>> {
        if let Some(index) = self.indexes.get(name) {
            return Ok(index.clone());
        }
        let index = Arc::new(BTreeIndex::open(self.context.clone(), &index_file_name(name))?);
        Ok(self.indexes.entry(name.to_string()).or_insert(index).clone())
    }

    /// Kind, page size and page count of a file in the data directory.
    pub fn file_stats(&self, file_name: &str) -> StorageResult<FileStats> {
        let file = self.storage.open_file(file_name)?;
        Ok(FileStats {
            name: file.name().to_string(),
            kind: file.kind(),
            page_size: file.page_size(),
            num_pages: self.storage.num_pages(&file)?,
        })
    }

    fn require_transactions(&self) -> StorageResult<&Arc<TransactionManager>> {
        self.transactions
            .as_ref()
            .ok_or_else(|| StorageError::Unsupported("transactions are disabled".to_string()))
    }

    /// Start a user transaction; it lasts until `commit` or `rollback`.
    pub fn begin(&self, session: &mut Session) -> StorageResult<TransactionId> {
        self.require_transactions()?.start_transaction(session, true)
    }

    pub fn commit(&self, session: &mut Session) -> StorageResult<()> {
        self.require_transactions()?.commit(&self.storage, session)
    }

    pub fn rollback(&self, session: &mut Session) -> StorageResult<()> {
        self.require_transactions()?.rollback(&self.storage, session)
    }

    /// Run `f`, then commit what it did, or roll it back if it failed. Work
    /// inside a user transaction is left for the user to finish.
    pub fn autocommit<T>(
        &self,
        session: &mut Session,
        f: impl FnOnce(&mut Session) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let Some(txns) = &self.transactions else {
            let result = f(session);
            self.storage.unpin_all(session.id())?;
            return result;
        };

        if session.transaction().is_some_and(|t| t.user_started) {
            return f(session);
        }

        let result = f(session);
        if !session.in_transaction() {
            self.storage.unpin_all(session.id())?;
            return result;
        }
        match result {
            Ok(value) => {
                txns.commit(&self.storage, session)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = txns.rollback(&self.storage, session) {
                    warn!("{}: rollback after error failed: {}", session.id(), rollback_err);
                }
                Err(e)
            }
        }
    }

    /// Flush everything, checkpoint the log and empty the buffer pool.
    /// No transaction may be running.
    pub fn shutdown(&self) -> StorageResult<()> {
        match &self.transactions {
            Some(txns) if self.recovered => {
                txns.checkpoint(&self.storage)?;
            }
            _ => self.storage.flush_all(true)?,
        }
        self.storage.shutdown()?;
        self.tables.clear();
        self.indexes.clear();
        info!("Database shut down");
        Ok(())
    }
}
