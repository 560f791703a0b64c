use std::sync::Arc;

use log::info;

use crate::config::StorageConfig;
use crate::session::SessionId;
use crate::storage::buffer::BufferManager;
use crate::storage::disk::{FileManager, PageLoad};
use crate::storage::error::StorageResult;
use crate::storage::file::{DbFileRef, FileKind};
use crate::storage::page::{DbPage, PageRef};

/// Entry point for file and page access: opens files once, serves pages
/// through the buffer manager and loads them from disk on a miss.
pub struct StorageManager {
    config: StorageConfig,
    file_manager: Arc<FileManager>,
    buffer_manager: Arc<BufferManager>,
}

impl StorageManager {
    pub fn new(config: StorageConfig) -> StorageResult<Self> {
        let file_manager = Arc::new(FileManager::new(&config.base_dir)?);
        let buffer_manager = Arc::new(BufferManager::new(file_manager.clone(), &config));
        info!(
            "Storage at {} (page size {}, buffer pool {} bytes, {} eviction)",
            config.base_dir.display(),
            config.page_size,
            config.buffer_pool_bytes,
            config.eviction_policy
        );
        Ok(Self {
            config,
            file_manager,
            buffer_manager,
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn file_manager(&self) -> &Arc<FileManager> {
        &self.file_manager
    }

    pub fn buffer_manager(&self) -> &Arc<BufferManager> {
        &self.buffer_manager
    }

    pub fn file_exists(&self, name: &str) -> bool {
        self.buffer_manager.get_file(name).is_some() || self.file_manager.file_exists(name)
    }

    pub fn create_file(&self, name: &str, kind: FileKind) -> StorageResult<DbFileRef> {
        self.create_file_with_page_size(name, kind, self.config.page_size)
    }

    pub fn create_file_with_page_size(
        &self,
        name: &str,
        kind: FileKind,
        page_size: usize,
    ) -> StorageResult<DbFileRef> {
        let file = Arc::new(self.file_manager.create_file(name, kind, page_size)?);
        self.buffer_manager.add_file(file.clone());
        Ok(file)
    }

    /// Open a file, reusing the handle if it is already open.
    pub fn open_file(&self, name: &str) -> StorageResult<DbFileRef> {
        if let Some(file) = self.buffer_manager.get_file(name) {
            return Ok(file);
        }
        let file = Arc::new(self.file_manager.open_file(name)?);
        self.buffer_manager.add_file(file.clone());
        Ok(file)
    }

    /// Write back and drop the file's cached pages and forget the handle.
    pub fn close_file(&self, file: &DbFileRef) -> StorageResult<()> {
        self.buffer_manager.remove_file(file)
    }

    pub fn delete_file(&self, name: &str) -> StorageResult<()> {
        if let Some(file) = self.buffer_manager.get_file(name) {
            self.close_file(&file)?;
        }
        self.file_manager.delete_file(name)
    }

    /// Fetch a page pinned for `session`, reading it from disk on a miss.
    /// With `create`, a page past the end of the file is created zeroed.
    pub fn load_page(
        &self,
        session: SessionId,
        file: &DbFileRef,
        page_no: u32,
        create: bool,
    ) -> StorageResult<PageRef> {
        if let Some(page) = self.buffer_manager.get_page(session, file, page_no) {
            return Ok(page);
        }

        let mut data = vec![0u8; file.page_size()];
        self.file_manager.load_page(file, page_no, &mut data, create)?;
        let page = Arc::new(DbPage::new(file.clone(), page_no, data));
        self.buffer_manager.add_page(session, page.clone())?;
        Ok(page)
    }

    /// Like [`StorageManager::load_page`] with `create`, but also reports
    /// whether the page is new.
    pub fn load_or_create_page(
        &self,
        session: SessionId,
        file: &DbFileRef,
        page_no: u32,
    ) -> StorageResult<(PageRef, bool)> {
        if let Some(page) = self.buffer_manager.get_page(session, file, page_no) {
            return Ok((page, false));
        }

        let mut data = vec![0u8; file.page_size()];
        let outcome = self.file_manager.load_page(file, page_no, &mut data, true)?;
        let page = Arc::new(DbPage::new(file.clone(), page_no, data));
        self.buffer_manager.add_page(session, page.clone())?;
        Ok((page, outcome == PageLoad::Created))
    }

    pub fn unpin_page(&self, session: SessionId, page: &PageRef) -> StorageResult<()> {
        self.buffer_manager.unpin_page(session, page)
    }

    pub fn unpin_all(&self, session: SessionId) -> StorageResult<()> {
        self.buffer_manager.unpin_all(session)
    }

    pub fn num_pages(&self, file: &DbFileRef) -> StorageResult<u32> {
        self.file_manager.num_pages(file)
    }

    pub fn flush_file(&self, file: &DbFileRef) -> StorageResult<()> {
        self.buffer_manager.flush_file(file)
    }

    pub fn sync_file(&self, file: &DbFileRef) -> StorageResult<()> {
        self.file_manager.sync_file(file)
    }

    pub fn flush_all(&self, sync: bool) -> StorageResult<()> {
        self.buffer_manager.flush_all(sync)
    }

    /// Write everything back and empty the cache.
    pub fn shutdown(&self) -> StorageResult<()> {
        self.buffer_manager.evict_all()?;
        info!("Storage shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::error::StorageError;
    use anyhow::Result;
    use tempfile::tempdir;

    const S: SessionId = SessionId(1);

    fn storage(dir: &tempfile::TempDir) -> Result<StorageManager> {
        Ok(StorageManager::new(
            StorageConfig::new(dir.path()).with_page_size(512),
        )?)
    }

    #[test]
    fn test_page_survives_restart() -> Result<()> {
        let dir = tempdir()?;
        {
            let sm = storage(&dir)?;
            let file = sm.create_file("data.tbl", FileKind::HeapData)?;
            let page = sm.load_page(S, &file, 1, true)?;
            page.write().write_bytes(100, b"persisted");
            sm.unpin_page(S, &page)?;
            sm.shutdown()?;
        }

        let sm = storage(&dir)?;
        let file = sm.open_file("data.tbl")?;
        assert_eq!(file.kind(), FileKind::HeapData);
        let page = sm.load_page(S, &file, 1, false)?;
        assert_eq!(&page.read().data()[100..109], b"persisted");
        Ok(())
    }

    #[test]
    fn test_open_file_reuses_handle() -> Result<()> {
        let dir = tempdir()?;
        let sm = storage(&dir)?;
        let created = sm.create_file("x.idx", FileKind::BTreeIndex)?;
        let opened = sm.open_file("x.idx")?;
        assert!(Arc::ptr_eq(&created, &opened));
        Ok(())
    }

    #[test]
    fn test_load_missing_page_without_create() -> Result<()> {
        let dir = tempdir()?;
        let sm = storage(&dir)?;
        let file = sm.create_file("x.tbl", FileKind::HeapData)?;
        let result = sm.load_page(S, &file, 5, false);
        assert!(matches!(result, Err(StorageError::PageNotFound { page_no: 5, .. })));

        let (_, created) = sm.load_or_create_page(S, &file, 5)?;
        assert!(created);
        assert_eq!(sm.num_pages(&file)?, 6);
        Ok(())
    }

    #[test]
    fn test_same_page_shared_between_loads() -> Result<()> {
        let dir = tempdir()?;
        let sm = storage(&dir)?;
        let file = sm.create_file("x.tbl", FileKind::HeapData)?;
        let a = sm.load_page(S, &file, 0, false)?;
        let b = sm.load_page(SessionId(2), &file, 0, false)?;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.pin_count(), 2);
        sm.unpin_all(S)?;
        assert_eq!(a.pin_count(), 1);
        Ok(())
    }

    #[test]
    fn test_delete_file() -> Result<()> {
        let dir = tempdir()?;
        let sm = storage(&dir)?;
        sm.create_file("gone.tbl", FileKind::HeapData)?;
        assert!(sm.file_exists("gone.tbl"));
        sm.delete_file("gone.tbl")?;
        assert!(!sm.file_exists("gone.tbl"));
        Ok(())
    }
}
