pub mod fifo;
pub mod lru;
pub mod replacer;

use crate::config::{EvictionPolicy, StorageConfig};
use crate::session::SessionId;
use crate::storage::disk::FileManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::file::DbFileRef;
use crate::storage::page::{PageKey, PageRef};
use dashmap::DashMap;
use log::{debug, trace, warn};
use parking_lot::{Mutex, RwLock};
use replacer::Replacer;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Hook run before dirty pages reach disk; the write-ahead log uses it to
/// force log records covering those pages.
pub trait FlushObserver: Send + Sync {
    fn before_write_dirty_pages(&self, pages: &[PageRef]) -> StorageResult<()>;
}

/// Caches pages of open files within a byte budget.
///
/// Every page handed out is pinned for the requesting session; pinned pages
/// are never evicted. Pins can be released one at a time or all at once
/// when the session's transaction ends.
pub struct BufferManager {
    file_manager: Arc<FileManager>,
    open_files: DashMap<String, DbFileRef>,
    page_table: DashMap<PageKey, PageRef>,
    state: Mutex<BufferState>,
    observer: RwLock<Option<Arc<dyn FlushObserver>>>,
    max_bytes: usize,
}

struct BufferState {
    replacer: Box<dyn Replacer>,
    total_bytes: usize,
    session_pins: HashMap<SessionId, HashMap<PageKey, u32>>,
}

impl BufferManager {
    pub fn new(file_manager: Arc<FileManager>, config: &StorageConfig) -> Self {
        let replacer: Box<dyn Replacer> = match config.eviction_policy {
            EvictionPolicy::Fifo => Box::new(fifo::FifoReplacer::new()),
            EvictionPolicy::Lru => Box::new(lru::LruReplacer::new()),
        };
        Self {
            file_manager,
            open_files: DashMap::new(),
            page_table: DashMap::new(),
            state: Mutex::new(BufferState {
                replacer,
                total_bytes: 0,
                session_pins: HashMap::new(),
            }),
            observer: RwLock::new(None),
            max_bytes: config.buffer_pool_bytes,
        }
    }

    pub fn set_flush_observer(&self, observer: Arc<dyn FlushObserver>) {
        *self.observer.write() = Some(observer);
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn cached_bytes(&self) -> usize {
        self.state.lock().total_bytes
    }

    pub fn cached_pages(&self) -> usize {
        self.page_table.len()
    }

    pub fn contains_page(&self, file_name: &str, page_no: u32) -> bool {
        self.page_table
            .contains_key(&PageKey::new(file_name, page_no))
    }

    pub fn add_file(&self, file: DbFileRef) {
        self.open_files.insert(file.name().to_string(), file);
    }

    pub fn get_file(&self, name: &str) -> Option<DbFileRef> {
        self.open_files.get(name).map(|f| f.value().clone())
    }

    pub fn open_files(&self) -> Vec<DbFileRef> {
        self.open_files.iter().map(|f| f.value().clone()).collect()
    }

    /// Write back and drop every cached page of `file`, then forget it.
    pub fn remove_file(&self, file: &DbFileRef) -> StorageResult<()> {
        self.flush_file(file)?;
        let mut state = self.state.lock();
        let keys: Vec<PageKey> = self
            .page_table
            .iter()
            .filter(|e| e.key().file_name == file.name())
            .map(|e| e.key().clone())
            .collect();
        for key in keys {
            if let Some((_, page)) = self.page_table.remove(&key) {
                if page.pin_count() > 0 {
                    warn!("Dropping page {} of closed file while pinned", key);
                }
                state.replacer.remove(&key);
                state.total_bytes -= page.page_size();
            }
        }
        self.open_files.remove(file.name());
        debug!("Closed file {}", file.name());
        Ok(())
    }

    /// Look up a cached page, pinning it for `session` when found.
    pub fn get_page(&self, session: SessionId, file: &DbFileRef, page_no: u32) -> Option<PageRef> {
        let key = PageKey::new(file.name(), page_no);
        let mut state = self.state.lock();
        let page = self.page_table.get(&key).map(|p| p.value().clone())?;
        state.replacer.record_access(&key);
        Self::pin_locked(&mut state, session, &page);
        Some(page)
    }

    /// Cache a freshly loaded page, evicting others if needed, and pin it
    /// for `session`.
    pub fn add_page(&self, session: SessionId, page: PageRef) -> StorageResult<()> {
        let key = page.key();
        let mut state = self.state.lock();
        if self.page_table.contains_key(&key) {
            return Err(StorageError::invariant(format!(
                "page {} is already cached",
                key
            )));
        }
        self.make_room(&mut state, page.page_size())?;

        state.replacer.record_insert(&key);
        state.total_bytes += page.page_size();
        Self::pin_locked(&mut state, session, &page);
        self.page_table.insert(key, page);
        Ok(())
    }

    pub fn pin_page(&self, session: SessionId, page: &PageRef) {
        let mut state = self.state.lock();
        Self::pin_locked(&mut state, session, page);
    }

    fn pin_locked(state: &mut BufferState, session: SessionId, page: &PageRef) {
        page.pin();
        *state
            .session_pins
            .entry(session)
            .or_default()
            .entry(page.key())
            .or_insert(0) += 1;
    }

    pub fn unpin_page(&self, session: SessionId, page: &PageRef) -> StorageResult<()> {
        let key = page.key();
        let mut state = self.state.lock();
        let pins = state.session_pins.get_mut(&session);
        let count = pins.as_ref().and_then(|p| p.get(&key).copied()).unwrap_or(0);
        if count == 0 {
            return Err(StorageError::invariant(format!(
                "session {} unpinned page {} it does not hold",
                session.0, key
            )));
        }
        if let Some(pins) = pins {
            if count == 1 {
                pins.remove(&key);
            } else {
                pins.insert(key.clone(), count - 1);
            }
        }
        if !page.unpin() {
            return Err(StorageError::invariant(format!(
                "page {} unpinned below zero",
                key
            )));
        }
        trace!("Session {} unpinned {}", session.0, key);
        Ok(())
    }

    /// Release every pin `session` still holds.
    pub fn unpin_all(&self, session: SessionId) -> StorageResult<()> {
        let mut state = self.state.lock();
        let Some(pins) = state.session_pins.remove(&session) else {
            return Ok(());
        };
        for (key, count) in pins {
            match self.page_table.get(&key) {
                Some(page) => {
                    for _ in 0..count {
                        page.unpin();
                    }
                }
                None => warn!("Session {} held pins on uncached page {}", session.0, key),
            }
        }
        Ok(())
    }

    /// Number of pins `session` holds across all pages.
    pub fn session_pin_count(&self, session: SessionId) -> u32 {
        self.state
            .lock()
            .session_pins
            .get(&session)
            .map(|p| p.values().sum())
            .unwrap_or(0)
    }

    fn make_room(&self, state: &mut BufferState, needed: usize) -> StorageResult<()> {
        if state.total_bytes + needed <= self.max_bytes {
            return Ok(());
        }

        let mut victims = Vec::new();
        let mut freed = 0;
        for key in state.replacer.candidates() {
            if state.total_bytes - freed + needed <= self.max_bytes {
                break;
            }
            let Some(page) = self.page_table.get(&key).map(|p| p.value().clone()) else {
                continue;
            };
            if page.pin_count() > 0 {
                continue;
            }
            freed += page.page_size();
            victims.push(page);
        }

        let dirty: Vec<PageRef> = victims.iter().filter(|p| p.is_dirty()).cloned().collect();
        if !dirty.is_empty() {
            self.write_dirty_pages(&dirty, false)?;
        }

        for page in victims {
            let key = page.key();
            self.page_table.remove(&key);
            state.replacer.remove(&key);
            state.total_bytes -= page.page_size();
            debug!("Evicted page {}", key);
        }

        if state.total_bytes + needed > self.max_bytes {
            warn!(
                "Buffer pool over budget: {} bytes cached plus {} requested exceeds {}",
                state.total_bytes, needed, self.max_bytes
            );
        }
        Ok(())
    }

    /// Write dirty pages back, informing the observer first.
    fn write_dirty_pages(&self, pages: &[PageRef], sync: bool) -> StorageResult<()> {
        if pages.is_empty() {
            return Ok(());
        }
        if let Some(observer) = self.observer.read().as_ref() {
            observer.before_write_dirty_pages(pages)?;
        }

        let mut files: BTreeMap<String, DbFileRef> = BTreeMap::new();
        for page in pages {
            let mut contents = page.write();
            if !contents.is_dirty() {
                continue;
            }
            self.file_manager
                .save_page(page.file(), page.page_no(), contents.data())?;
            contents.mark_clean();
            files
                .entry(page.file().name().to_string())
                .or_insert_with(|| page.file().clone());
        }
        if sync {
            for file in files.values() {
                self.file_manager.sync_file(file)?;
            }
        }
        debug!("Wrote {} dirty pages", pages.len());
        Ok(())
    }

    fn dirty_pages_where(&self, filter: impl Fn(&PageKey) -> bool) -> Vec<PageRef> {
        let mut pages: Vec<PageRef> = self
            .page_table
            .iter()
            .filter(|e| filter(e.key()) && e.value().is_dirty())
            .map(|e| e.value().clone())
            .collect();
        pages.sort_by(|a, b| a.key().cmp(&b.key()));
        pages
    }

    /// Write back dirty pages of `file` numbered within `[min_page, max_page]`.
    pub fn flush_file_range(
        &self,
        file: &DbFileRef,
        min_page: u32,
        max_page: u32,
        sync: bool,
    ) -> StorageResult<()> {
        let pages = self.dirty_pages_where(|k| {
            k.file_name == file.name() && (min_page..=max_page).contains(&k.page_no)
        });
        self.write_dirty_pages(&pages, false)?;
        if sync {
            self.file_manager.sync_file(file)?;
        }
        Ok(())
    }

    pub fn flush_file(&self, file: &DbFileRef) -> StorageResult<()> {
        self.flush_file_range(file, 0, u32::MAX, false)
    }

    /// Write back every dirty page; with `sync`, also fsync every open file.
    pub fn flush_all(&self, sync: bool) -> StorageResult<()> {
        let pages = self.dirty_pages_where(|_| true);
        self.write_dirty_pages(&pages, false)?;
        if sync {
            for file in self.open_files() {
                self.file_manager.sync_file(&file)?;
            }
        }
        Ok(())
    }

    /// Flush everything and empty the cache, regardless of pins.
    pub fn evict_all(&self) -> StorageResult<()> {
        self.flush_all(true)?;
        let mut state = self.state.lock();
        for entry in self.page_table.iter() {
            if entry.value().pin_count() > 0 {
                warn!("Evicting pinned page {}", entry.key());
            }
            state.replacer.remove(entry.key());
        }
        self.page_table.clear();
        state.total_bytes = 0;
        state.session_pins.clear();
        debug!("Evicted all pages");
        Ok(())
    }
}
