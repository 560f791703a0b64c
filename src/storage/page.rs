pub mod btree_header_page;
pub mod btree_inner_page;
pub mod btree_leaf_page;
pub mod slotted_page;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::storage::file::DbFileRef;
use crate::storage::wal::LSN;

pub use btree_header_page::{BTreeHeaderPage, BTreePageType};
pub use btree_inner_page::BTreeInnerPage;
pub use btree_leaf_page::BTreeLeafPage;
pub use slotted_page::SlottedPage;

/// Identifies a cached page: file name plus page number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageKey {
    pub file_name: String,
    pub page_no: u32,
}

impl PageKey {
    pub fn new(file_name: impl Into<String>, page_no: u32) -> Self {
        Self {
            file_name: file_name.into(),
            page_no,
        }
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.file_name, self.page_no)
    }
}

/// Bytes of a cached page plus its logging state.
///
/// `old_data` holds the contents as of the last logged (or loaded) state and
/// exists exactly while the page is dirty. It is captured the first time the
/// page is borrowed mutably. Until a change is logged the snapshot also
/// equals the bytes on disk, so a borrow that wrote nothing can be undone
/// with `discard_unchanged`.
#[derive(Debug)]
pub struct PageContents {
    data: Vec<u8>,
    dirty: bool,
    old_data: Option<Vec<u8>>,
    logged: bool,
    page_lsn: Option<LSN>,
}

impl PageContents {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            dirty: false,
            old_data: None,
            logged: false,
            page_lsn: None,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access to the page bytes; marks the page dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        if !self.dirty {
            self.old_data = Some(self.data.clone());
            self.dirty = true;
        }
        &mut self.data
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn old_data(&self) -> Option<&[u8]> {
        self.old_data.as_deref()
    }

    /// LSN of the last log record describing a change to this page.
    pub fn page_lsn(&self) -> Option<LSN> {
        self.page_lsn
    }

    pub fn set_page_lsn(&mut self, lsn: LSN) {
        self.page_lsn = Some(lsn);
    }

    /// Make the snapshot match the current bytes after they were logged.
    pub fn sync_old_data(&mut self) {
        if let Some(old) = self.old_data.as_mut() {
            old.copy_from_slice(&self.data);
            self.logged = true;
        }
    }

    /// Drop the dirty flag if the bytes still match the disk image.
    pub fn discard_unchanged(&mut self) {
        if self.dirty && !self.logged && self.old_data.as_deref() == Some(&self.data[..]) {
            self.mark_clean();
        }
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
        self.old_data = None;
        self.logged = false;
    }

    pub fn read_u8(&self, offset: usize) -> u8 {
        self.data[offset]
    }

    pub fn read_u16(&self, offset: usize) -> u16 {
        LittleEndian::read_u16(&self.data[offset..offset + 2])
    }

    pub fn read_u32(&self, offset: usize) -> u32 {
        LittleEndian::read_u32(&self.data[offset..offset + 4])
    }

    pub fn write_u8(&mut self, offset: usize, value: u8) {
        self.data_mut()[offset] = value;
    }

    pub fn write_u16(&mut self, offset: usize, value: u16) {
        LittleEndian::write_u16(&mut self.data_mut()[offset..offset + 2], value);
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) {
        LittleEndian::write_u32(&mut self.data_mut()[offset..offset + 4], value);
    }

    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.data_mut()[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Copy `len` bytes from `src` to `dst`; the ranges may overlap.
    pub fn move_data_range(&mut self, src: usize, dst: usize, len: usize) {
        self.data_mut().copy_within(src..src + len, dst);
    }

    pub fn set_data_range(&mut self, offset: usize, len: usize, value: u8) {
        self.data_mut()[offset..offset + len].fill(value);
    }
}

/// A page cached by the buffer manager.
///
/// The pin count lives outside the content lock so the buffer manager can
/// test it while another thread holds the page.
pub struct DbPage {
    file: DbFileRef,
    page_no: u32,
    pin_count: AtomicU32,
    contents: RwLock<PageContents>,
}

/// Shared handle to a cached page.
pub type PageRef = Arc<DbPage>;

impl DbPage {
    pub(crate) fn new(file: DbFileRef, page_no: u32, data: Vec<u8>) -> Self {
        Self {
            file,
            page_no,
            pin_count: AtomicU32::new(0),
            contents: RwLock::new(PageContents::new(data)),
        }
    }

    pub fn file(&self) -> &DbFileRef {
        &self.file
    }

    pub fn page_no(&self) -> u32 {
        self.page_no
    }

    pub fn page_size(&self) -> usize {
        self.file.page_size()
    }

    pub fn key(&self) -> PageKey {
        PageKey::new(self.file.name(), self.page_no)
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    pub(crate) fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns false if the page was not pinned.
    pub(crate) fn unpin(&self) -> bool {
        self.pin_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1))
            .is_ok()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, PageContents> {
        self.contents.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, PageContents> {
        self.contents.write()
    }

    pub fn is_dirty(&self) -> bool {
        self.contents.read().is_dirty()
    }
}

impl fmt::Debug for DbPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbPage")
            .field("file", &self.file.name())
            .field("page_no", &self.page_no)
            .field("pin_count", &self.pin_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_taken_on_first_write() {
        let mut contents = PageContents::new(vec![1u8; 16]);
        assert!(!contents.is_dirty());
        assert!(contents.old_data().is_none());

        contents.write_u16(0, 0xBEEF);
        assert!(contents.is_dirty());
        assert_eq!(contents.old_data(), Some(&[1u8; 16][..]));
        assert_eq!(contents.read_u16(0), 0xBEEF);

        contents.write_u8(5, 9);
        assert_eq!(contents.old_data(), Some(&[1u8; 16][..]));
    }

    #[test]
    fn test_sync_old_data_and_clean() {
        let mut contents = PageContents::new(vec![0u8; 8]);
        contents.write_u32(4, 77);
        contents.sync_old_data();
        assert_eq!(contents.old_data(), Some(contents.data()));

        contents.mark_clean();
        assert!(!contents.is_dirty());
        assert!(contents.old_data().is_none());
    }

    #[test]
    fn test_discard_unchanged_borrow() {
        let mut contents = PageContents::new(vec![3u8; 8]);
        contents.data_mut()[2] = 3;
        assert!(contents.is_dirty());
        contents.discard_unchanged();
        assert!(!contents.is_dirty());
        assert!(contents.old_data().is_none());

        contents.write_u8(2, 4);
        contents.discard_unchanged();
        assert!(contents.is_dirty());

        // Logged bytes differ from disk even when the snapshot matches.
        contents.sync_old_data();
        contents.discard_unchanged();
        assert!(contents.is_dirty());
    }

    #[test]
    fn test_move_and_fill_ranges() {
        let mut contents = PageContents::new((0u8..8).collect());
        contents.move_data_range(0, 2, 4);
        assert_eq!(contents.data(), &[0, 1, 0, 1, 2, 3, 6, 7]);
        contents.set_data_range(0, 2, 0xFF);
        assert_eq!(&contents.data()[..2], &[0xFF, 0xFF]);
    }
}
