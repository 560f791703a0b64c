//! B+-tree secondary indexes.
//!
//! Page 0 of an index file is a [`BTreeHeaderPage`]; every other page is an
//! inner node, a leaf, or a member of the free list. Each stored key is the
//! indexed column values followed by the file pointer of the indexed tuple,
//! so no two keys compare equal even when the indexed values repeat.
//!
//! When a node outgrows its page, entries are first relocated to the left or
//! right sibling. Only when neither sibling has room is the node split, which
//! inserts a new separator into the parent and may grow the tree by a level.

pub mod iterator;
pub mod key;
pub mod verify;

use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, info};

use self::iterator::IndexScanner;
use self::key::BTreeKey;
use crate::access::context::AccessContext;
use crate::access::tuple::{FilePointer, Tuple};
use crate::access::value::{ColumnType, Value};
use crate::session::{Session, SessionId};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::file::{DbFileRef, FileKind};
use crate::storage::page::btree_header_page::{free_page_next, init_free_page};
use crate::storage::page::btree_inner_page::{INNER_HEADER_SIZE, POINTER_SIZE};
use crate::storage::page::btree_leaf_page::LEAF_HEADER_SIZE;
use crate::storage::page::{BTreeHeaderPage, BTreeInnerPage, BTreeLeafPage, BTreePageType};

/// Deepest tree navigation will descend before assuming a cycle.
const MAX_DEPTH: usize = 64;

/// A decoded non-header page.
#[derive(Debug)]
pub(crate) enum Node {
    Inner(BTreeInnerPage),
    Leaf(BTreeLeafPage),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct HeaderInfo {
    pub root: u16,
    pub first_leaf: u16,
    pub first_free: u16,
}

pub struct BTreeIndex {
    ctx: Arc<AccessContext>,
    file: DbFileRef,
    /// Types of the indexed columns.
    key_columns: Vec<ColumnType>,
    /// `key_columns` plus the trailing file pointer.
    key_schema: Vec<ColumnType>,
}

impl BTreeIndex {
    /// Create an empty index over columns of the given types.
    pub fn create(ctx: Arc<AccessContext>, name: &str, key_columns: Vec<ColumnType>) -> StorageResult<Self> {
        if key_columns.is_empty() {
            return Err(StorageError::Schema("an index needs at least one column".to_string()));
        }
        // The header page is written straight to the new file and synced
        // before any handle exists, so it is neither cached nor logged.
        let file = ctx.storage().create_file(name, FileKind::BTreeIndex)?;
        let file_manager = ctx.storage().file_manager();
        let mut data = vec![0u8; file.page_size()];
        file_manager.load_page(&file, 0, &mut data, false)?;
        {
            let mut header = BTreeHeaderPage::from_data(&mut data[..]);
            header.set_root_page(0);
            header.set_first_leaf_page(0);
            header.set_first_free_page(0);
            header.set_key_schema(&key_columns)?;
        }
        file_manager.save_page(&file, 0, &data)?;
        file_manager.sync_file(&file)?;

        info!("Created index {} on {:?}", name, key_columns);
        Ok(Self::new(ctx, file, key_columns))
    }

    pub fn open(ctx: Arc<AccessContext>, name: &str) -> StorageResult<Self> {
        let file = ctx.storage().open_file(name)?;
        file.expect_kind(FileKind::BTreeIndex)?;
        // Only the key schema is read here and it never changes after
        // create, so a cached copy of page 0 cannot hold different bytes.
        let mut data = vec![0u8; file.page_size()];
        ctx.storage().file_manager().load_page(&file, 0, &mut data, false)?;
        let key_columns = BTreeHeaderPage::from_data(&data[..]).key_schema()?;
        debug!("Opened index {} on {:?}", name, key_columns);
        Ok(Self::new(ctx, file, key_columns))
    }

    fn new(ctx: Arc<AccessContext>, file: DbFileRef, key_columns: Vec<ColumnType>) -> Self {
        let mut key_schema = key_columns.clone();
        key_schema.push(ColumnType::FilePointer);
        Self {
            ctx,
            file,
            key_columns,
            key_schema,
        }
    }

    pub fn file(&self) -> &DbFileRef {
        &self.file
    }

    pub fn key_columns(&self) -> &[ColumnType] {
        &self.key_columns
    }

    pub(crate) fn key_schema(&self) -> &[ColumnType] {
        &self.key_schema
    }

    fn page_size(&self) -> usize {
        self.file.page_size()
    }

    /// Largest stored key accepted; three of them always fit in one node, so
    /// a split can always produce two nodes that fit.
    pub fn max_key_size(&self) -> usize {
        let overhead = LEAF_HEADER_SIZE.max(INNER_HEADER_SIZE + 3 * POINTER_SIZE);
        (self.page_size() - overhead) / 3
    }

    // Page access. Pages are pinned only for the duration of one closure.

    pub(crate) fn read_page<T>(
        &self,
        session: SessionId,
        page_no: u16,
        f: impl FnOnce(&[u8]) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let page = self.ctx.load_page(session, &self.file, page_no as u32, false)?;
        let result = f(page.read().data());
        self.ctx.release(session, &page)?;
        result
    }

    fn write_page<T>(
        &self,
        session: &mut Session,
        page_no: u16,
        f: impl FnOnce(&mut [u8]) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let page = self.ctx.load_page(session.id(), &self.file, page_no as u32, false)?;
        let result = f(page.write().data_mut());
        let logged = match result {
            Ok(_) => self.ctx.log_page_write(session, &page),
            Err(_) => Ok(()),
        };
        self.ctx.release(session.id(), &page)?;
        logged?;
        result
    }

    pub(crate) fn read_header(&self, session: SessionId) -> StorageResult<HeaderInfo> {
        self.read_page(session, 0, |data| {
            let header = BTreeHeaderPage::from_data(data);
            Ok(HeaderInfo {
                root: header.root_page(),
                first_leaf: header.first_leaf_page(),
                first_free: header.first_free_page(),
            })
        })
    }

    fn update_header(
        &self,
        session: &mut Session,
        f: impl FnOnce(&mut BTreeHeaderPage<&mut [u8]>),
    ) -> StorageResult<()> {
        self.write_page(session, 0, |data| {
            f(&mut BTreeHeaderPage::from_data(data));
            Ok(())
        })
    }

    pub(crate) fn load_node(&self, session: SessionId, page_no: u16) -> StorageResult<Node> {
        if page_no == 0 {
            return Err(StorageError::invariant("index node pointer to the header page"));
        }
        self.read_page(session, page_no, |data| match BTreePageType::of_page(data)? {
            BTreePageType::Inner => Ok(Node::Inner(BTreeInnerPage::load(page_no, data, &self.key_schema)?)),
            BTreePageType::Leaf => Ok(Node::Leaf(BTreeLeafPage::load(page_no, data, &self.key_schema)?)),
            BTreePageType::Free => Err(StorageError::invariant(format!(
                "free page {} is reachable from the tree",
                page_no
            ))),
        })
    }

    pub(crate) fn load_leaf(&self, session: SessionId, page_no: u16) -> StorageResult<BTreeLeafPage> {
        match self.load_node(session, page_no)? {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Inner(_) => Err(StorageError::invariant(format!(
                "expected leaf at page {}, found an inner page",
                page_no
            ))),
        }
    }

    fn load_inner(&self, session: SessionId, page_no: u16) -> StorageResult<BTreeInnerPage> {
        match self.load_node(session, page_no)? {
            Node::Inner(inner) => Ok(inner),
            Node::Leaf(_) => Err(StorageError::invariant(format!(
                "expected inner page at page {}, found a leaf",
                page_no
            ))),
        }
    }

    fn store_leaf(&self, session: &mut Session, leaf: &BTreeLeafPage) -> StorageResult<()> {
        self.write_page(session, leaf.page_no(), |data| leaf.store(data))
    }

    fn store_inner(&self, session: &mut Session, inner: &BTreeInnerPage) -> StorageResult<()> {
        self.write_page(session, inner.page_no(), |data| inner.store(data))
    }

    // Free-page management.

    /// A page for a new node: the head of the free list if there is one,
    /// otherwise a new page at the end of the file.
    fn get_new_data_page(&self, session: &mut Session) -> StorageResult<u16> {
        let header = self.read_header(session.id())?;
        if header.first_free != 0 {
            let page_no = header.first_free;
            let next = self.read_page(session.id(), page_no, free_page_next)?;
            self.update_header(session, |h| h.set_first_free_page(next))?;
            debug!("Reusing free page {} of {}", page_no, self.file.name());
            return Ok(page_no);
        }

        let num_pages = self.ctx.storage().num_pages(&self.file)?;
        if num_pages > u16::MAX as u32 {
            return Err(StorageError::CapacityExceeded {
                required: num_pages as usize + 1,
                available: u16::MAX as usize + 1,
            });
        }
        let page = self.ctx.load_page(session.id(), &self.file, num_pages, true)?;
        self.ctx.release(session.id(), &page)?;
        debug!("Extended {} with page {}", self.file.name(), num_pages);
        Ok(num_pages as u16)
    }

    /// Push a page onto the free list.
    fn release_data_page(&self, session: &mut Session, page_no: u16) -> StorageResult<()> {
        let header = self.read_header(session.id())?;
        let zero_body = self.ctx.storage().config().zero_freed_index_pages;
        self.write_page(session, page_no, |data| {
            init_free_page(data, header.first_free, zero_body);
            Ok(())
        })?;
        self.update_header(session, |h| h.set_first_free_page(page_no))
    }

    // Insertion.

    /// Index a heap tuple on the given columns.
    pub fn add_tuple(&self, session: &mut Session, tuple: &Tuple, columns: &[usize]) -> StorageResult<()> {
        let values = columns
            .iter()
            .map(|&c| {
                tuple.get(c).cloned().ok_or_else(|| {
                    StorageError::Schema(format!("tuple has no column {}", c))
                })
            })
            .collect::<StorageResult<Vec<_>>>()?;
        self.add_entry(session, &values, tuple.locator)
    }

    /// Add the key `values` + `locator`.
    pub fn add_entry(&self, session: &mut Session, values: &[Value], locator: FilePointer) -> StorageResult<()> {
        let key = self.make_key(values, locator)?;
        let header = self.read_header(session.id())?;

        if header.root == 0 {
            let page_no = self.get_new_data_page(session)?;
            let mut leaf = BTreeLeafPage::new(page_no);
            leaf.insert(key)?;
            self.store_leaf(session, &leaf)?;
            self.update_header(session, |h| {
                h.set_root_page(page_no);
                h.set_first_leaf_page(page_no);
            })?;
            debug!("Created root leaf {} of {}", page_no, self.file.name());
            return Ok(());
        }

        let path = self.navigate_to_leaf(session.id(), header.root, key.values())?;
        let leaf_no = *path
            .last()
            .ok_or_else(|| StorageError::invariant("empty path to leaf"))?;
        let mut leaf = self.load_leaf(session.id(), leaf_no)?;
        leaf.insert(key)?;
        self.store_leaf_or_relocate(session, leaf, &path)
    }

    /// Entry deletion is not supported.
    pub fn delete_entry(&self, _session: &mut Session, _values: &[Value], _locator: FilePointer) -> StorageResult<()> {
        Err(StorageError::Unsupported("deleting index entries".to_string()))
    }

    fn make_key(&self, values: &[Value], locator: FilePointer) -> StorageResult<BTreeKey> {
        if values.len() != self.key_columns.len() {
            return Err(StorageError::TypeMismatch(format!(
                "index has {} columns, got {} values",
                self.key_columns.len(),
                values.len()
            )));
        }
        for (value, column_type) in values.iter().zip(&self.key_columns) {
            value.check_type(*column_type)?;
        }

        let mut key_values = values.to_vec();
        key_values.push(Value::FilePointer(locator));
        let key = BTreeKey::from_values(key_values, &self.key_schema)?;
        if key.size() > self.max_key_size() {
            return Err(StorageError::CapacityExceeded {
                required: key.size(),
                available: self.max_key_size(),
            });
        }
        Ok(key)
    }

    /// Page numbers from the root down to the leaf where `probe` belongs.
    pub(crate) fn navigate_to_leaf(&self, session: SessionId, root: u16, probe: &[Value]) -> StorageResult<Vec<u16>> {
        let mut path = vec![root];
        let mut page_no = root;
        loop {
            match self.load_node(session, page_no)? {
                Node::Leaf(_) => return Ok(path),
                Node::Inner(inner) => {
                    page_no = inner.child_for(probe);
                    path.push(page_no);
                    if path.len() > MAX_DEPTH {
                        return Err(StorageError::invariant(format!(
                            "index {} deeper than {} levels",
                            self.file.name(),
                            MAX_DEPTH
                        )));
                    }
                }
            }
        }
    }

    fn check_path(path: &[u16], page_no: u16) -> StorageResult<&[u16]> {
        match path.split_last() {
            Some((&last, parents)) if last == page_no => Ok(parents),
            _ => Err(StorageError::invariant(format!(
                "page path {:?} does not end at page {}",
                path, page_no
            ))),
        }
    }

    fn load_parent(&self, session: SessionId, parents: &[u16], child: u16) -> StorageResult<Option<(BTreeInnerPage, usize)>> {
        let Some(&parent_no) = parents.last() else {
            return Ok(None);
        };
        let parent = self.load_inner(session, parent_no)?;
        let idx = parent.pointer_index(child).ok_or_else(|| {
            StorageError::invariant(format!(
                "inner page {} has no pointer to page {}",
                parent_no, child
            ))
        })?;
        Ok(Some((parent, idx)))
    }

    /// Write a leaf that may have outgrown its page, relocating entries to a
    /// sibling or splitting it as needed. `path` ends at the leaf.
    fn store_leaf_or_relocate(&self, session: &mut Session, mut leaf: BTreeLeafPage, path: &[u16]) -> StorageResult<()> {
        let parents = Self::check_path(path, leaf.page_no())?;
        let page_size = self.page_size();
        if leaf.used_bytes() <= page_size {
            return self.store_leaf(session, &leaf);
        }

        if let Some((mut parent, idx)) = self.load_parent(session.id(), parents, leaf.page_no())? {
            if idx > 0 {
                let mut left = self.load_leaf(session.id(), parent.pointers()[idx - 1])?;
                if let Some(count) = leaf_count_to_left(&left, &leaf, page_size) {
                    left.append_entries(leaf.take_front(count));
                    self.store_leaf(session, &left)?;
                    self.store_leaf(session, &leaf)?;
                    let separator = first_key(&leaf)?;
                    parent.replace_key(idx - 1, separator)?;
                    debug!(
                        "Relocated {} entries from leaf {} to left sibling {}",
                        count,
                        leaf.page_no(),
                        left.page_no()
                    );
                    return self.store_inner_or_relocate(session, parent, parents);
                }
            }

            if idx + 1 < parent.pointers().len() {
                let mut right = self.load_leaf(session.id(), parent.pointers()[idx + 1])?;
                if let Some(count) = leaf_count_to_right(&leaf, &right, page_size) {
                    let at = leaf.len() - count;
                    right.prepend_entries(leaf.take_back(at));
                    self.store_leaf(session, &leaf)?;
                    self.store_leaf(session, &right)?;
                    let separator = first_key(&right)?;
                    parent.replace_key(idx, separator)?;
                    debug!(
                        "Relocated {} entries from leaf {} to right sibling {}",
                        count,
                        leaf.page_no(),
                        right.page_no()
                    );
                    return self.store_inner_or_relocate(session, parent, parents);
                }
            }
        }

        self.split_leaf(session, leaf, parents)
    }

    fn split_leaf(&self, session: &mut Session, mut leaf: BTreeLeafPage, parents: &[u16]) -> StorageResult<()> {
        let sizes: Vec<usize> = leaf.entries().iter().map(BTreeKey::size).collect();
        let page_size = self.page_size();
        let at = choose_split(1, leaf.len() - 1, leaf.len() / 2, |at| {
            let left: usize = sizes[..at].iter().sum();
            let right: usize = sizes[at..].iter().sum();
            LEAF_HEADER_SIZE + left <= page_size && LEAF_HEADER_SIZE + right <= page_size
        })
        .ok_or_else(|| StorageError::invariant(format!("no way to split leaf {}", leaf.page_no())))?;

        let new_no = self.get_new_data_page(session)?;
        let mut right = BTreeLeafPage::new(new_no);
        right.append_entries(leaf.take_back(at));
        right.set_next_leaf(leaf.next_leaf());
        leaf.set_next_leaf(new_no);
        self.store_leaf(session, &leaf)?;
        self.store_leaf(session, &right)?;
        debug!(
            "Split leaf {} into {} + {} entries, new leaf {}",
            leaf.page_no(),
            leaf.len(),
            right.len(),
            new_no
        );

        let separator = first_key(&right)?;
        self.insert_into_parent(session, leaf.page_no(), separator, new_no, parents)
    }

    /// Add `key` and `right` after `left` in the last page of `parents`, or
    /// grow a new root above `left` if there is no parent.
    fn insert_into_parent(
        &self,
        session: &mut Session,
        left: u16,
        key: BTreeKey,
        right: u16,
        parents: &[u16],
    ) -> StorageResult<()> {
        match parents.last() {
            None => {
                let root_no = self.get_new_data_page(session)?;
                let root = BTreeInnerPage::new_root(root_no, left, key, right);
                self.store_inner(session, &root)?;
                self.update_header(session, |h| h.set_root_page(root_no))?;
                info!("Index {} has a new root {}", self.file.name(), root_no);
                Ok(())
            }
            Some(&parent_no) => {
                let mut parent = self.load_inner(session.id(), parent_no)?;
                parent.insert_after(left, key, right)?;
                self.store_inner_or_relocate(session, parent, parents)
            }
        }
    }

    /// Write an inner page that may have outgrown its page. Same policy as
    /// for leaves, with separators rotating through the parent.
    fn store_inner_or_relocate(&self, session: &mut Session, mut inner: BTreeInnerPage, path: &[u16]) -> StorageResult<()> {
        let parents = Self::check_path(path, inner.page_no())?;
        let page_size = self.page_size();
        if inner.used_bytes() <= page_size {
            return self.store_inner(session, &inner);
        }

        if let Some((mut parent, idx)) = self.load_parent(session.id(), parents, inner.page_no())? {
            let max_count = inner.pointers().len().saturating_sub(2);

            if idx > 0 {
                let left = self.load_inner(session.id(), parent.pointers()[idx - 1])?;
                let separator = parent.keys()[idx - 1].clone();
                for count in 1..=max_count {
                    let mut new_left = left.clone();
                    let mut new_inner = inner.clone();
                    let new_sep = new_inner.shift_into_left(&mut new_left, separator.clone(), count);
                    if new_left.used_bytes() > page_size {
                        break;
                    }
                    if new_inner.used_bytes() <= page_size {
                        self.store_inner(session, &new_left)?;
                        self.store_inner(session, &new_inner)?;
                        parent.replace_key(idx - 1, new_sep)?;
                        debug!(
                            "Relocated {} pointers from inner page {} to left sibling {}",
                            count,
                            inner.page_no(),
                            left.page_no()
                        );
                        return self.store_inner_or_relocate(session, parent, parents);
                    }
                }
            }

            if idx + 1 < parent.pointers().len() {
                let right = self.load_inner(session.id(), parent.pointers()[idx + 1])?;
                let separator = parent.keys()[idx].clone();
                for count in 1..=max_count {
                    let mut new_right = right.clone();
                    let mut new_inner = inner.clone();
                    let new_sep = new_inner.shift_into_right(&mut new_right, separator.clone(), count);
                    if new_right.used_bytes() > page_size {
                        break;
                    }
                    if new_inner.used_bytes() <= page_size {
                        self.store_inner(session, &new_inner)?;
                        self.store_inner(session, &new_right)?;
                        parent.replace_key(idx, new_sep)?;
                        debug!(
                            "Relocated {} pointers from inner page {} to right sibling {}",
                            count,
                            inner.page_no(),
                            right.page_no()
                        );
                        return self.store_inner_or_relocate(session, parent, parents);
                    }
                }
            }
        }

        let num_pointers = inner.pointers().len();
        if num_pointers < 4 {
            return Err(StorageError::invariant(format!(
                "inner page {} overflows with only {} pointers",
                inner.page_no(),
                num_pointers
            )));
        }
        let key_sizes: Vec<usize> = inner.keys().iter().map(BTreeKey::size).collect();
        let at = choose_split(2, num_pointers - 2, num_pointers / 2, |at| {
            let left = INNER_HEADER_SIZE + at * POINTER_SIZE + key_sizes[..at - 1].iter().sum::<usize>();
            let right = INNER_HEADER_SIZE
                + (num_pointers - at) * POINTER_SIZE
                + key_sizes[at..].iter().sum::<usize>();
            left <= page_size && right <= page_size
        })
        .ok_or_else(|| StorageError::invariant(format!("no way to split inner page {}", inner.page_no())))?;

        let new_no = self.get_new_data_page(session)?;
        let (promoted, right_pointers, right_keys) = inner.split_at(at);
        let right = BTreeInnerPage::from_parts(new_no, right_pointers, right_keys)?;
        self.store_inner(session, &inner)?;
        self.store_inner(session, &right)?;
        debug!(
            "Split inner page {} into {} + {} pointers, new page {}",
            inner.page_no(),
            inner.pointers().len(),
            right.pointers().len(),
            new_no
        );
        self.insert_into_parent(session, inner.page_no(), promoted, new_no, parents)
    }

    // Lookup.

    /// Scan entries whose leading values equal `prefix`, in key order.
    pub fn scan<'a>(&'a self, session: &'a Session, prefix: &[Value]) -> IndexScanner<'a> {
        IndexScanner::new(self, session.id(), prefix.to_vec())
    }

    /// Locators of every entry whose leading values equal `prefix`.
    pub fn lookup(&self, session: &Session, prefix: &[Value]) -> StorageResult<Vec<FilePointer>> {
        self.scan(session, prefix)
            .map(|key| {
                let key = key?;
                key.locator()
                    .ok_or_else(|| StorageError::invariant("index key without a file pointer"))
            })
            .collect()
    }

    /// Every entry in key order.
    pub fn entries(&self, session: &Session) -> StorageResult<Vec<BTreeKey>> {
        self.scan(session, &[]).collect()
    }

    /// Number of levels, zero for an empty index.
    pub fn height(&self, session: &Session) -> StorageResult<usize> {
        let header = self.read_header(session.id())?;
        if header.root == 0 {
            return Ok(0);
        }
        Ok(self.navigate_to_leaf(session.id(), header.root, &[])?.len())
    }

    /// Remove every entry, returning all node pages to the free list.
    pub fn clear(&self, session: &mut Session) -> StorageResult<()> {
        let header = self.read_header(session.id())?;
        if header.root == 0 {
            return Ok(());
        }

        let mut pages = Vec::new();
        let mut queue = VecDeque::from([header.root]);
        while let Some(page_no) = queue.pop_front() {
            if let Node::Inner(inner) = self.load_node(session.id(), page_no)? {
                queue.extend(inner.pointers().iter().copied());
            }
            pages.push(page_no);
        }

        self.update_header(session, |h| {
            h.set_root_page(0);
            h.set_first_leaf_page(0);
        })?;
        for page_no in &pages {
            self.release_data_page(session, *page_no)?;
        }
        info!("Cleared index {} ({} pages freed)", self.file.name(), pages.len());
        Ok(())
    }
}

fn first_key(leaf: &BTreeLeafPage) -> StorageResult<BTreeKey> {
    leaf.first_key()
        .cloned()
        .ok_or_else(|| StorageError::invariant(format!("leaf {} is empty", leaf.page_no())))
}

/// Fewest leading entries of `leaf` to move into `left` so both fit.
fn leaf_count_to_left(left: &BTreeLeafPage, leaf: &BTreeLeafPage, page_size: usize) -> Option<usize> {
    let mut moved = 0;
    for (i, key) in leaf.entries().iter().enumerate().take(leaf.len().saturating_sub(1)) {
        moved += key.size();
        if left.used_bytes() + moved > page_size {
            return None;
        }
        if leaf.used_bytes() - moved <= page_size {
            return Some(i + 1);
        }
    }
    None
}

/// Fewest trailing entries of `leaf` to move into `right` so both fit.
fn leaf_count_to_right(leaf: &BTreeLeafPage, right: &BTreeLeafPage, page_size: usize) -> Option<usize> {
    let mut moved = 0;
    for (i, key) in leaf.entries().iter().rev().enumerate().take(leaf.len().saturating_sub(1)) {
        moved += key.size();
        if right.used_bytes() + moved > page_size {
            return None;
        }
        if leaf.used_bytes() - moved <= page_size {
            return Some(i + 1);
        }
    }
    None
}

/// Split point in `[min, max]` closest to `preferred` for which `fits` holds.
fn choose_split(min: usize, max: usize, preferred: usize, fits: impl Fn(usize) -> bool) -> Option<usize> {
    if min > max {
        return None;
    }
    let preferred = preferred.clamp(min, max);
    (0..=max - min)
        .flat_map(|d| [preferred.checked_sub(d), preferred.checked_add(d)])
        .flatten()
        .filter(|at| (min..=max).contains(at))
        .find(|&at| fits(at))
}
