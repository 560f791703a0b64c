//! Leaf node of a B+-tree index.
//!
//! ```text
//! | type = 2 (1) | next leaf (2) | num entries (2) | key 0 | key 1 | ... |
//! ```
//!
//! Keys are packed back to back in ascending order; each one is a tuple of
//! the indexed values plus a file pointer. The node is decoded into memory,
//! modified there and written back whole.

use std::cmp::Ordering;

use byteorder::{ByteOrder, LittleEndian};

use crate::access::btree::key::BTreeKey;
use crate::access::value::{ColumnType, Value};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::btree_header_page::BTreePageType;

const NEXT_LEAF_OFFSET: usize = 1;
const NUM_ENTRIES_OFFSET: usize = 3;
pub const LEAF_HEADER_SIZE: usize = 5;

#[derive(Debug, Clone)]
pub struct BTreeLeafPage {
    page_no: u16,
    next_leaf: u16,
    entries: Vec<BTreeKey>,
}

impl BTreeLeafPage {
    pub fn new(page_no: u16) -> Self {
        Self {
            page_no,
            next_leaf: 0,
            entries: Vec::new(),
        }
    }

    /// Decode a leaf from page bytes; `schema` includes the file pointer.
    pub fn load(page_no: u16, data: &[u8], schema: &[ColumnType]) -> StorageResult<Self> {
        if BTreePageType::of_page(data)? != BTreePageType::Leaf {
            return Err(StorageError::invariant(format!(
                "index page {} is not a leaf",
                page_no
            )));
        }
        let next_leaf = LittleEndian::read_u16(&data[NEXT_LEAF_OFFSET..NEXT_LEAF_OFFSET + 2]);
        let num_entries =
            LittleEndian::read_u16(&data[NUM_ENTRIES_OFFSET..NUM_ENTRIES_OFFSET + 2]) as usize;

        let mut entries = Vec::with_capacity(num_entries);
        let mut offset = LEAF_HEADER_SIZE;
        for _ in 0..num_entries {
            let key = BTreeKey::decode(data, offset, schema)?;
            offset += key.size();
            entries.push(key);
        }
        Ok(Self {
            page_no,
            next_leaf,
            entries,
        })
    }

    /// Encode into page bytes, zeroing whatever follows the last key.
    pub fn store(&self, data: &mut [u8]) -> StorageResult<()> {
        let used = self.used_bytes();
        if used > data.len() {
            return Err(StorageError::CapacityExceeded {
                required: used,
                available: data.len(),
            });
        }
        data[0] = BTreePageType::Leaf as u8;
        LittleEndian::write_u16(&mut data[NEXT_LEAF_OFFSET..NEXT_LEAF_OFFSET + 2], self.next_leaf);
        LittleEndian::write_u16(
            &mut data[NUM_ENTRIES_OFFSET..NUM_ENTRIES_OFFSET + 2],
            self.entries.len() as u16,
        );
        let mut offset = LEAF_HEADER_SIZE;
        for key in &self.entries {
            data[offset..offset + key.size()].copy_from_slice(key.data());
            offset += key.size();
        }
        data[offset..].fill(0);
        Ok(())
    }

    pub fn page_no(&self) -> u16 {
        self.page_no
    }

    pub fn next_leaf(&self) -> u16 {
        self.next_leaf
    }

    pub fn set_next_leaf(&mut self, page_no: u16) {
        self.next_leaf = page_no;
    }

    pub fn entries(&self) -> &[BTreeKey] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first_key(&self) -> Option<&BTreeKey> {
        self.entries.first()
    }

    pub fn used_bytes(&self) -> usize {
        LEAF_HEADER_SIZE + self.entries.iter().map(BTreeKey::size).sum::<usize>()
    }

    /// Insert a key in order. Equal keys are rejected.
    pub fn insert(&mut self, key: BTreeKey) -> StorageResult<usize> {
        match self.entries.binary_search_by(|e| e.compare(&key)) {
            Ok(_) => Err(StorageError::invariant(format!(
                "duplicate index entry {:?} in leaf {}",
                key.values(),
                self.page_no
            ))),
            Err(pos) => {
                self.entries.insert(pos, key);
                Ok(pos)
            }
        }
    }

    /// Index of the first entry not less than `probe`.
    pub fn lower_bound(&self, probe: &[Value]) -> usize {
        self.entries
            .partition_point(|e| e.compare_to(probe) == Ordering::Less)
    }

    /// Remove and return the first `count` entries.
    pub fn take_front(&mut self, count: usize) -> Vec<BTreeKey> {
        self.entries.drain(..count).collect()
    }

    /// Remove and return entries from `at` onward.
    pub fn take_back(&mut self, at: usize) -> Vec<BTreeKey> {
        self.entries.split_off(at)
    }

    pub fn append_entries(&mut self, entries: Vec<BTreeKey>) {
        self.entries.extend(entries);
    }

    pub fn prepend_entries(&mut self, mut entries: Vec<BTreeKey>) {
        entries.append(&mut self.entries);
        self.entries = entries;
    }
}
