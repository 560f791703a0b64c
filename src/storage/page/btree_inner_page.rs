//! Inner node of a B+-tree index.
//!
//! ```text
//! | type = 1 (1) | num pointers (2) | p0 (2) | k0 | p1 (2) | k1 | ... | pN (2) |
//! ```
//!
//! Every key reachable through `p[i]` is less than `k[i]`, and every key
//! reachable through `p[i + 1]` is greater than or equal to it.

use std::cmp::Ordering;

use byteorder::{ByteOrder, LittleEndian};

use crate::access::btree::key::BTreeKey;
use crate::access::value::{ColumnType, Value};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::btree_header_page::BTreePageType;

const NUM_POINTERS_OFFSET: usize = 1;
pub const INNER_HEADER_SIZE: usize = 3;
pub const POINTER_SIZE: usize = 2;

#[derive(Debug, Clone)]
pub struct BTreeInnerPage {
    page_no: u16,
    pointers: Vec<u16>,
    keys: Vec<BTreeKey>,
}

impl BTreeInnerPage {
    /// A new root with two children separated by `key`.
    pub fn new_root(page_no: u16, left: u16, key: BTreeKey, right: u16) -> Self {
        Self {
            page_no,
            pointers: vec![left, right],
            keys: vec![key],
        }
    }

    pub fn from_parts(page_no: u16, pointers: Vec<u16>, keys: Vec<BTreeKey>) -> StorageResult<Self> {
        if pointers.len() != keys.len() + 1 {
            return Err(StorageError::invariant(format!(
                "inner page {} built with {} pointers and {} keys",
                page_no,
                pointers.len(),
                keys.len()
            )));
        }
        Ok(Self {
            page_no,
            pointers,
            keys,
        })
    }

    pub fn load(page_no: u16, data: &[u8], schema: &[ColumnType]) -> StorageResult<Self> {
        if BTreePageType::of_page(data)? != BTreePageType::Inner {
            return Err(StorageError::invariant(format!(
                "index page {} is not an inner page",
                page_no
            )));
        }
        let num_pointers =
            LittleEndian::read_u16(&data[NUM_POINTERS_OFFSET..NUM_POINTERS_OFFSET + 2]) as usize;
        if num_pointers < 2 {
            return Err(StorageError::invariant(format!(
                "inner page {} has {} pointers",
                page_no, num_pointers
            )));
        }

        let mut pointers = Vec::with_capacity(num_pointers);
        let mut keys = Vec::with_capacity(num_pointers - 1);
        let mut offset = INNER_HEADER_SIZE;
        for i in 0..num_pointers {
            if offset + POINTER_SIZE > data.len() {
                return Err(StorageError::invariant(format!(
                    "inner page {} runs past the end of the page",
                    page_no
                )));
            }
            pointers.push(LittleEndian::read_u16(&data[offset..offset + POINTER_SIZE]));
            offset += POINTER_SIZE;
            if i + 1 < num_pointers {
                let key = BTreeKey::decode(data, offset, schema)?;
                offset += key.size();
                keys.push(key);
            }
        }
        Ok(Self {
            page_no,
            pointers,
            keys,
        })
    }

    pub fn store(&self, data: &mut [u8]) -> StorageResult<()> {
        let used = self.used_bytes();
        if used > data.len() {
            return Err(StorageError::CapacityExceeded {
                required: used,
                available: data.len(),
            });
        }
        data[0] = BTreePageType::Inner as u8;
        LittleEndian::write_u16(
            &mut data[NUM_POINTERS_OFFSET..NUM_POINTERS_OFFSET + 2],
            self.pointers.len() as u16,
        );
        let mut offset = INNER_HEADER_SIZE;
        for (i, pointer) in self.pointers.iter().enumerate() {
            LittleEndian::write_u16(&mut data[offset..offset + POINTER_SIZE], *pointer);
            offset += POINTER_SIZE;
            if let Some(key) = self.keys.get(i) {
                data[offset..offset + key.size()].copy_from_slice(key.data());
                offset += key.size();
            }
        }
        data[offset..].fill(0);
        Ok(())
    }

    pub fn page_no(&self) -> u16 {
        self.page_no
    }

    pub fn pointers(&self) -> &[u16] {
        &self.pointers
    }

    pub fn keys(&self) -> &[BTreeKey] {
        &self.keys
    }

    pub fn used_bytes(&self) -> usize {
        INNER_HEADER_SIZE
            + self.pointers.len() * POINTER_SIZE
            + self.keys.iter().map(BTreeKey::size).sum::<usize>()
    }

    /// Index of `child` among the pointers.
    pub fn pointer_index(&self, child: u16) -> Option<usize> {
        self.pointers.iter().position(|&p| p == child)
    }

    /// Child to follow for `probe`: the pointer before the first key greater
    /// than the probe, the one after a key equal to it, or the last pointer.
    pub fn child_for(&self, probe: &[Value]) -> u16 {
        for (i, key) in self.keys.iter().enumerate() {
            match key.compare_to(probe) {
                Ordering::Greater => return self.pointers[i],
                Ordering::Equal => return self.pointers[i + 1],
                Ordering::Less => {}
            }
        }
        self.pointers[self.pointers.len() - 1]
    }

    /// Insert `key` and `right` immediately after the existing pointer `left`.
    pub fn insert_after(&mut self, left: u16, key: BTreeKey, right: u16) -> StorageResult<()> {
        let idx = self.pointer_index(left).ok_or_else(|| {
            StorageError::invariant(format!(
                "inner page {} has no pointer to page {}",
                self.page_no, left
            ))
        })?;
        self.keys.insert(idx, key);
        self.pointers.insert(idx + 1, right);
        Ok(())
    }

    pub fn replace_key(&mut self, idx: usize, key: BTreeKey) -> StorageResult<()> {
        match self.keys.get_mut(idx) {
            Some(slot) => {
                *slot = key;
                Ok(())
            }
            None => Err(StorageError::invariant(format!(
                "inner page {} has no key {}",
                self.page_no, idx
            ))),
        }
    }

    /// Split off everything from pointer `at` onward. Returns the promoted
    /// key `k[at - 1]` plus the pointers and keys of the new right node.
    pub fn split_at(&mut self, at: usize) -> (BTreeKey, Vec<u16>, Vec<BTreeKey>) {
        let right_pointers = self.pointers.split_off(at);
        let mut tail = self.keys.split_off(at - 1);
        let promoted = tail.remove(0);
        (promoted, right_pointers, tail)
    }

    /// Move the first `count` pointers into `left`, pulling the parent's
    /// separator `sep` down. Returns the new separator.
    pub fn shift_into_left(&mut self, left: &mut BTreeInnerPage, sep: BTreeKey, count: usize) -> BTreeKey {
        let moved_pointers: Vec<u16> = self.pointers.drain(..count).collect();
        let mut moved_keys: Vec<BTreeKey> = self.keys.drain(..count).collect();
        let new_sep = moved_keys.remove(count - 1);

        left.keys.push(sep);
        left.keys.extend(moved_keys);
        left.pointers.extend(moved_pointers);
        new_sep
    }

    /// Move the last `count` pointers into `right`, pulling the parent's
    /// separator `sep` down. Returns the new separator.
    pub fn shift_into_right(&mut self, right: &mut BTreeInnerPage, sep: BTreeKey, count: usize) -> BTreeKey {
        let at = self.pointers.len() - count;
        let mut moved_pointers = self.pointers.split_off(at);
        let mut moved_keys = self.keys.split_off(at - 1);
        let new_sep = moved_keys.remove(0);

        moved_keys.push(sep);
        moved_keys.append(&mut right.keys);
        moved_pointers.append(&mut right.pointers);
        right.keys = moved_keys;
        right.pointers = moved_pointers;
        new_sep
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::tuple::FilePointer;

    fn schema() -> Vec<ColumnType> {
        vec![ColumnType::Integer, ColumnType::FilePointer]
    }

    fn key(v: i32) -> BTreeKey {
        BTreeKey::from_values(
            vec![Value::Integer(v), Value::FilePointer(FilePointer::new(1, 2))],
            &schema(),
        )
        .unwrap()
    }

    fn node(page_no: u16, first: u16, keys: &[i32]) -> BTreeInnerPage {
        let pointers = (0..=keys.len() as u16).map(|i| first + i).collect();
        BTreeInnerPage::from_parts(page_no, pointers, keys.iter().map(|&k| key(k)).collect()).unwrap()
    }

    #[test]
    fn test_navigation() {
        let inner = node(1, 10, &[10, 20]);
        let fp = Value::FilePointer(FilePointer::new(1, 2));
        assert_eq!(inner.child_for(&[Value::Integer(5), fp.clone()]), 10);
        assert_eq!(inner.child_for(&[Value::Integer(10), fp.clone()]), 11);
        assert_eq!(inner.child_for(&[Value::Integer(15), fp.clone()]), 11);
        assert_eq!(inner.child_for(&[Value::Integer(25), fp]), 12);
        assert_eq!(inner.child_for(&[Value::Integer(10)]), 10);
    }

    #[test]
    fn test_store_and_load() -> StorageResult<()> {
        let inner = node(3, 4, &[1, 2, 3]);
        let mut buf = vec![0xEEu8; 512];
        inner.store(&mut buf)?;
        assert_eq!(&buf[0..3], &[1, 4, 0]);

        let loaded = BTreeInnerPage::load(3, &buf, &schema())?;
        assert_eq!(loaded.pointers(), &[4, 5, 6, 7]);
        assert_eq!(loaded.keys().len(), 3);
        assert_eq!(loaded.keys()[2], key(3));
        assert_eq!(loaded.used_bytes(), INNER_HEADER_SIZE + 4 * 2 + 3 * 9);
        Ok(())
    }

    #[test]
    fn test_insert_after() -> StorageResult<()> {
        let mut inner = node(1, 10, &[10, 30]);
        inner.insert_after(11, key(20), 99)?;
        assert_eq!(inner.pointers(), &[10, 11, 99, 12]);
        assert_eq!(inner.keys()[1], key(20));
        assert!(inner.insert_after(42, key(50), 100).is_err());
        Ok(())
    }

    #[test]
    fn test_split_at() {
        let mut inner = node(1, 10, &[1, 2, 3, 4]);
        let (promoted, pointers, keys) = inner.split_at(2);
        assert_eq!(promoted, key(2));
        assert_eq!(inner.pointers(), &[10, 11]);
        assert_eq!(inner.keys(), &[key(1)]);
        assert_eq!(pointers, vec![12, 13, 14]);
        assert_eq!(keys, vec![key(3), key(4)]);
    }

    #[test]
    fn test_shift_into_left() {
        let mut left = node(1, 10, &[1]);
        let mut right = node(2, 20, &[10, 11, 12]);
        let new_sep = right.shift_into_left(&mut left, key(5), 2);
        assert_eq!(new_sep, key(11));
        assert_eq!(left.pointers(), &[10, 11, 20, 21]);
        assert_eq!(left.keys(), &[key(1), key(5), key(10)]);
        assert_eq!(right.pointers(), &[22, 23]);
        assert_eq!(right.keys(), &[key(12)]);
    }

    #[test]
    fn test_shift_into_right() {
        let mut left = node(1, 10, &[1, 2, 3]);
        let mut right = node(2, 20, &[10]);
        let new_sep = left.shift_into_right(&mut right, key(5), 2);
        assert_eq!(new_sep, key(2));
        assert_eq!(left.pointers(), &[10, 11]);
        assert_eq!(left.keys(), &[key(1)]);
        assert_eq!(right.pointers(), &[12, 13, 20, 21]);
        assert_eq!(right.keys(), &[key(3), key(5), key(10)]);
    }
}
