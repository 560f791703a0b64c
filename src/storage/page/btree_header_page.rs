//! Page 0 of a B+-tree index file.
//!
//! ```text
//! | kind (1) | page size (1) | root (2) | first leaf (2) | first free (2) |
//! | key schema length (2) | key schema (bincode) ... |
//! ```
//!
//! A page number of 0 means "none": page 0 is always this header.

use byteorder::{ByteOrder, LittleEndian};

use crate::access::value::ColumnType;
use crate::storage::error::{StorageError, StorageResult};

const ROOT_PAGE_OFFSET: usize = 2;
const FIRST_LEAF_PAGE_OFFSET: usize = 4;
const FIRST_FREE_PAGE_OFFSET: usize = 6;
const KEY_SCHEMA_LENGTH_OFFSET: usize = 8;
const KEY_SCHEMA_OFFSET: usize = 10;

/// Offset of the next-free pointer inside a free page.
const FREE_NEXT_PAGE_OFFSET: usize = 1;

/// Tag in byte 0 of every non-header index page.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BTreePageType {
    Inner = 1,
    Leaf = 2,
    Free = 3,
}

impl BTreePageType {
    pub fn from_u8(tag: u8) -> StorageResult<Self> {
        match tag {
            1 => Ok(BTreePageType::Inner),
            2 => Ok(BTreePageType::Leaf),
            3 => Ok(BTreePageType::Free),
            other => Err(StorageError::invariant(format!(
                "unknown index page type {}",
                other
            ))),
        }
    }

    pub fn of_page(data: &[u8]) -> StorageResult<Self> {
        Self::from_u8(data[0])
    }
}

/// Next page on the free list, read from a free page.
pub fn free_page_next(data: &[u8]) -> StorageResult<u16> {
    if BTreePageType::of_page(data)? != BTreePageType::Free {
        return Err(StorageError::invariant("page on the free list is not marked free"));
    }
    Ok(LittleEndian::read_u16(
        &data[FREE_NEXT_PAGE_OFFSET..FREE_NEXT_PAGE_OFFSET + 2],
    ))
}

/// Turn a page into a free page pointing at `next`.
pub fn init_free_page(data: &mut [u8], next: u16, zero_body: bool) {
    if zero_body {
        data.fill(0);
    }
    data[0] = BTreePageType::Free as u8;
    LittleEndian::write_u16(&mut data[FREE_NEXT_PAGE_OFFSET..FREE_NEXT_PAGE_OFFSET + 2], next);
}

pub struct BTreeHeaderPage<D> {
    data: D,
}

impl<D: AsRef<[u8]>> BTreeHeaderPage<D> {
    pub fn from_data(data: D) -> Self {
        Self { data }
    }

    fn read_u16(&self, offset: usize) -> u16 {
        LittleEndian::read_u16(&self.data.as_ref()[offset..offset + 2])
    }

    pub fn root_page(&self) -> u16 {
        self.read_u16(ROOT_PAGE_OFFSET)
    }

    pub fn first_leaf_page(&self) -> u16 {
        self.read_u16(FIRST_LEAF_PAGE_OFFSET)
    }

    pub fn first_free_page(&self) -> u16 {
        self.read_u16(FIRST_FREE_PAGE_OFFSET)
    }

    /// Types of the indexed columns, not counting the file pointer.
    pub fn key_schema(&self) -> StorageResult<Vec<ColumnType>> {
        let len = self.read_u16(KEY_SCHEMA_LENGTH_OFFSET) as usize;
        let data = self.data.as_ref();
        if KEY_SCHEMA_OFFSET + len > data.len() {
            return Err(StorageError::invariant("index key schema runs past the header page"));
        }
        Ok(bincode::deserialize(&data[KEY_SCHEMA_OFFSET..KEY_SCHEMA_OFFSET + len])?)
    }
}

impl<D: AsRef<[u8]> + AsMut<[u8]>> BTreeHeaderPage<D> {
    fn write_u16(&mut self, offset: usize, value: u16) {
        LittleEndian::write_u16(&mut self.data.as_mut()[offset..offset + 2], value);
    }

    pub fn set_root_page(&mut self, page_no: u16) {
        self.write_u16(ROOT_PAGE_OFFSET, page_no);
    }

    pub fn set_first_leaf_page(&mut self, page_no: u16) {
        self.write_u16(FIRST_LEAF_PAGE_OFFSET, page_no);
    }

    pub fn set_first_free_page(&mut self, page_no: u16) {
        self.write_u16(FIRST_FREE_PAGE_OFFSET, page_no);
    }

    pub fn set_key_schema(&mut self, schema: &[ColumnType]) -> StorageResult<()> {
        let bytes = bincode::serialize(schema)?;
        let available = self.data.as_ref().len() - KEY_SCHEMA_OFFSET;
        if bytes.len() > available {
            return Err(StorageError::CapacityExceeded {
                required: bytes.len(),
                available,
            });
        }
        self.write_u16(KEY_SCHEMA_LENGTH_OFFSET, bytes.len() as u16);
        self.data.as_mut()[KEY_SCHEMA_OFFSET..KEY_SCHEMA_OFFSET + bytes.len()]
            .copy_from_slice(&bytes);
        Ok(())
    }
}
