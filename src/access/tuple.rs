//! Tuple identity and the on-page tuple format.
//!
//! ```text
//! | null bitmap (ceil(n/8)) | value of each non-null column ... |
//! ```
//!
//! Bit `i` of the bitmap (byte `i / 8`, bit `i % 8`) is set when column `i`
//! is null. Null columns occupy no bytes after the bitmap.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::access::value::{ColumnType, Value, read_value, stored_size_at, write_value};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::SlottedPage;

/// Location of a tuple: page number plus the offset of its slot entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilePointer {
    pub page_no: u16,
    pub offset: u16,
}

impl FilePointer {
    pub fn new(page_no: u16, offset: u16) -> Self {
        Self { page_no, offset }
    }
}

impl PartialOrd for FilePointer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FilePointer {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.page_no.cmp(&other.page_no) {
            Ordering::Equal => self.offset.cmp(&other.offset),
            other => other,
        }
    }
}

impl fmt::Display for FilePointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FP[{}:{}]", self.page_no, self.offset)
    }
}

/// A decoded row together with its location.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    pub locator: FilePointer,
    pub values: Vec<Value>,
}

impl Tuple {
    pub fn new(locator: FilePointer, values: Vec<Value>) -> Self {
        Self { locator, values }
    }

    pub fn get(&self, column: usize) -> Option<&Value> {
        self.values.get(column)
    }
}

/// Whether a page tuple may change size in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TupleStorage {
    /// Lives in a slotted page; resizing shifts the page's tuple data.
    Resizable,
    /// Lives in a buffer without slot bookkeeping, such as an index node.
    Fixed,
}

/// Size of the null bitmap for `num_columns` columns.
pub fn null_bitmap_size(num_columns: usize) -> usize {
    num_columns.div_ceil(8)
}

/// Bytes needed to store `values` with the given column types.
pub fn tuple_storage_size(column_types: &[ColumnType], values: &[Value]) -> usize {
    null_bitmap_size(column_types.len())
        + values
            .iter()
            .zip(column_types)
            .map(|(v, t)| v.storage_size(*t))
            .sum::<usize>()
}

/// Serialize values into the tuple format.
pub fn encode_tuple(column_types: &[ColumnType], values: &[Value]) -> StorageResult<Vec<u8>> {
    if values.len() != column_types.len() {
        return Err(StorageError::TypeMismatch(format!(
            "value count {} doesn't match column count {}",
            values.len(),
            column_types.len()
        )));
    }

    let mut data = vec![0u8; tuple_storage_size(column_types, values)];
    let mut offset = null_bitmap_size(column_types.len());
    for (i, (value, column_type)) in values.iter().zip(column_types).enumerate() {
        if value.is_null() {
            data[i / 8] |= 1 << (i % 8);
        } else {
            write_value(&mut data, offset, *column_type, value)?;
            offset += value.storage_size(*column_type);
        }
    }
    Ok(data)
}

/// Where each column's bytes start (or would start, if null) and where the
/// tuple ends.
struct TupleLayout {
    positions: Vec<usize>,
    nulls: Vec<bool>,
    end: usize,
}

/// A view of one tuple stored in a byte buffer, usually a page.
pub struct PageTuple<'t, D> {
    data: D,
    start: usize,
    column_types: &'t [ColumnType],
    storage: TupleStorage,
}

impl<'t, D: AsRef<[u8]>> PageTuple<'t, D> {
    pub fn new(data: D, start: usize, column_types: &'t [ColumnType], storage: TupleStorage) -> Self {
        Self {
            data,
            start,
            column_types,
            storage,
        }
    }

    /// Offset of the tuple's first byte; moves when a resizable tuple grows
    /// or shrinks.
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn num_columns(&self) -> usize {
        self.column_types.len()
    }

    fn check_column(&self, column: usize) -> StorageResult<()> {
        if column >= self.column_types.len() {
            return Err(StorageError::Schema(format!(
                "column index {} out of range for {} columns",
                column,
                self.column_types.len()
            )));
        }
        Ok(())
    }

    pub fn is_null(&self, column: usize) -> StorageResult<bool> {
        self.check_column(column)?;
        let data = self.data.as_ref();
        let byte = self.start + column / 8;
        if byte >= data.len() {
            return Err(StorageError::invariant("null bitmap runs past the end of the buffer"));
        }
        Ok(data[byte] & (1 << (column % 8)) != 0)
    }

    fn layout(&self) -> StorageResult<TupleLayout> {
        let data = self.data.as_ref();
        let mut positions = Vec::with_capacity(self.column_types.len());
        let mut nulls = Vec::with_capacity(self.column_types.len());
        let mut pos = self.start + null_bitmap_size(self.column_types.len());
        if pos > data.len() {
            return Err(StorageError::invariant("null bitmap runs past the end of the buffer"));
        }
        for (column, column_type) in self.column_types.iter().enumerate() {
            let null = self.is_null(column)?;
            positions.push(pos);
            nulls.push(null);
            if !null {
                pos += stored_size_at(data, pos, *column_type)?;
            }
        }
        Ok(TupleLayout {
            positions,
            nulls,
            end: pos,
        })
    }

    /// Total stored size, bitmap included.
    pub fn size(&self) -> StorageResult<usize> {
        Ok(self.layout()?.end - self.start)
    }

    pub fn get_value(&self, column: usize) -> StorageResult<Value> {
        self.check_column(column)?;
        let layout = self.layout()?;
        if layout.nulls[column] {
            return Ok(Value::Null);
        }
        read_value(self.data.as_ref(), layout.positions[column], self.column_types[column])
    }

    pub fn values(&self) -> StorageResult<Vec<Value>> {
        let layout = self.layout()?;
        let data = self.data.as_ref();
        self.column_types
            .iter()
            .enumerate()
            .map(|(i, t)| {
                if layout.nulls[i] {
                    Ok(Value::Null)
                } else {
                    read_value(data, layout.positions[i], *t)
                }
            })
            .collect()
    }
}

impl<'t, D: AsRef<[u8]> + AsMut<[u8]>> PageTuple<'t, D> {
    pub fn set_null(&mut self, column: usize) -> StorageResult<()> {
        self.set_value(column, &Value::Null)
    }

    /// Overwrite one column. A value of a different stored size resizes the
    /// tuple in place, which only resizable tuples allow.
    pub fn set_value(&mut self, column: usize, value: &Value) -> StorageResult<()> {
        self.check_column(column)?;
        let column_type = self.column_types[column];
        value.check_type(column_type)?;

        let layout = self.layout()?;
        let mut pos = layout.positions[column];
        let old_size = if layout.nulls[column] {
            0
        } else {
            stored_size_at(self.data.as_ref(), pos, column_type)?
        };
        let new_size = value.storage_size(column_type);

        if new_size != old_size {
            if self.storage == TupleStorage::Fixed {
                return Err(StorageError::Unsupported(
                    "resizing a value in a fixed-size tuple".to_string(),
                ));
            }
            let mut page = SlottedPage::from_data(self.data.as_mut());
            if new_size > old_size {
                let delta = new_size - old_size;
                page.insert_tuple_data_range(pos, delta)?;
                self.start -= delta;
                pos -= delta;
            } else {
                let delta = old_size - new_size;
                page.delete_tuple_data_range(pos, delta)?;
                self.start += delta;
                pos += delta;
            }
        }

        let data = self.data.as_mut();
        let bitmap_byte = self.start + column / 8;
        let mask = 1u8 << (column % 8);
        if value.is_null() {
            data[bitmap_byte] |= mask;
        } else {
            data[bitmap_byte] &= !mask;
            write_value(data, pos, column_type, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Vec<ColumnType> {
        vec![ColumnType::Integer, ColumnType::Varchar(20), ColumnType::SmallInt]
    }

    #[test]
    fn test_file_pointer_ordering() {
        let a = FilePointer::new(1, 5);
        let b = FilePointer::new(1, 10);
        let c = FilePointer::new(2, 3);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(format!("{}", a), "FP[1:5]");
    }

    #[test]
    fn test_encode_layout() -> StorageResult<()> {
        let types = schema();
        let values = vec![Value::Integer(7), Value::Null, Value::SmallInt(-1)];
        let data = encode_tuple(&types, &values)?;
        assert_eq!(data.len(), 1 + 4 + 2);
        assert_eq!(data[0], 0b010);
        assert_eq!(&data[1..5], &7i32.to_le_bytes());

        let tuple = PageTuple::new(&data[..], 0, &types, TupleStorage::Fixed);
        assert_eq!(tuple.values()?, values);
        assert_eq!(tuple.size()?, 7);
        assert!(tuple.is_null(1)?);
        Ok(())
    }

    #[test]
    fn test_encode_wrong_arity() {
        let types = schema();
        assert!(matches!(
            encode_tuple(&types, &[Value::Integer(1)]),
            Err(StorageError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_fixed_tuple_same_size_update() -> StorageResult<()> {
        let types = schema();
        let mut data = encode_tuple(&types, &[Value::Integer(1), Value::String("ab".into()), Value::SmallInt(3)])?;
        let mut tuple = PageTuple::new(&mut data[..], 0, &types, TupleStorage::Fixed);

        tuple.set_value(0, &Value::Integer(99))?;
        tuple.set_value(1, &Value::String("cd".into()))?;
        assert_eq!(tuple.get_value(0)?, Value::Integer(99));
        assert_eq!(tuple.get_value(1)?, Value::String("cd".into()));

        let result = tuple.set_value(1, &Value::String("longer".into()));
        assert!(matches!(result, Err(StorageError::Unsupported(_))));
        let result = tuple.set_null(0);
        assert!(matches!(result, Err(StorageError::Unsupported(_))));
        Ok(())
    }

    #[test]
    fn test_resizable_tuple_in_slotted_page() -> StorageResult<()> {
        let types = schema();
        let mut page_data = vec![0u8; 512];
        let mut page = SlottedPage::from_data(&mut page_data[..]);

        let other = encode_tuple(&types, &[Value::Integer(5), Value::String("zz".into()), Value::Null])?;
        let slot0 = page.allocate_tuple(other.len())?;
        let start0 = page.tuple_start(slot0)?;
        let mine = encode_tuple(&types, &[Value::Integer(1), Value::String("ab".into()), Value::SmallInt(2)])?;
        let slot1 = page.allocate_tuple(mine.len())?;
        let start1 = page.tuple_start(slot1)?;
        drop(page);
        page_data[start0..start0 + other.len()].copy_from_slice(&other);
        page_data[start1..start1 + mine.len()].copy_from_slice(&mine);

        {
            let mut tuple = PageTuple::new(&mut page_data[..], start1, &types, TupleStorage::Resizable);
            tuple.set_value(1, &Value::String("a much longer value".into()))?;
            tuple.set_null(2)?;
            tuple.set_value(0, &Value::Null)?;
        }

        let page = SlottedPage::from_data(&page_data[..]);
        assert!(page.check_slot_order());
        let start1 = page.tuple_start(slot1)?;
        let len1 = page.tuple_length(slot1)?;
        let tuple = PageTuple::new(&page_data[..], start1, &types, TupleStorage::Fixed);
        assert_eq!(
            tuple.values()?,
            vec![Value::Null, Value::String("a much longer value".into()), Value::Null]
        );
        assert_eq!(tuple.size()?, len1);

        let start0 = page.tuple_start(slot0)?;
        let tuple = PageTuple::new(&page_data[..], start0, &types, TupleStorage::Fixed);
        assert_eq!(
            tuple.values()?,
            vec![Value::Integer(5), Value::String("zz".into()), Value::Null]
        );
        Ok(())
    }
}
