use std::cmp::Ordering;
use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::access::tuple::FilePointer;
use crate::storage::error::{StorageError, StorageResult};

/// Column types supported by the record layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Double,
    /// Fixed-width string, zero padded to the given number of bytes.
    Char(u16),
    /// Variable-width string of at most the given number of bytes.
    Varchar(u16),
    FilePointer,
}

impl ColumnType {
    /// Stored width of a non-null value, or `None` for variable-width types.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            ColumnType::TinyInt => Some(1),
            ColumnType::SmallInt => Some(2),
            ColumnType::Integer => Some(4),
            ColumnType::BigInt => Some(8),
            ColumnType::Float => Some(4),
            ColumnType::Double => Some(8),
            ColumnType::Char(len) => Some(*len as usize),
            ColumnType::Varchar(_) => None,
            ColumnType::FilePointer => Some(4),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::TinyInt => write!(f, "TINYINT"),
            ColumnType::SmallInt => write!(f, "SMALLINT"),
            ColumnType::Integer => write!(f, "INTEGER"),
            ColumnType::BigInt => write!(f, "BIGINT"),
            ColumnType::Float => write!(f, "FLOAT"),
            ColumnType::Double => write!(f, "DOUBLE"),
            ColumnType::Char(len) => write!(f, "CHAR({})", len),
            ColumnType::Varchar(len) => write!(f, "VARCHAR({})", len),
            ColumnType::FilePointer => write!(f, "FILE_POINTER"),
        }
    }
}

/// A column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    TinyInt(i8),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    String(String),
    FilePointer(FilePointer),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value can be stored in a column of the given type.
    pub fn is_compatible_with(&self, column_type: ColumnType) -> bool {
        match (self, column_type) {
            (Value::Null, _) => true,
            (Value::TinyInt(_), ColumnType::TinyInt) => true,
            (Value::SmallInt(_), ColumnType::SmallInt) => true,
            (Value::Integer(_), ColumnType::Integer) => true,
            (Value::BigInt(_), ColumnType::BigInt) => true,
            (Value::Float(_), ColumnType::Float) => true,
            (Value::Double(_), ColumnType::Double) => true,
            (Value::String(s), ColumnType::Char(len) | ColumnType::Varchar(len)) => {
                s.len() <= len as usize
            }
            (Value::FilePointer(_), ColumnType::FilePointer) => true,
            _ => false,
        }
    }

    pub fn check_type(&self, column_type: ColumnType) -> StorageResult<()> {
        if !self.is_compatible_with(column_type) {
            return Err(StorageError::TypeMismatch(format!(
                "value {} cannot be stored as {}",
                self, column_type
            )));
        }
        Ok(())
    }

    /// Bytes this value occupies when stored as `column_type`; nulls take none.
    pub fn storage_size(&self, column_type: ColumnType) -> usize {
        match (self, column_type) {
            (Value::Null, _) => 0,
            (Value::String(s), ColumnType::Varchar(_)) => 2 + s.len(),
            _ => column_type.fixed_size().unwrap_or(0),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::TinyInt(_)
            | Value::SmallInt(_)
            | Value::Integer(_)
            | Value::BigInt(_)
            | Value::Float(_)
            | Value::Double(_) => 1,
            Value::String(_) => 2,
            Value::FilePointer(_) => 3,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Value::TinyInt(v) => Some(*v as i64),
            Value::SmallInt(v) => Some(*v as i64),
            Value::Integer(v) => Some(*v as i64),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Total order used by index keys. Nulls sort first.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::FilePointer(a), Value::FilePointer(b)) => a.cmp(b),
            (a, b) if a.rank() == 1 && b.rank() == 1 => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => {
                    let x = a.as_f64().unwrap_or(f64::NAN);
                    let y = b.as_f64().unwrap_or(f64::NAN);
                    x.total_cmp(&y)
                }
            },
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::TinyInt(v) => write!(f, "{}", v),
            Value::SmallInt(v) => write!(f, "{}", v),
            Value::Integer(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "'{}'", s),
            Value::FilePointer(fp) => write!(f, "{}", fp),
        }
    }
}

/// Compare two value sequences lexicographically. A sequence that is a
/// strict prefix of the other sorts first.
pub fn compare_values(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match x.compare(y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

/// Size of the non-null value of type `column_type` stored at `offset`.
pub fn stored_size_at(data: &[u8], offset: usize, column_type: ColumnType) -> StorageResult<usize> {
    let size = match column_type {
        ColumnType::Varchar(_) => {
            check_bounds(data, offset, 2)?;
            2 + LittleEndian::read_u16(&data[offset..offset + 2]) as usize
        }
        other => other.fixed_size().unwrap_or(0),
    };
    check_bounds(data, offset, size)?;
    Ok(size)
}

/// Decode the non-null value of type `column_type` stored at `offset`.
pub fn read_value(data: &[u8], offset: usize, column_type: ColumnType) -> StorageResult<Value> {
    let size = stored_size_at(data, offset, column_type)?;
    let bytes = &data[offset..offset + size];
    let value = match column_type {
        ColumnType::TinyInt => Value::TinyInt(bytes[0] as i8),
        ColumnType::SmallInt => Value::SmallInt(LittleEndian::read_i16(bytes)),
        ColumnType::Integer => Value::Integer(LittleEndian::read_i32(bytes)),
        ColumnType::BigInt => Value::BigInt(LittleEndian::read_i64(bytes)),
        ColumnType::Float => Value::Float(LittleEndian::read_f32(bytes)),
        ColumnType::Double => Value::Double(LittleEndian::read_f64(bytes)),
        ColumnType::Char(_) => {
            let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
            Value::String(decode_utf8(&bytes[..end])?)
        }
        ColumnType::Varchar(_) => Value::String(decode_utf8(&bytes[2..])?),
        ColumnType::FilePointer => Value::FilePointer(FilePointer::new(
            LittleEndian::read_u16(&bytes[0..2]),
            LittleEndian::read_u16(&bytes[2..4]),
        )),
    };
    Ok(value)
}

/// Encode a non-null value at `offset`, which must have room for
/// `value.storage_size(column_type)` bytes.
pub fn write_value(
    data: &mut [u8],
    offset: usize,
    column_type: ColumnType,
    value: &Value,
) -> StorageResult<()> {
    value.check_type(column_type)?;
    let size = value.storage_size(column_type);
    check_bounds(data, offset, size)?;
    let out = &mut data[offset..offset + size];
    match (value, column_type) {
        (Value::Null, _) => {}
        (Value::TinyInt(v), _) => out[0] = *v as u8,
        (Value::SmallInt(v), _) => LittleEndian::write_i16(out, *v),
        (Value::Integer(v), _) => LittleEndian::write_i32(out, *v),
        (Value::BigInt(v), _) => LittleEndian::write_i64(out, *v),
        (Value::Float(v), _) => LittleEndian::write_f32(out, *v),
        (Value::Double(v), _) => LittleEndian::write_f64(out, *v),
        (Value::String(s), ColumnType::Varchar(_)) => {
            LittleEndian::write_u16(&mut out[0..2], s.len() as u16);
            out[2..].copy_from_slice(s.as_bytes());
        }
        (Value::String(s), _) => {
            out.fill(0);
            out[..s.len()].copy_from_slice(s.as_bytes());
        }
        (Value::FilePointer(fp), _) => {
            LittleEndian::write_u16(&mut out[0..2], fp.page_no);
            LittleEndian::write_u16(&mut out[2..4], fp.offset);
        }
    }
    Ok(())
}

fn check_bounds(data: &[u8], offset: usize, len: usize) -> StorageResult<()> {
    if offset + len > data.len() {
        return Err(StorageError::invariant(format!(
            "value at {} with {} bytes runs past the end of a {}-byte buffer",
            offset,
            len,
            data.len()
        )));
    }
    Ok(())
}

fn decode_utf8(bytes: &[u8]) -> StorageResult<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| StorageError::TypeMismatch(format!("invalid UTF-8 in string column: {}", e)))
}
