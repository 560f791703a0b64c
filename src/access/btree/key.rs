use crate::access::tuple::{FilePointer, PageTuple, TupleStorage, encode_tuple};
use crate::access::value::{ColumnType, Value, compare_values};
use crate::storage::error::StorageResult;
use std::cmp::Ordering;

/// A key stored in a B+-tree node: the indexed column values followed by
/// the file pointer of the tuple they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct BTreeKey {
    values: Vec<Value>,
    data: Vec<u8>,
}

impl BTreeKey {
    /// Encode a key; `schema` includes the trailing file-pointer column.
    pub fn from_values(values: Vec<Value>, schema: &[ColumnType]) -> StorageResult<Self> {
        let data = encode_tuple(schema, &values)?;
        Ok(Self { values, data })
    }

    /// Decode the key stored at `offset`.
    pub fn decode(buf: &[u8], offset: usize, schema: &[ColumnType]) -> StorageResult<Self> {
        let tuple = PageTuple::new(buf, offset, schema, TupleStorage::Fixed);
        let values = tuple.values()?;
        let size = tuple.size()?;
        Ok(Self {
            values,
            data: buf[offset..offset + size].to_vec(),
        })
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Serialized form, as written into a node.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// File pointer of the indexed tuple, if the key ends with one.
    pub fn locator(&self) -> Option<FilePointer> {
        match self.values.last() {
            Some(Value::FilePointer(fp)) => Some(*fp),
            _ => None,
        }
    }

    /// Compare against raw values, which may be a shorter prefix.
    pub fn compare_to(&self, other: &[Value]) -> Ordering {
        compare_values(&self.values, other)
    }

    pub fn compare(&self, other: &BTreeKey) -> Ordering {
        compare_values(&self.values, &other.values)
    }

    /// Check if this key starts with the given prefix values.
    pub fn matches_prefix(&self, prefix: &[Value]) -> bool {
        prefix.len() <= self.values.len()
            && self
                .values
                .iter()
                .zip(prefix)
                .all(|(a, b)| a.compare(b) == Ordering::Equal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Vec<ColumnType> {
        vec![ColumnType::Integer, ColumnType::FilePointer]
    }

    fn key(v: i32, page: u16) -> BTreeKey {
        BTreeKey::from_values(
            vec![Value::Integer(v), Value::FilePointer(FilePointer::new(page, 2))],
            &schema(),
        )
        .unwrap()
    }

    #[test]
    fn test_key_encode_decode() -> StorageResult<()> {
        let k = key(42, 3);
        assert_eq!(k.size(), 1 + 4 + 4);

        let mut buf = vec![0u8; 32];
        buf[10..10 + k.size()].copy_from_slice(k.data());
        let decoded = BTreeKey::decode(&buf, 10, &schema())?;
        assert_eq!(decoded, k);
        assert_eq!(decoded.locator(), Some(FilePointer::new(3, 2)));
        Ok(())
    }

    #[test]
    fn test_key_ordering_uses_locator_as_tiebreak() {
        assert_eq!(key(1, 5).compare(&key(2, 1)), Ordering::Less);
        assert_eq!(key(1, 5).compare(&key(1, 1)), Ordering::Greater);
        assert_eq!(key(1, 5).compare(&key(1, 5)), Ordering::Equal);
    }

    #[test]
    fn test_prefix_matching() {
        let k = key(7, 1);
        assert!(k.matches_prefix(&[Value::Integer(7)]));
        assert!(!k.matches_prefix(&[Value::Integer(8)]));
        assert!(k.matches_prefix(&[]));
        assert_eq!(k.compare_to(&[Value::Integer(7)]), Ordering::Greater);
        assert_eq!(k.compare_to(&[Value::Integer(8)]), Ordering::Less);
    }
}
