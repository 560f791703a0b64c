use serde::{Deserialize, Serialize};

use crate::access::value::{ColumnType, Value};
use crate::storage::error::{StorageError, StorageResult};

/// Name and type of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Ordered column list of a table, persisted in the header page of its
/// heap file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableSchema {
    columns: Vec<ColumnInfo>,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnInfo>) -> Self {
        Self { columns }
    }

    pub fn with_column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.push(ColumnInfo::new(name, column_type));
        self
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_types(&self) -> Vec<ColumnType> {
        self.columns.iter().map(|c| c.column_type).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Check that `values` has one compatible value per column.
    pub fn validate(&self, values: &[Value]) -> StorageResult<()> {
        if values.len() != self.columns.len() {
            return Err(StorageError::TypeMismatch(format!(
                "expected {} values, got {}",
                self.columns.len(),
                values.len()
            )));
        }
        for (value, column) in values.iter().zip(&self.columns) {
            if !value.is_compatible_with(column.column_type) {
                return Err(StorageError::TypeMismatch(format!(
                    "value {} is not compatible with column {} of type {}",
                    value, column.name, column.column_type
                )));
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> StorageResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> TableSchema {
        TableSchema::default()
            .with_column("id", ColumnType::Integer)
            .with_column("name", ColumnType::Varchar(32))
    }

    #[test]
    fn test_schema_roundtrip() -> StorageResult<()> {
        let schema = users();
        let restored = TableSchema::from_bytes(&schema.to_bytes()?)?;
        assert_eq!(restored, schema);
        assert_eq!(restored.column_index("name"), Some(1));
        assert_eq!(restored.column_index("missing"), None);
        Ok(())
    }

    #[test]
    fn test_validate() {
        let schema = users();
        assert!(schema
            .validate(&[Value::Integer(1), Value::String("x".into())])
            .is_ok());
        assert!(schema.validate(&[Value::Integer(1), Value::Null]).is_ok());
        assert!(schema.validate(&[Value::Integer(1)]).is_err());
        assert!(schema
            .validate(&[Value::String("x".into()), Value::Integer(1)])
            .is_err());
    }
}
