//! Sequential scans over tuple files.

use crate::access::heap::TupleFile;
use crate::access::tuple::{FilePointer, Tuple};
use crate::session::Session;
use crate::storage::error::StorageResult;

/// Iterator over every tuple of a table in locator order.
pub struct TableScanner<'a, F: TupleFile + ?Sized> {
    file: &'a F,
    session: &'a Session,
    last: Option<FilePointer>,
    done: bool,
}

impl<'a, F: TupleFile + ?Sized> TableScanner<'a, F> {
    pub fn new(file: &'a F, session: &'a Session) -> Self {
        Self {
            file,
            session,
            last: None,
            done: false,
        }
    }

    fn try_next_tuple(&mut self) -> StorageResult<Option<Tuple>> {
        let next = match self.last {
            None => self.file.get_first_tuple(self.session)?,
            Some(last) => self.file.get_next_tuple(self.session, last)?,
        };
        self.last = next.as_ref().map(|t| t.locator);
        Ok(next)
    }
}

impl<F: TupleFile + ?Sized> Iterator for TableScanner<'_, F> {
    type Item = StorageResult<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.try_next_tuple() {
            Ok(Some(tuple)) => Some(Ok(tuple)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::context::AccessContext;
    use crate::access::heap::HeapTupleFile;
    use crate::access::schema::TableSchema;
    use crate::access::value::{ColumnType, Value};
    use crate::config::StorageConfig;
    use crate::session::SessionId;
    use crate::storage::manager::StorageManager;
    use anyhow::Result;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn create_test_table(dir: &std::path::Path) -> Result<HeapTupleFile> {
        let storage = StorageManager::new(StorageConfig::new(dir).with_page_size(512))?;
        let ctx = Arc::new(AccessContext::new(Arc::new(storage), None));
        let schema = TableSchema::default()
            .with_column("id", ColumnType::Integer)
            .with_column("note", ColumnType::Varchar(100));
        Ok(HeapTupleFile::create(ctx, "scan.tbl", schema)?)
    }

    #[test]
    fn test_table_scanner_empty_table() -> Result<()> {
        let dir = tempdir()?;
        let table = create_test_table(dir.path())?;
        let session = Session::new(SessionId(1));
        assert_eq!(TableScanner::new(&table, &session).count(), 0);
        Ok(())
    }

    #[test]
    fn test_table_scanner_with_deleted_tuples() -> Result<()> {
        let dir = tempdir()?;
        let table = create_test_table(dir.path())?;
        let mut session = Session::new(SessionId(1));

        let mut locators = Vec::new();
        for i in 0..60 {
            let tuple = table.add_tuple(
                &mut session,
                &[Value::Integer(i), Value::String(format!("note {}", i))],
            )?;
            locators.push(tuple.locator);
        }
        for locator in locators.iter().step_by(3) {
            table.delete_tuple(&mut session, *locator)?;
        }

        let ids: Vec<i32> = TableScanner::new(&table, &session)
            .map(|t| match t?.values[0] {
                Value::Integer(id) => Ok(id),
                ref other => panic!("unexpected {}", other),
            })
            .collect::<StorageResult<_>>()?;
        let expected: Vec<i32> = (0..60).filter(|i| i % 3 != 0).collect();
        assert_eq!(ids, expected);
        Ok(())
    }
}
