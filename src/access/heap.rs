//! Heap tuple files.
//!
//! Page 0 is the header: the file kind and page size, then the table schema
//! as a 2-byte length followed by its serialized form. Every later page is a
//! [`SlottedPage`] of tuples. A tuple is located by its page number and the
//! offset of its slot entry.

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info};

use crate::access::context::AccessContext;
use crate::access::schema::TableSchema;
use crate::access::tuple::{FilePointer, PageTuple, Tuple, TupleStorage, encode_tuple, tuple_storage_size};
use crate::access::value::{ColumnType, Value};
use crate::session::{Session, SessionId};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::file::{DbFileRef, FileKind};
use crate::storage::page::{PageRef, SlottedPage};

const SCHEMA_LEN_OFFSET: usize = 2;
const SCHEMA_OFFSET: usize = 4;
const FIRST_DATA_PAGE: u32 = 1;
/// Slot count plus one slot entry.
const MIN_PAGE_OVERHEAD: usize = 4;

/// Tuple-level access to a table, as used by query execution.
pub trait TupleFile {
    fn schema(&self) -> &TableSchema;

    fn get_first_tuple(&self, session: &Session) -> StorageResult<Option<Tuple>>;

    /// The tuple following `after` in file order.
    fn get_next_tuple(&self, session: &Session, after: FilePointer) -> StorageResult<Option<Tuple>>;

    fn get_tuple(&self, session: &Session, locator: FilePointer) -> StorageResult<Tuple>;

    fn add_tuple(&self, session: &mut Session, values: &[Value]) -> StorageResult<Tuple>;

    /// Apply `(column index, new value)` changes to one tuple.
    fn update_tuple(
        &self,
        session: &mut Session,
        locator: FilePointer,
        changes: &[(usize, Value)],
    ) -> StorageResult<Tuple>;

    fn delete_tuple(&self, session: &mut Session, locator: FilePointer) -> StorageResult<()>;
}

pub struct HeapTupleFile {
    ctx: Arc<AccessContext>,
    file: DbFileRef,
    schema: TableSchema,
    column_types: Vec<ColumnType>,
}

fn locator_error(locator: FilePointer) -> impl Fn(StorageError) -> StorageError {
    move |e| match e {
        StorageError::TupleNotFound { .. } | StorageError::InvalidSlotId { .. } => {
            StorageError::InvalidLocator(locator)
        }
        other => other,
    }
}

impl HeapTupleFile {
    /// Create the file and write the schema into its header page.
    pub fn create(ctx: Arc<AccessContext>, name: &str, schema: TableSchema) -> StorageResult<Self> {
        let schema_bytes = schema.to_bytes()?;
        let page_size = ctx.storage().config().page_size;
        if SCHEMA_OFFSET + schema_bytes.len() > page_size {
            return Err(StorageError::CapacityExceeded {
                required: SCHEMA_OFFSET + schema_bytes.len(),
                available: page_size,
            });
        }

        // The header page is written straight to the new file and synced
        // before any handle exists, so it is neither cached nor logged.
        let file = ctx.storage().create_file(name, FileKind::HeapData)?;
        let file_manager = ctx.storage().file_manager();
        let mut header = vec![0u8; file.page_size()];
        file_manager.load_page(&file, 0, &mut header, false)?;
        LittleEndian::write_u16(
            &mut header[SCHEMA_LEN_OFFSET..SCHEMA_OFFSET],
            schema_bytes.len() as u16,
        );
        header[SCHEMA_OFFSET..SCHEMA_OFFSET + schema_bytes.len()].copy_from_slice(&schema_bytes);
        file_manager.save_page(&file, 0, &header)?;
        file_manager.sync_file(&file)?;

        info!("Created heap file {} with {} columns", name, schema.len());
        Ok(Self::new(ctx, file, schema))
    }

    pub fn open(ctx: Arc<AccessContext>, name: &str) -> StorageResult<Self> {
        let file = ctx.storage().open_file(name)?;
        file.expect_kind(FileKind::HeapData)?;

        // The schema page is never rewritten after create, so the disk copy
        // is current even while the file is cached.
        let mut header = vec![0u8; file.page_size()];
        ctx.storage().file_manager().load_page(&file, 0, &mut header, false)?;
        let len = LittleEndian::read_u16(&header[SCHEMA_LEN_OFFSET..SCHEMA_OFFSET]) as usize;
        if SCHEMA_OFFSET + len > header.len() {
            return Err(StorageError::Schema(format!(
                "schema of {} bytes does not fit the header page of {}",
                len, name
            )));
        }
        let schema = TableSchema::from_bytes(&header[SCHEMA_OFFSET..SCHEMA_OFFSET + len])?;
        debug!("Opened heap file {} with {} columns", name, schema.len());
        Ok(Self::new(ctx, file, schema))
    }

    fn new(ctx: Arc<AccessContext>, file: DbFileRef, schema: TableSchema) -> Self {
        let column_types = schema.column_types();
        Self {
            ctx,
            file,
            schema,
            column_types,
        }
    }

    pub fn file(&self) -> &DbFileRef {
        &self.file
    }

    pub fn num_pages(&self) -> StorageResult<u32> {
        self.ctx.storage().num_pages(&self.file)
    }

    /// Free bytes in one data page.
    pub fn free_space(&self, session: SessionId, page_no: u32) -> StorageResult<usize> {
        self.with_page(session, page_no, |page| {
            Ok(SlottedPage::from_data(page.read().data()).free_space())
        })
    }

    fn with_page<T>(
        &self,
        session: SessionId,
        page_no: u32,
        f: impl FnOnce(&PageRef) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let page = self.ctx.load_page(session, &self.file, page_no, false)?;
        let result = f(&page);
        self.ctx.release(session, &page)?;
        result
    }

    /// Run `f` on a page and log its changes, releasing the pin either way.
    fn modify_page<T>(
        &self,
        session: &mut Session,
        page: &PageRef,
        f: impl FnOnce(&mut [u8]) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let result = f(page.write().data_mut());
        let logged = match result {
            Ok(_) => self.ctx.log_page_write(session, page),
            Err(_) => Ok(()),
        };
        self.ctx.release(session.id(), page)?;
        logged?;
        result
    }

    fn check_locator(&self, locator: FilePointer) -> StorageResult<u16> {
        let slot = SlottedPage::<&[u8]>::slot_for_offset(locator.offset)
            .ok_or(StorageError::InvalidLocator(locator))?;
        let page_no = locator.page_no as u32;
        if page_no < FIRST_DATA_PAGE || page_no >= self.num_pages()? {
            return Err(StorageError::InvalidLocator(locator));
        }
        Ok(slot)
    }

    fn read_tuple(&self, data: &[u8], page_no: u16, slot: u16) -> StorageResult<Tuple> {
        let page = SlottedPage::from_data(data);
        let start = page.tuple_start(slot)?;
        let values = PageTuple::new(data, start, &self.column_types, TupleStorage::Resizable).values()?;
        Ok(Tuple::new(
            FilePointer::new(page_no, SlottedPage::<&[u8]>::slot_offset(slot)),
            values,
        ))
    }

    /// First occupied slot at or after `first_slot` on `page_no`, then on
    /// each later page.
    fn find_from(&self, session: SessionId, mut page_no: u32, mut first_slot: u16) -> StorageResult<Option<Tuple>> {
        let num_pages = self.num_pages()?;
        while page_no < num_pages {
            let found = self.with_page(session, page_no, |page| {
                let contents = page.read();
                let data = contents.data();
                let slotted = SlottedPage::from_data(data);
                let slot = slotted.occupied_slots().find(|&s| s >= first_slot);
                match slot {
                    Some(slot) => self.read_tuple(data, page_no as u16, slot).map(Some),
                    None => Ok(None),
                }
            })?;
            if found.is_some() {
                return Ok(found);
            }
            page_no += 1;
            first_slot = 0;
        }
        Ok(None)
    }

    fn max_tuple_size(&self) -> usize {
        self.file.page_size() - MIN_PAGE_OVERHEAD
    }
}

impl TupleFile for HeapTupleFile {
    fn schema(&self) -> &TableSchema {
        &self.schema
    }

    fn get_first_tuple(&self, session: &Session) -> StorageResult<Option<Tuple>> {
        self.find_from(session.id(), FIRST_DATA_PAGE, 0)
    }

    fn get_next_tuple(&self, session: &Session, after: FilePointer) -> StorageResult<Option<Tuple>> {
        let slot = SlottedPage::<&[u8]>::slot_for_offset(after.offset)
            .ok_or(StorageError::InvalidLocator(after))?;
        let page_no = (after.page_no as u32).max(FIRST_DATA_PAGE);
        self.find_from(session.id(), page_no, slot.saturating_add(1))
    }

    fn get_tuple(&self, session: &Session, locator: FilePointer) -> StorageResult<Tuple> {
        let slot = self.check_locator(locator)?;
        self.with_page(session.id(), locator.page_no as u32, |page| {
            self.read_tuple(page.read().data(), locator.page_no, slot)
        })
        .map_err(locator_error(locator))
    }

    fn add_tuple(&self, session: &mut Session, values: &[Value]) -> StorageResult<Tuple> {
        self.schema.validate(values)?;
        let bytes = encode_tuple(&self.column_types, values)?;
        if bytes.len() > self.max_tuple_size() {
            return Err(StorageError::CapacityExceeded {
                required: bytes.len(),
                available: self.max_tuple_size(),
            });
        }

        let num_pages = self.num_pages()?;
        let mut target = None;
        for page_no in FIRST_DATA_PAGE..num_pages {
            let page = self.ctx.load_page(session.id(), &self.file, page_no, false)?;
            if SlottedPage::from_data(page.read().data()).has_room_for(bytes.len()) {
                target = Some(page);
                break;
            }
            self.ctx.release(session.id(), &page)?;
        }

        let page = match target {
            Some(page) => page,
            None => {
                let page_no = num_pages.max(FIRST_DATA_PAGE);
                if page_no > u16::MAX as u32 {
                    return Err(StorageError::CapacityExceeded {
                        required: page_no as usize + 1,
                        available: u16::MAX as usize + 1,
                    });
                }
                let page = self.ctx.load_page(session.id(), &self.file, page_no, true)?;
                SlottedPage::from_data(page.write().data_mut()).init();
                debug!("Added data page {} to {}", page_no, self.file.name());
                page
            }
        };

        let page_no = page.page_no() as u16;
        let slot = self.modify_page(session, &page, |data| {
            let mut slotted = SlottedPage::from_data(&mut *data);
            let slot = slotted.allocate_tuple(bytes.len())?;
            let start = slotted.tuple_start(slot)?;
            data[start..start + bytes.len()].copy_from_slice(&bytes);
            Ok(slot)
        })?;

        Ok(Tuple::new(
            FilePointer::new(page_no, SlottedPage::<&[u8]>::slot_offset(slot)),
            values.to_vec(),
        ))
    }

    fn update_tuple(
        &self,
        session: &mut Session,
        locator: FilePointer,
        changes: &[(usize, Value)],
    ) -> StorageResult<Tuple> {
        let slot = self.check_locator(locator)?;
        let page = self.ctx.load_page(session.id(), &self.file, locator.page_no as u32, false)?;
        let column_types = &self.column_types;
        let schema = &self.schema;

        self.modify_page(session, &page, |data| {
            let start = SlottedPage::from_data(&*data).tuple_start(slot)?;
            let old_values =
                PageTuple::new(&*data, start, column_types, TupleStorage::Resizable).values()?;

            let mut new_values = old_values.clone();
            for (column, value) in changes {
                let target = new_values.get_mut(*column).ok_or_else(|| {
                    StorageError::Schema(format!("column index {} out of range", column))
                })?;
                *target = value.clone();
            }
            schema.validate(&new_values)?;

            let old_size = tuple_storage_size(column_types, &old_values);
            let new_size = tuple_storage_size(column_types, &new_values);
            let available = SlottedPage::from_data(&*data).free_space();
            if new_size > old_size && new_size - old_size > available {
                return Err(StorageError::CapacityExceeded {
                    required: new_size - old_size,
                    available,
                });
            }

            // Shrinking columns go first so the page never needs more room
            // than the net growth checked above.
            let size = |values: &[Value], column: usize| values[column].storage_size(column_types[column]) as isize;
            let mut columns: Vec<usize> = changes.iter().map(|(column, _)| *column).collect();
            columns.sort_unstable();
            columns.dedup();
            columns.sort_by_key(|&column| size(&new_values[..], column) - size(&old_values[..], column));

            let mut tuple = PageTuple::new(&mut *data, start, column_types, TupleStorage::Resizable);
            for column in columns {
                tuple.set_value(column, &new_values[column])?;
            }
            Ok(Tuple::new(locator, new_values))
        })
        .map_err(locator_error(locator))
    }

    fn delete_tuple(&self, session: &mut Session, locator: FilePointer) -> StorageResult<()> {
        let slot = self.check_locator(locator)?;
        let page = self.ctx.load_page(session.id(), &self.file, locator.page_no as u32, false)?;
        self.modify_page(session, &page, |data| {
            let mut slotted = SlottedPage::from_data(data);
            slotted.delete_tuple(slot)?;
            slotted.check_slot_order();
            Ok(())
        })
        .map_err(locator_error(locator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::storage::manager::StorageManager;
    use anyhow::Result;
    use tempfile::tempdir;

    fn context(dir: &std::path::Path, page_size: usize) -> Result<Arc<AccessContext>> {
        let storage = StorageManager::new(StorageConfig::new(dir).with_page_size(page_size))?;
        Ok(Arc::new(AccessContext::new(Arc::new(storage), None)))
    }

    fn schema() -> TableSchema {
        TableSchema::default()
            .with_column("id", ColumnType::Integer)
            .with_column("name", ColumnType::Varchar(64))
    }

    fn row(id: i32, name: &str) -> Vec<Value> {
        vec![Value::Integer(id), Value::String(name.to_string())]
    }

    #[test]
    fn test_delete_first_tuple_reuses_slot() -> Result<()> {
        let dir = tempdir()?;
        let heap = HeapTupleFile::create(context(dir.path(), 512)?, "t.tbl", schema())?;
        let mut session = Session::new(SessionId(1));

        let a = heap.add_tuple(&mut session, &row(1, "a"))?;
        heap.add_tuple(&mut session, &row(2, "bb"))?;
        heap.add_tuple(&mut session, &row(3, "ccc"))?;

        let first = heap.get_first_tuple(&session)?.expect("first tuple");
        assert_eq!(first.values, row(1, "a"));
        assert_eq!(first.locator, a.locator);

        let before = heap.free_space(session.id(), 1)?;
        heap.delete_tuple(&mut session, a.locator)?;
        let after = heap.free_space(session.id(), 1)?;
        assert_eq!(after - before, tuple_storage_size(&heap.column_types, &row(1, "a")));

        let first = heap.get_first_tuple(&session)?.expect("first tuple");
        assert_eq!(first.values, row(2, "bb"));
        assert!(matches!(
            heap.get_tuple(&session, a.locator),
            Err(StorageError::InvalidLocator(_))
        ));

        // The emptied slot 0 is reused.
        let d = heap.add_tuple(&mut session, &row(4, "d"))?;
        assert_eq!(d.locator, a.locator);
        assert_eq!(session.id(), SessionId(1));
        assert_eq!(heap.ctx.storage().buffer_manager().session_pin_count(session.id()), 0);
        Ok(())
    }

    #[test]
    fn test_scan_order_and_nulls() -> Result<()> {
        let dir = tempdir()?;
        let heap = HeapTupleFile::create(context(dir.path(), 512)?, "t.tbl", schema())?;
        let mut session = Session::new(SessionId(1));

        heap.add_tuple(&mut session, &[Value::Integer(1), Value::Null])?;
        heap.add_tuple(&mut session, &row(2, "two"))?;

        let first = heap.get_first_tuple(&session)?.expect("first");
        assert_eq!(first.values, vec![Value::Integer(1), Value::Null]);
        let second = heap.get_next_tuple(&session, first.locator)?.expect("second");
        assert_eq!(second.values, row(2, "two"));
        assert!(heap.get_next_tuple(&session, second.locator)?.is_none());
        Ok(())
    }

    #[test]
    fn test_update_resizes_in_place() -> Result<()> {
        let dir = tempdir()?;
        let heap = HeapTupleFile::create(context(dir.path(), 512)?, "t.tbl", schema())?;
        let mut session = Session::new(SessionId(1));

        let a = heap.add_tuple(&mut session, &row(1, "a"))?;
        let b = heap.add_tuple(&mut session, &row(2, "b"))?;

        heap.update_tuple(&mut session, a.locator, &[(1, Value::String("longer name".into()))])?;
        heap.update_tuple(&mut session, b.locator, &[(1, Value::Null), (0, Value::Integer(20))])?;

        assert_eq!(heap.get_tuple(&session, a.locator)?.values, row(1, "longer name"));
        assert_eq!(
            heap.get_tuple(&session, b.locator)?.values,
            vec![Value::Integer(20), Value::Null]
        );

        assert!(matches!(
            heap.update_tuple(&mut session, a.locator, &[(0, Value::String("x".into()))]),
            Err(StorageError::TypeMismatch(_))
        ));
        Ok(())
    }

    #[test]
    fn test_update_fits_when_net_growth_fits() -> Result<()> {
        let dir = tempdir()?;
        let two_texts = TableSchema::default()
            .with_column("a", ColumnType::Varchar(100))
            .with_column("b", ColumnType::Varchar(100));
        let heap = HeapTupleFile::create(context(dir.path(), 512)?, "t.tbl", two_texts)?;
        let mut session = Session::new(SessionId(1));
        let text = |n: usize| Value::String("x".repeat(n));

        let target = heap.add_tuple(&mut session, &[text(0), text(100)])?;
        while heap.free_space(session.id(), 1)? >= 120 {
            heap.add_tuple(&mut session, &[text(0), text(100)])?;
        }
        let free = heap.free_space(session.id(), 1)?;
        if free >= 47 {
            let base = tuple_storage_size(&heap.column_types, &[text(0), text(0)]);
            heap.add_tuple(&mut session, &[text(0), text(free - 20 - 2 - base)])?;
        }
        let free = heap.free_space(session.id(), 1)?;
        assert!(free < 99);

        // Column 0 grows by 99 bytes, more than the page has free, but
        // column 1 shrinks by 100.
        let updated = heap.update_tuple(&mut session, target.locator, &[(0, text(99)), (1, text(0))])?;
        assert_eq!(updated.values, vec![text(99), text(0)]);
        assert_eq!(heap.get_tuple(&session, target.locator)?.values, vec![text(99), text(0)]);
        assert_eq!(heap.free_space(session.id(), 1)?, free + 1);

        assert!(matches!(
            heap.update_tuple(&mut session, target.locator, &[(1, text(100))]),
            Err(StorageError::CapacityExceeded { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_pages_fill_and_reopen() -> Result<()> {
        let dir = tempdir()?;
        let ctx = context(dir.path(), 512)?;
        let mut session = Session::new(SessionId(1));
        {
            let heap = HeapTupleFile::create(ctx.clone(), "t.tbl", schema())?;
            for i in 0..100 {
                heap.add_tuple(&mut session, &row(i, "some text value"))?;
            }
            assert!(heap.num_pages()? > 3);
            ctx.storage().flush_all(true)?;
        }

        let heap = HeapTupleFile::open(ctx, "t.tbl")?;
        assert_eq!(heap.schema(), &schema());
        let mut count = 0;
        let mut cursor = heap.get_first_tuple(&session)?;
        while let Some(tuple) = cursor {
            assert_eq!(tuple.values[0], Value::Integer(count));
            count += 1;
            cursor = heap.get_next_tuple(&session, tuple.locator)?;
        }
        assert_eq!(count, 100);
        Ok(())
    }

    #[test]
    fn test_rejects_bad_input() -> Result<()> {
        let dir = tempdir()?;
        let heap = HeapTupleFile::create(context(dir.path(), 512)?, "t.tbl", schema())?;
        let mut session = Session::new(SessionId(1));

        let huge = TableSchema::default().with_column("c", ColumnType::Char(600));
        let wide = HeapTupleFile::create(heap.ctx.clone(), "wide.tbl", huge)?;
        assert!(matches!(
            wide.add_tuple(&mut session, &[Value::String("x".into())]),
            Err(StorageError::CapacityExceeded { .. })
        ));
        assert!(matches!(
            heap.add_tuple(&mut session, &[Value::Integer(1)]),
            Err(StorageError::TypeMismatch(_))
        ));
        assert!(matches!(
            heap.get_tuple(&session, FilePointer::new(9, 2)),
            Err(StorageError::InvalidLocator(_))
        ));
        assert!(matches!(
            heap.get_tuple(&session, FilePointer::new(1, 3)),
            Err(StorageError::InvalidLocator(_))
        ));
        Ok(())
    }
}
