use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tempfile::tempdir;
use vibestore::access::{
    ColumnType, FilePointer, HeapTupleFile, TableScanner, TableSchema, Tuple, TupleFile, Value,
};
use vibestore::config::{EvictionPolicy, StorageConfig};
use vibestore::database::Database;
use vibestore::session::Session;
use vibestore::storage::error::{StorageError, StorageResult};

fn config(dir: &Path) -> StorageConfig {
    StorageConfig::new(dir).with_page_size(1024)
}

fn people() -> TableSchema {
    TableSchema::default()
        .with_column("id", ColumnType::Integer)
        .with_column("name", ColumnType::Varchar(40))
        .with_column("score", ColumnType::Double)
}

fn person(id: i32) -> Vec<Value> {
    vec![
        Value::Integer(id),
        Value::String(format!("person-{}", id)),
        Value::Double(id as f64 / 2.0),
    ]
}

fn ids(table: &HeapTupleFile, session: &Session) -> StorageResult<Vec<i32>> {
    TableScanner::new(table, session)
        .map(|t| {
            let t = t?;
            match t.values[0] {
                Value::Integer(id) => Ok(id),
                ref other => Err(StorageError::TypeMismatch(format!("id column holds {:?}", other))),
            }
        })
        .collect()
}

fn insert_all(db: &Database, session: &mut Session, table: &HeapTupleFile, range: std::ops::Range<i32>) -> Result<Vec<Tuple>> {
    let mut tuples = Vec::new();
    for id in range {
        tuples.push(db.autocommit(session, |s| table.add_tuple(s, &person(id)))?);
    }
    Ok(tuples)
}

#[test]
fn test_heap_insert_update_delete_and_reopen() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = Database::open(config(dir.path()))?;
        let table = db.create_table("people", people())?;
        let mut session = db.new_session();

        let tuples = insert_all(&db, &mut session, &table, 0..100)?;
        assert!(table.num_pages()? > 2);

        for tuple in tuples.iter().filter(|t| matches!(t.values[0], Value::Integer(id) if id % 10 == 0)) {
            db.autocommit(&mut session, |s| table.delete_tuple(s, tuple.locator))?;
        }
        db.autocommit(&mut session, |s| {
            table.update_tuple(
                s,
                tuples[1].locator,
                &[(1, Value::String("a considerably longer name".into()))],
            )
        })?;

        assert_eq!(db.storage().buffer_manager().session_pin_count(session.id()), 0);
        db.shutdown()?;
    }

    let db = Database::open(config(dir.path()))?;
    let table = db.open_table("people")?;
    assert_eq!(table.schema(), &people());
    let session = db.new_session();

    let found = ids(&table, &session)?;
    let expected: Vec<i32> = (0..100).filter(|id| id % 10 != 0).collect();
    let mut sorted = found.clone();
    sorted.sort();
    assert_eq!(sorted, expected);

    let first = table
        .get_first_tuple(&session)?
        .expect("table is not empty");
    let updated = TableScanner::new(&*table, &session)
        .find(|t| matches!(t, Ok(t) if t.values[0] == Value::Integer(1)))
        .expect("row 1 exists")?;
    assert_eq!(updated.values[1], Value::String("a considerably longer name".into()));
    assert!(first.locator.page_no >= 1);

    assert!(matches!(
        table.get_tuple(&session, FilePointer::new(1, 3)),
        Err(StorageError::InvalidLocator(_))
    ));
    Ok(())
}

#[test]
fn test_index_lookup_finds_heap_rows() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open(config(dir.path()))?;
    let table = db.create_table("people", people())?;
    let index = db.create_index("people_name", vec![ColumnType::Varchar(40)])?;
    let mut session = db.new_session();

    for id in 0..300 {
        db.autocommit(&mut session, |s| {
            let tuple = table.add_tuple(s, &person(id % 150))?;
            index.add_tuple(s, &tuple, &[1])
        })?;
    }
    assert!(index.height(&session)? >= 2);
    assert!(index.verify(&session)?.is_empty());

    let locators = index.lookup(&session, &[Value::String("person-42".into())])?;
    assert_eq!(locators.len(), 2);
    for locator in locators {
        let row = table.get_tuple(&session, locator)?;
        assert_eq!(row.values, person(42));
    }
    assert!(index.lookup(&session, &[Value::String("nobody".into())])?.is_empty());
    assert_eq!(db.storage().buffer_manager().session_pin_count(session.id()), 0);
    Ok(())
}

#[test]
fn test_random_index_inserts_stay_consistent() -> Result<()> {
    let dir = tempdir()?;
    let mut keys: Vec<i64> = (0..2000).collect();
    keys.shuffle(&mut StdRng::seed_from_u64(7));
    {
        let db = Database::open(StorageConfig::new(dir.path()).with_page_size(512))?;
        let index = db.create_index("random", vec![ColumnType::BigInt, ColumnType::Varchar(24)])?;
        let mut session = db.new_session();
        for (n, key) in keys.iter().enumerate() {
            let values = [Value::BigInt(*key), Value::String(format!("v{}", key % 97))];
            let locator = FilePointer::new(1 + (n / 64) as u16, 2 + 2 * (n % 64) as u16);
            db.autocommit(&mut session, |s| index.add_entry(s, &values, locator))?;
        }
        assert_eq!(index.verify(&session)?, Vec::<String>::new());
        assert!(index.height(&session)? >= 3);
        db.shutdown()?;
    }

    let db = Database::open(StorageConfig::new(dir.path()).with_page_size(512))?;
    let index = db.open_index("random")?;
    let session = db.new_session();
    assert!(index.verify(&session)?.is_empty());
    let stored: Vec<Value> = index
        .entries(&session)?
        .into_iter()
        .map(|k| k.values()[0].clone())
        .collect();
    let expected: Vec<Value> = (0..2000).map(Value::BigInt).collect();
    assert_eq!(stored, expected);
    Ok(())
}

#[test]
fn test_rollback_discards_user_transaction() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open(config(dir.path()))?;
    let table = db.create_table("people", people())?;
    let mut session = db.new_session();
    insert_all(&db, &mut session, &table, 0..5)?;

    db.begin(&mut session)?;
    let tuples = insert_all(&db, &mut session, &table, 5..40)?;
    table.delete_tuple(&mut session, tuples[0].locator)?;
    assert_eq!(ids(&table, &session)?.len(), 39);
    db.rollback(&mut session)?;

    assert_eq!(ids(&table, &session)?, vec![0, 1, 2, 3, 4]);
    assert_eq!(db.storage().buffer_manager().session_pin_count(session.id()), 0);
    Ok(())
}

#[test]
fn test_recovery_redoes_committed_work() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = Database::open(config(dir.path()))?;
        let table = db.create_table("people", people())?;
        let mut session = db.new_session();
        insert_all(&db, &mut session, &table, 0..30)?;
        // Crash: nothing but the log reached disk.
    }

    let db = Database::open(config(dir.path()))?;
    let stats = db.recovery_stats().cloned().expect("transactions are enabled");
    assert!(stats.records_redone > 0);
    assert_eq!(stats.incomplete_txns, 0);

    let table = db.open_table("people")?;
    let session = db.new_session();
    assert_eq!(ids(&table, &session)?, (0..30).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_recovery_undoes_uncommitted_work() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = Database::open(config(dir.path()))?;
        let table = db.create_table("people", people())?;
        let mut session = db.new_session();
        insert_all(&db, &mut session, &table, 0..3)?;

        db.begin(&mut session)?;
        insert_all(&db, &mut session, &table, 3..50)?;
        // Uncommitted pages reach disk, then the process dies.
        db.storage().flush_all(true)?;
    }

    let db = Database::open(config(dir.path()))?;
    let stats = db.recovery_stats().cloned().expect("transactions are enabled");
    assert_eq!(stats.incomplete_txns, 1);
    assert!(stats.records_undone > 0);

    let table = db.open_table("people")?;
    let session = db.new_session();
    assert_eq!(ids(&table, &session)?, vec![0, 1, 2]);
    db.shutdown()?;
    drop(db);

    let db = Database::open(config(dir.path()))?;
    let stats = db.recovery_stats().cloned().expect("transactions are enabled");
    assert_eq!(stats.start_lsn, stats.end_lsn);
    Ok(())
}

#[test]
fn test_undo_crosses_wal_files() -> Result<()> {
    let dir = tempdir()?;
    let small_log = |dir: &Path| config(dir).with_wal_file_size_limit(4096);
    {
        let db = Database::open(small_log(dir.path()))?;
        let table = db.create_table("people", people())?;
        let mut session = db.new_session();
        db.begin(&mut session)?;
        insert_all(&db, &mut session, &table, 0..200)?;
        db.storage().flush_all(true)?;
    }
    assert!(dir.path().join("wal-00001.log").exists());

    let db = Database::open(small_log(dir.path()))?;
    let stats = db.recovery_stats().cloned().expect("transactions are enabled");
    assert_eq!(stats.incomplete_txns, 1);
    let table = db.open_table("people")?;
    assert!(ids(&table, &db.new_session())?.is_empty());
    Ok(())
}

#[test]
fn test_eviction_forces_log_before_writing_pages() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::open(
        config(dir.path())
            .with_buffer_pool_bytes(4 * 1024)
            .with_eviction_policy(EvictionPolicy::Fifo),
    )?;
    let table = db.create_table("people", people())?;
    let txns = Arc::clone(db.transactions().expect("transactions are enabled"));
    let mut session = db.new_session();

    let (_, durable_before) = txns.recovery_range();
    db.begin(&mut session)?;
    insert_all(&db, &mut session, &table, 0..200)?;
    let (_, durable_after) = txns.recovery_range();
    // Nothing was committed, so only evictions can have forced the log.
    assert!(durable_after > durable_before);

    db.rollback(&mut session)?;
    assert!(ids(&table, &session)?.is_empty());
    Ok(())
}

#[test]
fn test_recovery_undoes_index_splits_under_eviction() -> Result<()> {
    let dir = tempdir()?;
    let tight = |dir: &Path| {
        StorageConfig::new(dir)
            .with_page_size(512)
            .with_buffer_pool_bytes(4 * 512)
    };
    let mut keys: Vec<i64> = (0..600).collect();
    keys.shuffle(&mut StdRng::seed_from_u64(11));
    let (committed, uncommitted) = keys.split_at(150);
    let entry = |key: i64| {
        (
            [Value::BigInt(key), Value::String(format!("name-{}", key))],
            FilePointer::new(1 + (key / 64) as u16, 2 + 2 * (key % 64) as u16),
        )
    };
    {
        let db = Database::open(tight(dir.path()))?;
        let index = db.create_index("names", vec![ColumnType::BigInt, ColumnType::Varchar(24)])?;
        let mut session = db.new_session();
        for &key in committed {
            let (values, locator) = entry(key);
            db.autocommit(&mut session, |s| index.add_entry(s, &values, locator))?;
        }

        db.begin(&mut session)?;
        for &key in uncommitted {
            let (values, locator) = entry(key);
            index.add_entry(&mut session, &values, locator)?;
        }
        assert_eq!(index.entries(&session)?.len(), keys.len());
        assert!(index.height(&session)? >= 2);
        db.storage().flush_all(true)?;
        // Crash with the transaction still open.
    }

    let db = Database::open(tight(dir.path()))?;
    let stats = db.recovery_stats().cloned().expect("transactions are enabled");
    assert_eq!(stats.incomplete_txns, 1);

    let index = db.open_index("names")?;
    let session = db.new_session();
    assert_eq!(index.verify(&session)?, Vec::<String>::new());
    let mut expected: Vec<Value> = committed.iter().map(|&k| Value::BigInt(k)).collect();
    expected.sort_by_key(|v| match v {
        Value::BigInt(k) => *k,
        _ => 0,
    });
    let stored: Vec<Value> = index
        .entries(&session)?
        .into_iter()
        .map(|k| k.values()[0].clone())
        .collect();
    assert_eq!(stored, expected);
    assert_eq!(db.storage().buffer_manager().session_pin_count(session.id()), 0);
    Ok(())
}
