use std::path::Path;
use std::thread;

use sql_session::{
    ConnectionRole, Database, LeaseIntent, RowValues, SqlSessionError,
};
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn file_db(dir: &TempDir, name: &str) -> Result<Database, SqlSessionError> {
    let path = dir.path().join(name);
    let db = Database::builder(path.to_string_lossy()).build()?;
    db.execute_batch("CREATE TABLE IF NOT EXISTS t (n INTEGER)")?;
    Ok(db)
}

fn wal_db(dir: &TempDir) -> Result<Database, SqlSessionError> {
    let path = dir.path().join("wal.db");
    let db = Database::builder(path.to_string_lossy())
        .write_ahead_logging(true)
        .max_reader_connections(2)
        .build()?;
    db.execute_batch("CREATE TABLE IF NOT EXISTS t (n INTEGER)")?;
    Ok(db)
}

#[test]
fn test03_in_memory_database_cannot_use_wal() -> TestResult {
    let db = Database::open_in_memory()?;
    assert!(!db.set_wal_enabled(true)?);
    assert!(!db.is_wal_enabled());
    Ok(())
}

#[test]
fn test03_open_transaction_blocks_wal_toggle() -> TestResult {
    let dir = tempfile::tempdir()?;
    let db = file_db(&dir, "busy.db")?;

    let mut conn = db.pool().acquire_write()?;
    conn.begin_transaction(None)?;
    let err = db.set_wal_enabled(true).unwrap_err();
    assert!(matches!(err, SqlSessionError::ConcurrencyConflict(_)));
    conn.end_transaction()?;

    let err = db.set_wal_enabled(true).unwrap_err();
    assert!(
        matches!(err, SqlSessionError::ConcurrencyConflict(_)),
        "an outstanding lease also blocks the toggle"
    );
    drop(conn);

    assert!(!db.is_wal_enabled());
    assert_eq!(db.journal_mode()?, "delete");
    Ok(())
}

#[test]
fn test03_toggle_is_idempotent() -> TestResult {
    let dir = tempfile::tempdir()?;
    let db = file_db(&dir, "toggle.db")?;

    assert!(db.set_wal_enabled(true)?);
    assert!(db.is_wal_enabled());
    assert_eq!(db.journal_mode()?, "wal");
    assert!(db.set_wal_enabled(true)?);
    assert_eq!(db.journal_mode()?, "wal");

    assert!(db.set_wal_enabled(false)?);
    assert!(!db.is_wal_enabled());
    assert_eq!(db.journal_mode()?, "delete");
    assert!(db.set_wal_enabled(false)?);
    Ok(())
}

#[test]
fn test03_attached_databases_keep_rollback_journal() -> TestResult {
    let dir = tempfile::tempdir()?;
    let db = file_db(&dir, "main.db")?;
    let other = dir.path().join("other.db");
    let attach = format!(
        "ATTACH DATABASE '{}' AS aux",
        other.to_string_lossy().replace('\'', "''")
    );
    db.execute_batch(&attach)?;

    let attached = db.attached_databases()?;
    let aux = attached
        .iter()
        .find(|database| database.name == "aux")
        .expect("aux is attached");
    assert!(!aux.is_builtin());
    assert!(Path::new(&aux.file).ends_with("other.db"));

    assert!(!db.set_wal_enabled(true)?);
    assert!(!db.is_wal_enabled());
    assert_eq!(db.journal_mode()?, "delete");
    Ok(())
}

#[test]
fn test03_readers_lease_concurrently_with_the_writer() -> TestResult {
    let dir = tempfile::tempdir()?;
    let db = wal_db(&dir)?;
    assert!(db.is_wal_enabled());
    db.execute("INSERT INTO t (n) VALUES (?)", &[RowValues::Int(1)])?;

    let mut writer = db.pool().acquire_write()?;
    let mut first = db.pool().acquire_read()?;
    let mut second = db.pool().acquire_read()?;
    assert_eq!(writer.role(), ConnectionRole::Primary);
    assert_eq!(first.role(), ConnectionRole::Reader);
    assert_eq!(second.role(), ConnectionRole::Reader);
    assert!(first.is_read_only());
    assert_ne!(first.id(), second.id());

    writer.begin_transaction(None)?;
    writer.execute("INSERT INTO t (n) VALUES (2)", &[])?;
    assert_eq!(first.long_for_query("SELECT count(*) FROM t", &[])?, 1);

    writer.set_transaction_successful()?;
    writer.end_transaction()?;
    assert_eq!(second.long_for_query("SELECT count(*) FROM t", &[])?, 2);

    assert!(first.execute("INSERT INTO t (n) VALUES (3)", &[]).is_err());

    let stats = db.stats();
    assert_eq!(stats.leased_connections, 3);
    assert_eq!(stats.open_connections, 3);
    assert_eq!(stats.max_connections, 3);
    Ok(())
}

#[test]
fn test03_reader_limit_falls_back_to_primary() -> TestResult {
    let dir = tempfile::tempdir()?;
    let db = wal_db(&dir)?;

    let _a = db.pool().acquire_read()?;
    let _b = db.pool().acquire_read()?;
    let third = db.pool().acquire_read()?;
    assert_eq!(third.role(), ConnectionRole::Primary);

    let err = db
        .acquire(LeaseIntent::Read, std::time::Duration::from_millis(20))
        .unwrap_err();
    assert!(err.is_timeout());
    Ok(())
}

#[test]
fn test03_parallel_readers() -> TestResult {
    let dir = tempfile::tempdir()?;
    let db = wal_db(&dir)?;
    for n in 0..10 {
        db.execute("INSERT INTO t (n) VALUES (?)", &[RowValues::Int(n)])?;
    }

    let totals: Vec<i64> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| db.long_for_query("SELECT sum(n) FROM t", &[])))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("reader thread panicked"))
            .collect::<Result<_, _>>()
    })?;
    assert!(totals.iter().all(|total| *total == 45));
    Ok(())
}

#[test]
fn test03_disabling_wal_closes_idle_readers() -> TestResult {
    let dir = tempfile::tempdir()?;
    let db = wal_db(&dir)?;
    {
        let _a = db.pool().acquire_read()?;
        let _b = db.pool().acquire_read()?;
    }
    assert_eq!(db.stats().open_connections, 3);

    assert!(db.set_wal_enabled(false)?);
    assert_eq!(db.stats().open_connections, 1);
    let conn = db.pool().acquire_read()?;
    assert_eq!(conn.role(), ConnectionRole::Primary);
    Ok(())
}

#[test]
fn test03_readers_pick_up_columns_added_by_the_writer() -> TestResult {
    let dir = tempfile::tempdir()?;
    let db = wal_db(&dir)?;
    db.execute("INSERT INTO t (n) VALUES (1)", &[])?;

    let mut reader = db.pool().acquire_read()?;
    let before = reader.raw_query("SELECT * FROM t", &[])?;
    assert_eq!(before.column_names()?, ["n".to_owned()]);

    {
        let mut writer = db.pool().acquire_write()?;
        writer.execute("ALTER TABLE t ADD COLUMN k INTEGER DEFAULT 7", &[])?;
    }

    let mut after = reader.raw_query("SELECT * FROM t", &[])?;
    assert_eq!(after.column_names()?, ["n".to_owned(), "k".to_owned()]);
    assert!(after.move_to_first()?);
    assert_eq!(after.get("k")?, Some(&RowValues::Int(7)));

    let rows = reader.query("SELECT * FROM t", &[])?;
    assert_eq!(rows.results[0].rows, vec![RowValues::Int(1), RowValues::Int(7)]);
    assert_eq!(rows.results[0].column_names.len(), 2);

    let again = reader.raw_query("SELECT * FROM t", &[])?;
    let (Some(refreshed), Some(reused)) = (after.driver().statement(), again.driver().statement())
    else {
        panic!("open cursors keep their statement");
    };
    assert!(std::sync::Arc::ptr_eq(refreshed, reused));
    assert_eq!(before.column_names()?, ["n".to_owned()]);
    Ok(())
}
