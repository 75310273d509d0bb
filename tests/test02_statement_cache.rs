use std::sync::Arc;

use sql_session::{Database, MEMORY_DB_PATH, RowValues, SqlSessionError, StatementKind};

type TestResult = Result<(), Box<dyn std::error::Error>>;

const SELECT_POSITIVE: &str = "SELECT n FROM t WHERE n > ?";

#[test]
fn test02_same_sql_reuses_compiled_statement() -> TestResult {
    let db = Database::open_in_memory()?;
    db.execute_batch("CREATE TABLE t (n INTEGER); INSERT INTO t VALUES (1), (2);")?;
    let mut conn = db.pool().acquire_write()?;

    let first = conn.raw_query(SELECT_POSITIVE, &[RowValues::Int(0)])?;
    let second = conn.raw_query(SELECT_POSITIVE, &[RowValues::Int(1)])?;
    let (Some(a), Some(b)) = (first.driver().statement(), second.driver().statement()) else {
        panic!("open cursors keep their statement");
    };
    assert!(Arc::ptr_eq(a, b));
    assert_eq!(a.parameter_count(), 1);
    assert_eq!(a.column_names(), ["n".to_owned()]);
    assert!(a.is_read_only());
    assert_eq!(a.kind(), StatementKind::Select);

    assert_eq!(first.count()?, 2);
    assert_eq!(second.count()?, 1);

    let stats = conn.statement_cache().stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
    Ok(())
}

#[test]
fn test02_schema_change_forces_recompile() -> TestResult {
    let db = Database::open_in_memory()?;
    db.execute_batch("CREATE TABLE t (n INTEGER)")?;
    let mut conn = db.pool().acquire_write()?;

    let before = conn.raw_query(SELECT_POSITIVE, &[RowValues::Int(0)])?;
    assert!(conn.statement_cache().contains(SELECT_POSITIVE));

    conn.execute("CREATE TABLE u (x INTEGER)", &[])?;
    assert!(!conn.statement_cache().contains(SELECT_POSITIVE));
    assert_eq!(conn.statement_cache().stats().invalidations, 1);

    let after = conn.raw_query(SELECT_POSITIVE, &[RowValues::Int(0)])?;
    let (Some(a), Some(b)) = (before.driver().statement(), after.driver().statement()) else {
        panic!("open cursors keep their statement");
    };
    assert!(!Arc::ptr_eq(a, b));
    Ok(())
}

#[test]
fn test02_batches_flush_the_cache() -> TestResult {
    let db = Database::open_in_memory()?;
    db.execute_batch("CREATE TABLE t (n INTEGER)")?;
    let mut conn = db.pool().acquire_write()?;
    conn.query(SELECT_POSITIVE, &[RowValues::Int(0)])?;
    assert_eq!(conn.statement_cache().len(), 1);

    conn.execute_batch("ALTER TABLE t ADD COLUMN m INTEGER")?;
    assert!(conn.statement_cache().is_empty());

    let rows = conn.query("SELECT * FROM t", &[])?;
    assert_eq!(
        rows.get_column_names().map(|names| names.len()),
        Some(2),
        "recompiled statement sees the new column"
    );
    Ok(())
}

#[test]
fn test02_least_recently_used_entry_is_evicted() -> TestResult {
    let db = Database::builder(MEMORY_DB_PATH)
        .max_statement_cache_size(2)
        .build()?;
    let mut conn = db.pool().acquire_write()?;

    conn.long_for_query("SELECT 1", &[])?;
    conn.long_for_query("SELECT 2", &[])?;
    conn.long_for_query("SELECT 1", &[])?;
    conn.long_for_query("SELECT 3", &[])?;

    let cache = conn.statement_cache();
    assert_eq!(cache.len(), 2);
    assert!(cache.contains("SELECT 1"));
    assert!(!cache.contains("SELECT 2"));
    assert!(cache.contains("SELECT 3"));
    assert_eq!(cache.stats().evictions, 1);
    Ok(())
}

#[test]
fn test02_zero_capacity_disables_caching() -> TestResult {
    let db = Database::builder(MEMORY_DB_PATH)
        .max_statement_cache_size(0)
        .build()?;
    db.execute_batch("CREATE TABLE t (n INTEGER)")?;
    let mut conn = db.pool().acquire_write()?;

    let first = conn.raw_query(SELECT_POSITIVE, &[RowValues::Int(0)])?;
    let second = conn.raw_query(SELECT_POSITIVE, &[RowValues::Int(0)])?;
    let (Some(a), Some(b)) = (first.driver().statement(), second.driver().statement()) else {
        panic!("open cursors keep their statement");
    };
    assert!(!Arc::ptr_eq(a, b));
    assert!(conn.statement_cache().is_empty());
    assert_eq!(conn.statement_cache().stats().misses, 2);
    Ok(())
}

#[test]
fn test02_argument_count_mismatch_is_a_usage_error() -> TestResult {
    let db = Database::open_in_memory()?;
    db.execute_batch("CREATE TABLE t (n INTEGER)")?;

    let err = db.query(SELECT_POSITIVE, &[]).unwrap_err();
    assert!(err.is_usage());
    let err = db
        .execute(
            "INSERT INTO t (n) VALUES (?)",
            &[RowValues::Int(1), RowValues::Int(2)],
        )
        .unwrap_err();
    assert!(err.is_usage());
    assert_eq!(db.long_for_query("SELECT count(*) FROM t", &[])?, 0);
    Ok(())
}

#[test]
fn test02_compile_errors_do_not_poison_the_cache() -> TestResult {
    let db = Database::open_in_memory()?;
    let mut conn = db.pool().acquire_write()?;
    let err = conn.query("SELEC nonsense", &[]).unwrap_err();
    assert!(matches!(err, SqlSessionError::Engine { .. }));
    assert!(conn.statement_cache().is_empty());
    assert_eq!(conn.long_for_query("SELECT 5", &[])?, 5);
    Ok(())
}

#[test]
fn test02_convenience_writes_round_trip_values() -> TestResult {
    let db = Database::open_in_memory()?;
    db.execute_batch(
        "CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT NOT NULL, active INTEGER, note TEXT)",
    )?;

    let id = db.insert(
        "people",
        &[
            ("name", RowValues::Text("ada".into())),
            ("active", RowValues::Bool(true)),
            ("note", RowValues::Null),
        ],
    )?;
    db.replace(
        "people",
        &[
            ("id", RowValues::Int(id)),
            ("name", RowValues::Text("ada lovelace".into())),
            ("active", RowValues::Bool(false)),
        ],
    )?;
    let changed = db.update(
        "people",
        &[("note", RowValues::Text("analyst".into()))],
        Some("id = ?"),
        &[RowValues::Int(id)],
    )?;
    assert_eq!(changed, 1);

    assert_eq!(
        db.string_for_query("SELECT name FROM people WHERE id = ?", &[RowValues::Int(id)])?,
        Some("ada lovelace".to_owned())
    );
    assert_eq!(
        db.string_for_query("SELECT note FROM people WHERE id = ?", &[RowValues::Int(id)])?,
        Some("analyst".to_owned())
    );

    assert_eq!(db.delete("people", Some("active = ?"), &[RowValues::Bool(false)])?, 1);
    assert_eq!(db.long_for_query("SELECT count(*) FROM people", &[])?, 0);
    assert!(db.update("people", &[], None, &[]).unwrap_err().is_usage());
    Ok(())
}

#[test]
fn test02_execute_counts_rows_changed_by_returning_statements() -> TestResult {
    let db = Database::open_in_memory()?;
    db.execute_batch("CREATE TABLE t (n INTEGER); INSERT INTO t VALUES (1), (2), (3);")?;

    assert_eq!(db.execute("INSERT INTO t (n) VALUES (4) RETURNING n", &[])?, 1);
    assert_eq!(
        db.execute("UPDATE t SET n = n * 10 WHERE n > ? RETURNING n", &[RowValues::Int(2)])?,
        2
    );
    assert_eq!(db.execute("DELETE FROM t WHERE n = 1 RETURNING *", &[])?, 1);
    assert_eq!(db.execute("SELECT n FROM t", &[])?, 0);
    assert_eq!(db.long_for_query("SELECT sum(n) FROM t", &[])?, 72);
    Ok(())
}

#[test]
fn test02_oversized_cache_capacity_opens_normally() -> TestResult {
    let db = Database::builder(MEMORY_DB_PATH)
        .max_statement_cache_size(usize::MAX)
        .build()?;
    db.execute_batch("CREATE TABLE t (n INTEGER)")?;
    db.execute("INSERT INTO t (n) VALUES (?)", &[RowValues::Int(1)])?;

    let conn = db.pool().acquire_write()?;
    assert_eq!(conn.statement_cache().capacity(), usize::MAX);
    assert_eq!(conn.statement_cache().len(), 1);
    Ok(())
}
