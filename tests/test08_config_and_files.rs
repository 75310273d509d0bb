use std::fs;
use std::time::Duration;

use sql_session::{
    Configuration, ConfigurationBuilder, Database, MEMORY_DB_PATH, SqlSessionError,
    delete_database,
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn config_error(result: Result<Configuration, SqlSessionError>) -> String {
    match result {
        Err(SqlSessionError::ConfigError(message)) => message,
        other => panic!("expected a configuration error, got {other:?}"),
    }
}

#[test]
fn test08_invalid_configurations_are_rejected() {
    assert!(config_error(ConfigurationBuilder::new("  ").finish()).contains("path"));
    assert!(
        config_error(ConfigurationBuilder::new("a.db").lookaside(-1, 10).finish())
            .contains("slot size")
    );
    assert!(
        config_error(ConfigurationBuilder::new("a.db").lookaside(64, -1).finish())
            .contains("slot count")
    );
    assert!(
        config_error(
            ConfigurationBuilder::new("a.db")
                .idle_timeout(Duration::ZERO)
                .finish()
        )
        .contains("idle")
    );
    assert!(
        config_error(
            ConfigurationBuilder::new(":MEMORY:")
                .write_ahead_logging(true)
                .finish()
        )
        .contains("in-memory")
    );
    assert!(
        config_error(
            ConfigurationBuilder::new("a.db")
                .read_only(true)
                .write_ahead_logging(true)
                .finish()
        )
        .contains("read-only")
    );

    let mut config = Configuration::new("a.db");
    config.max_reader_connections = 0;
    assert!(config.validate().is_ok(), "zero readers only disables reader leases");
}

#[test]
fn test08_builder_settings_reach_the_pool() -> TestResult {
    let db = Database::builder(MEMORY_DB_PATH)
        .max_statement_cache_size(3)
        .lookaside(128, 64)
        .busy_timeout(Duration::from_millis(100))
        .lease_timeout(Duration::from_millis(10))
        .build()?;

    let config = db.config();
    assert_eq!(config.max_statement_cache_size, 3);
    assert!(config.is_in_memory());
    assert_eq!(config.lease_timeout, Duration::from_millis(10));

    let conn = db.pool().acquire_write()?;
    assert_eq!(conn.statement_cache().capacity(), 3);
    assert!(db.pool().acquire_read().unwrap_err().is_timeout());
    Ok(())
}

#[test]
fn test08_labels_mask_email_addresses() {
    let config = Configuration::new("/data/alice.smith@example.com/notes.db");
    assert_eq!(config.label(), "/data/XX@YY/notes.db");
    assert_eq!(Configuration::new("/data/plain.db").label(), "/data/plain.db");
}

#[test]
fn test08_missing_file_without_create_fails() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("absent.db");
    let result = Database::builder(path.to_string_lossy())
        .create_if_necessary(false)
        .build();
    assert!(result.unwrap_err().engine_error().is_some());
    assert!(!path.exists());
    Ok(())
}

#[test]
fn test08_read_only_database_rejects_writes() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("ro.db");
    {
        let db = Database::builder(path.to_string_lossy()).build()?;
        db.execute_batch("CREATE TABLE t (n INTEGER); INSERT INTO t VALUES (9);")?;
        db.close()?;
    }

    let db = Database::builder(path.to_string_lossy())
        .read_only(true)
        .build()?;
    assert_eq!(db.long_for_query("SELECT n FROM t", &[])?, 9);
    assert!(db.execute("INSERT INTO t VALUES (10)", &[]).is_err());
    assert!(!db.set_wal_enabled(true)?);
    assert!(db.pool().acquire_write()?.is_read_only());
    Ok(())
}

#[test]
fn test08_delete_database_removes_sidecar_files() -> TestResult {
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("app.db");
    let siblings = ["app.db-journal", "app.db-wal", "app.db-shm", "app.db-mj0A1B2C"];
    fs::write(&db_path, b"")?;
    for name in siblings {
        fs::write(dir.path().join(name), b"")?;
    }
    let unrelated = dir.path().join("app.db.bak");
    fs::write(&unrelated, b"")?;

    assert!(delete_database(&db_path)?);
    assert!(!db_path.exists());
    for name in siblings {
        assert!(!dir.path().join(name).exists(), "{name} should be gone");
    }
    assert!(unrelated.exists());

    assert!(!Database::delete_database(&db_path)?);
    assert!(!delete_database(MEMORY_DB_PATH)?);
    Ok(())
}

#[test]
fn test08_deleted_database_starts_fresh() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("fresh.db");
    {
        let db = Database::builder(path.to_string_lossy())
            .write_ahead_logging(true)
            .build()?;
        db.execute_batch("CREATE TABLE t (n INTEGER)")?;
        db.close()?;
    }
    assert!(delete_database(&path)?);

    let db = Database::builder(path.to_string_lossy()).build()?;
    assert_eq!(
        db.long_for_query("SELECT count(*) FROM sqlite_master", &[])?,
        0
    );
    assert_eq!(db.journal_mode()?, "delete");
    Ok(())
}
