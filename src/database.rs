use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::{Configuration, ConfigurationBuilder, MEMORY_DB_PATH};
use crate::connection::{AttachedDatabase, Connection};
use crate::error::SqlSessionError;
use crate::executor::{TaskExecutor, TaskHandle, ThreadExecutor};
use crate::pool::{ConnectionPool, PoolStats, PooledConnection};
use crate::results::ResultSet;
use crate::types::{LeaseIntent, RowValues};

/// Application-facing handle to one database.
///
/// Every convenience method leases a connection for the duration of the call. Use
/// [`Database::acquire`] to keep one connection across several statements or a transaction.
///
/// ```rust,no_run
/// use sql_session::{Database, RowValues};
///
/// # fn main() -> Result<(), sql_session::SqlSessionError> {
/// let db = Database::builder("app.db").foreign_keys(true).build()?;
/// db.execute_batch("CREATE TABLE IF NOT EXISTS t (n INTEGER)")?;
/// db.insert("t", &[("n", RowValues::Int(1))])?;
/// assert_eq!(db.long_for_query("SELECT count(*) FROM t", &[])?, 1);
/// db.close()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Database {
    pool: ConnectionPool,
    executor: Arc<dyn TaskExecutor>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl Database {
    #[must_use]
    pub fn builder(path: impl Into<String>) -> ConfigurationBuilder {
        ConfigurationBuilder::new(path)
    }

    /// Open a database whose background tasks run on a dedicated worker thread.
    ///
    /// # Errors
    /// Returns `SqlSessionError` if the configuration is invalid or the primary connection
    /// cannot be opened.
    pub fn open(config: Configuration) -> Result<Self, SqlSessionError> {
        let executor = Arc::new(ThreadExecutor::new("sql-session-worker")?);
        Self::open_with_executor(config, executor)
    }

    /// Open a database whose background tasks run on `executor`.
    ///
    /// # Errors
    /// Returns `SqlSessionError` if the configuration is invalid or the primary connection
    /// cannot be opened.
    pub fn open_with_executor(
        config: Configuration,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<Self, SqlSessionError> {
        let pool = ConnectionPool::open(config)?;
        Ok(Self { pool, executor })
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns the engine error if the database cannot be created.
    pub fn open_in_memory() -> Result<Self, SqlSessionError> {
        Self::open(Configuration::in_memory())
    }

    /// Close every connection. Further calls fail with `SqlSessionError::PoolClosed`.
    ///
    /// # Errors
    /// Returns the first error reported while closing a connection.
    pub fn close(&self) -> Result<(), SqlSessionError> {
        self.pool.close_all()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.pool.is_closed()
    }

    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    #[must_use]
    pub fn config(&self) -> &Configuration {
        self.pool.config()
    }

    #[must_use]
    pub fn label(&self) -> &str {
        self.pool.label()
    }

    /// # Errors
    /// See [`ConnectionPool::acquire`].
    pub fn acquire(
        &self,
        intent: LeaseIntent,
        timeout: Duration,
    ) -> Result<PooledConnection, SqlSessionError> {
        self.pool.acquire(intent, timeout)
    }

    fn read(&self) -> Result<PooledConnection, SqlSessionError> {
        self.pool.acquire_read()
    }

    fn write(&self) -> Result<PooledConnection, SqlSessionError> {
        self.pool.acquire_write()
    }

    /// Run `work` in a transaction on a write lease. The transaction commits when `work`
    /// returns `Ok` and rolls back otherwise. `work` may mark the frame successful itself.
    ///
    /// # Errors
    /// Returns the error from `work`, or from beginning or ending the transaction.
    pub fn transaction<R>(
        &self,
        work: impl FnOnce(&mut Connection) -> Result<R, SqlSessionError>,
    ) -> Result<R, SqlSessionError> {
        let mut conn = self.write()?;
        conn.begin_transaction(None)?;
        let outcome = work(&mut *conn).and_then(|value| {
            if !conn.is_transaction_marked_successful() {
                conn.set_transaction_successful()?;
            }
            Ok(value)
        });
        let ended = conn.end_transaction();
        let value = outcome?;
        ended?;
        Ok(value)
    }

    /// # Errors
    /// See [`Connection::execute`].
    pub fn execute(&self, sql: &str, args: &[RowValues]) -> Result<usize, SqlSessionError> {
        self.write()?.execute(sql, args)
    }

    /// # Errors
    /// See [`Connection::execute_batch`].
    pub fn execute_batch(&self, sql: &str) -> Result<(), SqlSessionError> {
        self.write()?.execute_batch(sql)
    }

    /// # Errors
    /// See [`Connection::query`].
    pub fn query(&self, sql: &str, args: &[RowValues]) -> Result<ResultSet, SqlSessionError> {
        self.read()?.query(sql, args)
    }

    /// # Errors
    /// See [`Connection::insert`].
    pub fn insert(&self, table: &str, values: &[(&str, RowValues)]) -> Result<i64, SqlSessionError> {
        self.write()?.insert(table, values)
    }

    /// # Errors
    /// See [`Connection::replace`].
    pub fn replace(&self, table: &str, values: &[(&str, RowValues)]) -> Result<i64, SqlSessionError> {
        self.write()?.replace(table, values)
    }

    /// # Errors
    /// See [`Connection::update`].
    pub fn update(
        &self,
        table: &str,
        values: &[(&str, RowValues)],
        where_clause: Option<&str>,
        where_args: &[RowValues],
    ) -> Result<usize, SqlSessionError> {
        self.write()?.update(table, values, where_clause, where_args)
    }

    /// # Errors
    /// See [`Connection::delete`].
    pub fn delete(
        &self,
        table: &str,
        where_clause: Option<&str>,
        where_args: &[RowValues],
    ) -> Result<usize, SqlSessionError> {
        self.write()?.delete(table, where_clause, where_args)
    }

    /// # Errors
    /// See [`Connection::long_for_query`].
    pub fn long_for_query(&self, sql: &str, args: &[RowValues]) -> Result<i64, SqlSessionError> {
        self.read()?.long_for_query(sql, args)
    }

    /// # Errors
    /// See [`Connection::string_for_query`].
    pub fn string_for_query(
        &self,
        sql: &str,
        args: &[RowValues],
    ) -> Result<Option<String>, SqlSessionError> {
        self.read()?.string_for_query(sql, args)
    }

    /// # Errors
    /// Returns the lease or engine error.
    pub fn version(&self) -> Result<i64, SqlSessionError> {
        self.read()?.version()
    }

    /// # Errors
    /// Returns the lease or engine error.
    pub fn set_version(&self, version: i64) -> Result<(), SqlSessionError> {
        self.write()?.set_version(version)
    }

    /// # Errors
    /// Returns the lease or engine error.
    pub fn needs_upgrade(&self, new_version: i64) -> Result<bool, SqlSessionError> {
        self.read()?.needs_upgrade(new_version)
    }

    /// # Errors
    /// Returns the lease or engine error.
    pub fn page_size(&self) -> Result<i64, SqlSessionError> {
        self.read()?.page_size()
    }

    /// # Errors
    /// Returns the lease or engine error.
    pub fn set_page_size(&self, bytes: i64) -> Result<(), SqlSessionError> {
        self.write()?.set_page_size(bytes)
    }

    /// # Errors
    /// Returns the lease or engine error.
    pub fn maximum_size(&self) -> Result<i64, SqlSessionError> {
        self.read()?.maximum_size()
    }

    /// # Errors
    /// Returns the lease or engine error.
    pub fn set_maximum_size(&self, bytes: i64) -> Result<i64, SqlSessionError> {
        self.write()?.set_maximum_size(bytes)
    }

    /// # Errors
    /// Returns the lease or engine error.
    pub fn journal_mode(&self) -> Result<String, SqlSessionError> {
        self.write()?.journal_mode()
    }

    /// Databases attached to the primary connection.
    ///
    /// # Errors
    /// Returns the lease or engine error.
    pub fn attached_databases(&self) -> Result<Vec<AttachedDatabase>, SqlSessionError> {
        self.write()?.attached_databases()
    }

    #[must_use]
    pub fn foreign_keys_enabled(&self) -> bool {
        self.pool.foreign_keys_enabled()
    }

    /// # Errors
    /// See [`ConnectionPool::set_foreign_keys_enabled`].
    pub fn set_foreign_key_constraints_enabled(&self, enabled: bool) -> Result<(), SqlSessionError> {
        self.pool.set_foreign_keys_enabled(enabled)
    }

    #[must_use]
    pub fn is_wal_enabled(&self) -> bool {
        self.pool.is_wal_enabled()
    }

    /// # Errors
    /// See [`ConnectionPool::set_wal_enabled`].
    pub fn set_wal_enabled(&self, enabled: bool) -> Result<bool, SqlSessionError> {
        self.pool.set_wal_enabled(enabled)
    }

    /// Close connections idle for longer than the configured idle timeout.
    pub fn reclaim_idle(&self) -> usize {
        self.pool.reclaim_idle()
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Run `work` on this database's executor.
    ///
    /// `work` should lease, use and release connections itself; leases must not cross the
    /// thread boundary mid-transaction.
    pub fn run_in_background<T, F>(&self, work: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, SqlSessionError> + Send + 'static,
    {
        let db = self.clone();
        self.executor.submit(move || work(&db))
    }

    /// See [`delete_database`].
    ///
    /// # Errors
    /// Returns the first file-system error other than a missing file.
    pub fn delete_database(path: impl AsRef<Path>) -> io::Result<bool> {
        delete_database(path)
    }
}

/// Delete a database file together with its journal, WAL, shared-memory and
/// master-journal siblings. Unrelated files next to it are left alone.
///
/// Returns whether the database file itself existed. In-memory paths are ignored.
///
/// # Errors
/// Returns the first file-system error other than a missing file.
pub fn delete_database(path: impl AsRef<Path>) -> io::Result<bool> {
    let path = path.as_ref();
    if path
        .to_str()
        .is_some_and(|p| p.eq_ignore_ascii_case(MEMORY_DB_PATH))
    {
        return Ok(false);
    }

    let existed = remove_if_exists(path)?;
    for suffix in ["-journal", "-shm", "-wal"] {
        remove_if_exists(&with_suffix(path, suffix))?;
    }

    if let Some(file_name) = path.file_name().and_then(|name| name.to_str()) {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let master_journal_prefix = format!("{file_name}-mj");
        match fs::read_dir(&dir) {
            Ok(entries) => {
                for entry in entries {
                    let entry = entry?;
                    if entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| name.starts_with(&master_journal_prefix))
                    {
                        remove_if_exists(&entry.path())?;
                    }
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
    }

    let label = Configuration::new(path.to_string_lossy()).label();
    if existed {
        info!(db = %label, "deleted database");
    } else {
        debug!(db = %label, "no database to delete");
    }
    Ok(existed)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}
