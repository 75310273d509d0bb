use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::database::Database;
use crate::error::SqlSessionError;
use crate::executor::TaskExecutor;
use crate::statement::DEFAULT_STATEMENT_CACHE_SIZE;

/// Special path used by private in-memory databases.
pub const MEMORY_DB_PATH: &str = ":memory:";

static EMAIL_IN_DB_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\w.\-]+@[\w.\-]+").expect("e-mail regex is valid"));

/// How the database file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    pub read_only: bool,
    pub create_if_necessary: bool,
    /// Open the database in write-ahead logging mode.
    pub enable_write_ahead_logging: bool,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self {
            read_only: false,
            create_if_necessary: true,
            enable_write_ahead_logging: false,
        }
    }
}

impl OpenFlags {
    pub(crate) fn to_engine(self, reader: bool) -> rusqlite::OpenFlags {
        let mut flags = rusqlite::OpenFlags::SQLITE_OPEN_URI | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if self.read_only || reader {
            flags |= rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY;
        } else {
            flags |= rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE;
            if self.create_if_necessary {
                flags |= rusqlite::OpenFlags::SQLITE_OPEN_CREATE;
            }
        }
        flags
    }
}

/// Size of the engine's per-connection lookaside allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookasideConfig {
    /// Bytes per slot.
    pub slot_size: i32,
    pub slot_count: i32,
}

/// Settings shared by the pool and every connection it opens.
///
/// ```
/// use sql_session::Configuration;
/// use std::time::Duration;
///
/// let config = Configuration {
///     max_statement_cache_size: 10,
///     idle_timeout: Some(Duration::from_secs(60)),
///     ..Configuration::new("app.db")
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct Configuration {
    pub path: String,
    pub open_flags: OpenFlags,
    /// Compiled statements kept per connection. Zero disables caching.
    ///
    /// Default: 25
    pub max_statement_cache_size: usize,
    pub foreign_keys_enabled: bool,
    /// `None` keeps the engine's default lookaside configuration.
    pub lookaside: Option<LookasideConfig>,
    /// Idle connections older than this are closed by the reaper. `None` keeps them open.
    pub idle_timeout: Option<Duration>,
    /// Read-only connections opened next to the primary connection in WAL mode.
    ///
    /// Default: 4
    pub max_reader_connections: usize,
    /// Wait bound used when a lease is taken without an explicit timeout.
    ///
    /// Default: 30 seconds
    pub lease_timeout: Duration,
    /// How long `close` waits for outstanding leases.
    ///
    /// Default: 5 seconds
    pub shutdown_grace: Duration,
    /// Engine busy handler timeout.
    ///
    /// Default: 2.5 seconds
    pub busy_timeout: Duration,
}

impl Configuration {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            open_flags: OpenFlags::default(),
            max_statement_cache_size: DEFAULT_STATEMENT_CACHE_SIZE,
            foreign_keys_enabled: false,
            lookaside: None,
            idle_timeout: None,
            max_reader_connections: 4,
            lease_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
            busy_timeout: Duration::from_millis(2500),
        }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(MEMORY_DB_PATH)
    }

    /// True for the private in-memory database path, compared case-insensitively.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.path.eq_ignore_ascii_case(MEMORY_DB_PATH)
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.open_flags.read_only
    }

    /// The path with e-mail-like fragments masked, for log output.
    #[must_use]
    pub fn label(&self) -> String {
        if !self.path.contains('@') {
            return self.path.clone();
        }
        EMAIL_IN_DB_PATH.replace_all(&self.path, "XX@YY").into_owned()
    }

    /// Number of connections the pool may hold open at once.
    pub(crate) fn max_connections(&self, wal_enabled: bool) -> usize {
        if wal_enabled {
            1 + self.max_reader_connections
        } else {
            1
        }
    }

    /// Check the invariants every pool relies on.
    ///
    /// # Errors
    /// Returns `SqlSessionError::ConfigError` describing the first violated rule.
    pub fn validate(&self) -> Result<(), SqlSessionError> {
        if self.path.trim().is_empty() {
            return Err(SqlSessionError::ConfigError(
                "database path must not be empty".into(),
            ));
        }
        if let Some(lookaside) = self.lookaside {
            if lookaside.slot_size < 0 {
                return Err(SqlSessionError::ConfigError(format!(
                    "negative lookaside slot size: {}",
                    lookaside.slot_size
                )));
            }
            if lookaside.slot_count < 0 {
                return Err(SqlSessionError::ConfigError(format!(
                    "negative lookaside slot count: {}",
                    lookaside.slot_count
                )));
            }
        }
        if self.idle_timeout == Some(Duration::ZERO) {
            return Err(SqlSessionError::ConfigError(
                "idle connection timeout must be positive".into(),
            ));
        }
        if self.open_flags.enable_write_ahead_logging && self.is_in_memory() {
            return Err(SqlSessionError::ConfigError(
                "write-ahead logging is not available for in-memory databases".into(),
            ));
        }
        if self.open_flags.enable_write_ahead_logging && self.open_flags.read_only {
            return Err(SqlSessionError::ConfigError(
                "write-ahead logging cannot be enabled on a read-only database".into(),
            ));
        }
        Ok(())
    }
}

/// Fluent builder for [`Configuration`].
#[derive(Debug, Clone)]
pub struct ConfigurationBuilder {
    config: Configuration,
    lookaside: Option<(i32, i32)>,
}

impl ConfigurationBuilder {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            config: Configuration::new(path),
            lookaside: None,
        }
    }

    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.config.open_flags.read_only = read_only;
        self
    }

    #[must_use]
    pub fn create_if_necessary(mut self, create: bool) -> Self {
        self.config.open_flags.create_if_necessary = create;
        self
    }

    #[must_use]
    pub fn write_ahead_logging(mut self, enabled: bool) -> Self {
        self.config.open_flags.enable_write_ahead_logging = enabled;
        self
    }

    #[must_use]
    pub fn max_statement_cache_size(mut self, size: usize) -> Self {
        self.config.max_statement_cache_size = size;
        self
    }

    #[must_use]
    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.config.foreign_keys_enabled = enabled;
        self
    }

    /// Both values must be non-negative; `(0, 0)` disables lookaside.
    #[must_use]
    pub fn lookaside(mut self, slot_size: i32, slot_count: i32) -> Self {
        self.lookaside = Some((slot_size, slot_count));
        self
    }

    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn max_reader_connections(mut self, readers: usize) -> Self {
        self.config.max_reader_connections = readers;
        self
    }

    #[must_use]
    pub fn lease_timeout(mut self, timeout: Duration) -> Self {
        self.config.lease_timeout = timeout;
        self
    }

    #[must_use]
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    #[must_use]
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.config.busy_timeout = timeout;
        self
    }

    /// Validate and return the configuration.
    ///
    /// # Errors
    /// Returns `SqlSessionError::ConfigError` if any setting is out of range.
    pub fn finish(mut self) -> Result<Configuration, SqlSessionError> {
        self.config.lookaside = self
            .lookaside
            .map(|(slot_size, slot_count)| LookasideConfig {
                slot_size,
                slot_count,
            });
        self.config.validate()?;
        Ok(self.config)
    }

    /// Open a [`Database`] with this configuration.
    ///
    /// # Errors
    /// Returns `SqlSessionError` if validation fails or the primary connection cannot be opened.
    pub fn build(self) -> Result<Database, SqlSessionError> {
        Database::open(self.finish()?)
    }

    /// Open a [`Database`] whose background tasks run on `executor`.
    ///
    /// # Errors
    /// Returns `SqlSessionError` if validation fails or the primary connection cannot be opened.
    pub fn build_with_executor(
        self,
        executor: std::sync::Arc<dyn TaskExecutor>,
    ) -> Result<Database, SqlSessionError> {
        Database::open_with_executor(self.finish()?, executor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ConfigurationBuilder::new("app.db").finish().unwrap();
        assert_eq!(config.max_statement_cache_size, 25);
        assert!(!config.foreign_keys_enabled);
        assert!(config.lookaside.is_none());
        assert!(config.idle_timeout.is_none());
        assert!(!config.is_in_memory());
    }

    #[test]
    fn memory_path_is_case_insensitive() {
        assert!(Configuration::new(":MEMORY:").is_in_memory());
        assert!(Configuration::in_memory().is_in_memory());
        assert!(!Configuration::new("memory.db").is_in_memory());
    }

    #[test]
    fn rejects_negative_lookaside() {
        let err = ConfigurationBuilder::new("app.db")
            .lookaside(-1, 0)
            .finish()
            .unwrap_err();
        assert!(matches!(err, SqlSessionError::ConfigError(_)));
        assert!(
            ConfigurationBuilder::new("app.db")
                .lookaside(0, -10)
                .finish()
                .is_err()
        );
        let config = ConfigurationBuilder::new("app.db")
            .lookaside(0, 0)
            .finish()
            .unwrap();
        assert_eq!(
            config.lookaside,
            Some(LookasideConfig {
                slot_size: 0,
                slot_count: 0
            })
        );
    }

    #[test]
    fn rejects_zero_idle_timeout() {
        assert!(
            ConfigurationBuilder::new("app.db")
                .idle_timeout(Duration::ZERO)
                .finish()
                .is_err()
        );
    }

    #[test]
    fn rejects_wal_for_memory_database() {
        assert!(
            ConfigurationBuilder::new(MEMORY_DB_PATH)
                .write_ahead_logging(true)
                .finish()
                .is_err()
        );
    }

    #[test]
    fn label_masks_email_addresses() {
        let config = Configuration::new("/data/user/jane.doe@example.com/mail.db");
        assert_eq!(config.label(), "/data/user/XX@YY/mail.db");
        assert_eq!(Configuration::new("plain.db").label(), "plain.db");
    }

    #[test]
    fn reader_connections_only_count_in_wal_mode() {
        let config = Configuration::new("app.db");
        assert_eq!(config.max_connections(false), 1);
        assert_eq!(config.max_connections(true), 5);
    }
}
