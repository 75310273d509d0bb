use serde::Serialize;

use crate::error::SqlSessionError;

use super::Connection;

/// A database attached to a connection, as reported by `PRAGMA database_list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachedDatabase {
    pub name: String,
    /// Empty for in-memory and temporary databases.
    pub file: String,
}

impl AttachedDatabase {
    /// `main` and `temp` exist on every connection.
    #[must_use]
    pub fn is_builtin(&self) -> bool {
        self.name == "main" || self.name == "temp"
    }
}

impl Connection {
    fn pragma_i64(&self, name: &str) -> Result<i64, SqlSessionError> {
        self.conn
            .pragma_query_value(None, name, |row| row.get::<_, i64>(0))
            .map_err(|source| self.engine_error(&format!("PRAGMA {name}"), source))
    }

    fn set_pragma_i64(&mut self, name: &str, value: i64) -> Result<(), SqlSessionError> {
        self.touch();
        self.conn
            .pragma_update(None, name, value)
            .map_err(|source| self.engine_error(&format!("PRAGMA {name} = {value}"), source))
    }

    /// The schema version stored in `PRAGMA user_version`.
    ///
    /// # Errors
    /// Returns the annotated engine error.
    pub fn version(&self) -> Result<i64, SqlSessionError> {
        self.pragma_i64("user_version")
    }

    /// # Errors
    /// Returns the annotated engine error.
    pub fn set_version(&mut self, version: i64) -> Result<(), SqlSessionError> {
        self.set_pragma_i64("user_version", version)
    }

    /// True if the stored schema version is older than `new_version`.
    ///
    /// # Errors
    /// Returns the annotated engine error.
    pub fn needs_upgrade(&self, new_version: i64) -> Result<bool, SqlSessionError> {
        Ok(self.version()? < new_version)
    }

    /// # Errors
    /// Returns the annotated engine error.
    pub fn page_size(&self) -> Result<i64, SqlSessionError> {
        self.pragma_i64("page_size")
    }

    /// Takes effect when the database is created or next vacuumed.
    ///
    /// # Errors
    /// Returns the annotated engine error.
    pub fn set_page_size(&mut self, bytes: i64) -> Result<(), SqlSessionError> {
        self.set_pragma_i64("page_size", bytes)
    }

    /// Maximum database size in bytes.
    ///
    /// # Errors
    /// Returns the annotated engine error.
    pub fn maximum_size(&self) -> Result<i64, SqlSessionError> {
        Ok(self.pragma_i64("max_page_count")? * self.page_size()?)
    }

    /// Set the maximum database size, rounded up to a whole page. Returns the size the
    /// engine accepted, which is never below the current database size.
    ///
    /// # Errors
    /// Returns the annotated engine error.
    pub fn set_maximum_size(&mut self, bytes: i64) -> Result<i64, SqlSessionError> {
        let page_size = self.page_size()?;
        let mut pages = bytes / page_size;
        if bytes % page_size != 0 {
            pages += 1;
        }
        self.touch();
        let accepted = self
            .conn
            .pragma_update_and_check(None, "max_page_count", pages, |row| row.get::<_, i64>(0))
            .map_err(|source| {
                self.engine_error(&format!("PRAGMA max_page_count = {pages}"), source)
            })?;
        Ok(accepted * page_size)
    }

    /// # Errors
    /// Returns the annotated engine error.
    pub fn foreign_keys_enabled(&self) -> Result<bool, SqlSessionError> {
        Ok(self.pragma_i64("foreign_keys")? != 0)
    }

    /// Toggle foreign-key enforcement on this connection only.
    ///
    /// # Errors
    /// Returns `SqlSessionError::Usage` while a transaction is open, or the annotated
    /// engine error.
    pub fn set_foreign_key_constraints_enabled(
        &mut self,
        enabled: bool,
    ) -> Result<(), SqlSessionError> {
        if self.in_transaction() {
            return Err(SqlSessionError::usage(
                "foreign key enforcement cannot change while a transaction is open",
            ));
        }
        self.set_pragma_i64("foreign_keys", i64::from(enabled))
    }

    /// The journal mode reported by the engine, lowercased (`delete`, `wal`, `memory`, ...).
    ///
    /// # Errors
    /// Returns the annotated engine error.
    pub fn journal_mode(&self) -> Result<String, SqlSessionError> {
        self.conn
            .pragma_query_value(None, "journal_mode", |row| row.get::<_, String>(0))
            .map(|mode| mode.to_ascii_lowercase())
            .map_err(|source| self.engine_error("PRAGMA journal_mode", source))
    }

    /// Switch the journal mode between WAL and rollback-journal (`DELETE`).
    pub(crate) fn set_write_ahead_logging(&mut self, enabled: bool) -> Result<(), SqlSessionError> {
        let requested = if enabled { "wal" } else { "delete" };
        let sql = format!("PRAGMA journal_mode = {requested}");
        let mode = self
            .conn
            .pragma_update_and_check(None, "journal_mode", requested, |row| {
                row.get::<_, String>(0)
            })
            .map_err(|source| self.engine_error(&sql, source))?;
        if !mode.eq_ignore_ascii_case(requested) {
            return Err(SqlSessionError::ExecutionError(format!(
                "could not change journal mode to {requested}; engine reports {mode}"
            )));
        }
        if enabled {
            self.set_pragma_i64("synchronous", 1)?;
        }
        Ok(())
    }

    /// Every database attached to this connection, including `main` and `temp`.
    ///
    /// # Errors
    /// Returns the annotated engine error.
    pub fn attached_databases(&self) -> Result<Vec<AttachedDatabase>, SqlSessionError> {
        let sql = "PRAGMA database_list";
        let list = || -> Result<Vec<AttachedDatabase>, rusqlite::Error> {
            let mut stmt = self.conn.prepare(sql)?;
            let rows = stmt.query_map([], |row| {
                Ok(AttachedDatabase {
                    name: row.get(1)?,
                    file: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                })
            })?;
            rows.collect()
        };
        list().map_err(|source| self.engine_error(sql, source))
    }

    /// True if anything beyond `main` and `temp` is attached.
    ///
    /// # Errors
    /// Returns the annotated engine error.
    pub fn has_attached_databases(&self) -> Result<bool, SqlSessionError> {
        Ok(self
            .attached_databases()?
            .iter()
            .any(|db| !db.is_builtin()))
    }
}
