//! Compiled statements and the per-connection statement cache.

mod cache;
mod kind;

pub use cache::{
    Acquired, CacheStats, DEFAULT_STATEMENT_CACHE_SIZE, StatementCache, StatementCompiler,
};
pub use kind::StatementKind;

/// Metadata of a statement the engine has compiled.
///
/// Handles are shared through `Arc`, so a cursor keeps its statement alive even after the
/// cache that produced it has evicted or invalidated the entry.
#[derive(Debug)]
pub struct PreparedStatement {
    sql: String,
    kind: StatementKind,
    parameter_count: usize,
    column_names: Vec<String>,
    read_only: bool,
}

impl PreparedStatement {
    pub(crate) fn new(
        sql: String,
        parameter_count: usize,
        column_names: Vec<String>,
        read_only: bool,
    ) -> Self {
        let kind = StatementKind::classify(&sql);
        Self {
            sql,
            kind,
            parameter_count,
            column_names,
            read_only,
        }
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// True when the engine reports the statement cannot write to the database.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}
