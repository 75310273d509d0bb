use std::sync::Arc;

use crate::error::SqlSessionError;
use crate::statement::{PreparedStatement, StatementCompiler};

/// Compiles statements on a rusqlite connection.
///
/// The native statement objects live in rusqlite's own statement cache, sized to match the
/// session cache; the handles returned here carry the metadata the session layer needs.
pub(crate) struct SqliteCompiler<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> SqliteCompiler<'a> {
    pub(crate) fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }
}

impl StatementCompiler for SqliteCompiler<'_> {
    type Handle = Arc<PreparedStatement>;

    fn compile(&mut self, sql: &str) -> Result<Self::Handle, SqlSessionError> {
        let stmt = self.conn.prepare_cached(sql)?;
        Ok(Arc::new(describe(sql, &stmt)))
    }

    fn finalize(&mut self, handle: Self::Handle) {
        drop(handle);
    }

    fn finalized_all(&mut self) {
        self.conn.flush_prepared_statement_cache();
    }
}

/// Session-level metadata for a compiled engine statement.
pub(crate) fn describe(sql: &str, stmt: &rusqlite::Statement<'_>) -> PreparedStatement {
    let column_names = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();
    PreparedStatement::new(
        sql.to_owned(),
        stmt.parameter_count(),
        column_names,
        stmt.readonly(),
    )
}
