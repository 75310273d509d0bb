use rusqlite::types::Value;

use crate::cursor::{Cursor, CursorDriver};
use crate::engine::build_result_set;
use crate::error::SqlSessionError;
use crate::results::ResultSet;
use crate::types::RowValues;

use super::Connection;

impl Connection {
    /// Run a query and materialize every row.
    ///
    /// # Errors
    /// Returns `SqlSessionError::Usage` on an argument count mismatch, or the annotated
    /// engine error.
    pub fn query(&mut self, sql: &str, args: &[RowValues]) -> Result<ResultSet, SqlSessionError> {
        let (result_set, _) = self.run_prepared(sql, args, build_result_set)?;
        Ok(result_set)
    }

    /// Run a query and return a cursor positioned before the first row.
    ///
    /// # Errors
    /// Same as [`Connection::query`].
    pub fn raw_query(&mut self, sql: &str, args: &[RowValues]) -> Result<Cursor, SqlSessionError> {
        CursorDriver::new(sql).query(self, args.to_vec())
    }

    /// The first column of the first row as an integer.
    ///
    /// # Errors
    /// Returns the annotated `QueryReturnedNoRows` engine error when the query is empty.
    pub fn long_for_query(&mut self, sql: &str, args: &[RowValues]) -> Result<i64, SqlSessionError> {
        let (value, _) = self.run_prepared(sql, args, |stmt, params| {
            stmt.query_row(&params.as_refs()[..], |row| row.get::<_, i64>(0))
        })?;
        Ok(value)
    }

    /// The first column of the first row rendered as text; `None` when that value is NULL.
    ///
    /// # Errors
    /// Returns the annotated `QueryReturnedNoRows` engine error when the query is empty.
    pub fn string_for_query(
        &mut self,
        sql: &str,
        args: &[RowValues],
    ) -> Result<Option<String>, SqlSessionError> {
        let (value, _) = self.run_prepared(sql, args, |stmt, params| {
            stmt.query_row(&params.as_refs()[..], |row| row.get::<_, Value>(0))
        })?;
        Ok(match value {
            Value::Null => None,
            Value::Integer(i) => Some(i.to_string()),
            Value::Real(f) => Some(f.to_string()),
            Value::Text(s) => Some(s),
            Value::Blob(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        })
    }
}
