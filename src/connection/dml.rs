use std::fmt::Write as _;

use crate::error::SqlSessionError;
use crate::statement::StatementKind;
use crate::types::RowValues;

use super::Connection;

/// Quote an identifier for interpolation into generated SQL.
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn reject_transaction_control(sql: &str) -> Result<(), SqlSessionError> {
    if StatementKind::classify(sql).is_transaction_control() {
        return Err(SqlSessionError::usage(format!(
            "use begin_transaction/end_transaction instead of executing `{sql}`"
        )));
    }
    Ok(())
}

impl Connection {
    /// Execute a single statement with positional arguments, returning the number of rows
    /// changed. Rows produced by the statement, as with `RETURNING`, are stepped through and
    /// discarded.
    ///
    /// # Errors
    /// Returns `SqlSessionError::Usage` for transaction-control statements or an argument
    /// count mismatch, or the annotated engine error.
    pub fn execute(&mut self, sql: &str, args: &[RowValues]) -> Result<usize, SqlSessionError> {
        reject_transaction_control(sql)?;
        let (changed, _) = self.run_prepared(sql, args, |stmt, params| {
            if stmt.column_count() == 0 {
                return stmt.execute(&params.as_refs()[..]).map(Some);
            }
            let mut rows = stmt.query(&params.as_refs()[..])?;
            while rows.next()?.is_some() {}
            drop(rows);
            Ok(stmt.readonly().then_some(0))
        })?;
        Ok(changed.unwrap_or_else(|| self.last_changes()))
    }

    /// Execute a script of semicolon-separated statements without arguments.
    ///
    /// The statement cache is flushed afterwards since the script may change the schema.
    ///
    /// # Errors
    /// Returns `SqlSessionError::Usage` if any statement of the script is transaction
    /// control, or the annotated engine error.
    pub fn execute_batch(&mut self, sql: &str) -> Result<(), SqlSessionError> {
        if StatementKind::classify_script(sql)
            .into_iter()
            .any(StatementKind::is_transaction_control)
        {
            return Err(SqlSessionError::usage(format!(
                "use begin_transaction/end_transaction instead of executing `{sql}`"
            )));
        }
        let result = self.run_batch(sql);
        self.invalidate_statement_cache();
        result
    }

    /// Insert a row, returning its rowid. An empty column list inserts default values.
    ///
    /// # Errors
    /// Returns the annotated engine error.
    pub fn insert(
        &mut self,
        table: &str,
        values: &[(&str, RowValues)],
    ) -> Result<i64, SqlSessionError> {
        self.insert_with_conflict(table, values, "INSERT")
    }

    /// Insert a row, replacing any row that violates a uniqueness constraint.
    ///
    /// # Errors
    /// Returns the annotated engine error.
    pub fn replace(
        &mut self,
        table: &str,
        values: &[(&str, RowValues)],
    ) -> Result<i64, SqlSessionError> {
        self.insert_with_conflict(table, values, "INSERT OR REPLACE")
    }

    fn insert_with_conflict(
        &mut self,
        table: &str,
        values: &[(&str, RowValues)],
        verb: &str,
    ) -> Result<i64, SqlSessionError> {
        let mut sql = format!("{verb} INTO {}", quote_identifier(table));
        if values.is_empty() {
            sql.push_str(" DEFAULT VALUES");
        } else {
            let columns: Vec<String> = values.iter().map(|(c, _)| quote_identifier(c)).collect();
            let placeholders = vec!["?"; values.len()].join(", ");
            let _ = write!(sql, " ({}) VALUES ({placeholders})", columns.join(", "));
        }
        let args: Vec<RowValues> = values.iter().map(|(_, v)| v.clone()).collect();
        let (row_id, _) = self.run_prepared(&sql, &args, |stmt, params| {
            stmt.insert(&params.as_refs()[..])
        })?;
        Ok(row_id)
    }

    /// Update rows matching `where_clause` (all rows when `None`), returning the number of
    /// rows changed. `where_args` bind after the new values.
    ///
    /// # Errors
    /// Returns `SqlSessionError::Usage` if `values` is empty, or the annotated engine error.
    pub fn update(
        &mut self,
        table: &str,
        values: &[(&str, RowValues)],
        where_clause: Option<&str>,
        where_args: &[RowValues],
    ) -> Result<usize, SqlSessionError> {
        if values.is_empty() {
            return Err(SqlSessionError::usage("update requires at least one column"));
        }
        let assignments: Vec<String> = values
            .iter()
            .map(|(c, _)| format!("{} = ?", quote_identifier(c)))
            .collect();
        let mut sql = format!(
            "UPDATE {} SET {}",
            quote_identifier(table),
            assignments.join(", ")
        );
        if let Some(clause) = where_clause {
            let _ = write!(sql, " WHERE {clause}");
        }
        let mut args: Vec<RowValues> = values.iter().map(|(_, v)| v.clone()).collect();
        args.extend_from_slice(where_args);
        self.execute(&sql, &args)
    }

    /// Delete rows matching `where_clause` (all rows when `None`).
    ///
    /// # Errors
    /// Returns the annotated engine error.
    pub fn delete(
        &mut self,
        table: &str,
        where_clause: Option<&str>,
        where_args: &[RowValues],
    ) -> Result<usize, SqlSessionError> {
        let mut sql = format!("DELETE FROM {}", quote_identifier(table));
        if let Some(clause) = where_clause {
            let _ = write!(sql, " WHERE {clause}");
        }
        self.execute(&sql, where_args)
    }
}
