use std::sync::Arc;

use rusqlite::Statement;
use rusqlite::types::Value;

use crate::results::ResultSet;
use crate::types::RowValues;

use super::params::Params;

/// Extract a `RowValues` from a `SQLite` row.
///
/// # Errors
/// Returns the engine error if the column cannot be read.
pub fn sqlite_extract_value_sync(
    row: &rusqlite::Row,
    idx: usize,
) -> Result<RowValues, rusqlite::Error> {
    let value: Value = row.get(idx)?;
    Ok(match value {
        Value::Null => RowValues::Null,
        Value::Integer(i) => RowValues::Int(i),
        Value::Real(f) => RowValues::Float(f),
        Value::Text(s) => RowValues::Text(s),
        Value::Blob(b) => RowValues::Blob(b),
    })
}

/// Bind `params` to `stmt`, step it to completion and materialize every row.
///
/// Column metadata is read only after stepping: the engine re-prepares a statement whose
/// schema changed underneath it on the first step, and the column set may differ afterwards.
///
/// # Errors
/// Returns the engine error if binding, stepping or reading a column fails.
pub fn build_result_set(stmt: &mut Statement, params: &Params) -> Result<ResultSet, rusqlite::Error> {
    let param_refs = params.as_refs();
    let mut rows = Vec::new();
    {
        let mut rows_iter = stmt.query(&param_refs[..])?;
        while let Some(row) = rows_iter.next()? {
            let col_count = row.as_ref().column_count();
            let mut row_values = Vec::with_capacity(col_count);
            for i in 0..col_count {
                row_values.push(sqlite_extract_value_sync(row, i)?);
            }
            rows.push(row_values);
        }
    }

    let column_names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();
    let mut result_set = ResultSet::with_capacity(rows.len());
    result_set.set_column_names(Arc::new(column_names));
    for row_values in rows {
        result_set.add_row_values(row_values);
    }
    Ok(result_set)
}
