//! Re-queryable cursors over materialized query windows.
//!
//! A cursor moves through `Active -> Deactivated -> (requery) -> Active`, and any state can
//! move to the terminal `Closed`. Cursors never hold a pool lease: requery takes the
//! connection it was opened on as an argument.

mod driver;

pub use driver::CursorDriver;

use crate::connection::Connection;
use crate::error::SqlSessionError;
use crate::results::{CustomDbRow, ResultSet};
use crate::types::RowValues;

/// Position before the first row.
const BEFORE_FIRST: isize = -1;

#[derive(Debug)]
pub struct Cursor {
    driver: CursorDriver,
    window: Option<ResultSet>,
    position: isize,
}

impl Cursor {
    pub(crate) fn new(driver: CursorDriver, window: ResultSet) -> Self {
        Self {
            driver,
            window: Some(window),
            position: BEFORE_FIRST,
        }
    }

    #[must_use]
    pub fn driver(&self) -> &CursorDriver {
        &self.driver
    }

    fn window(&self) -> Result<&ResultSet, SqlSessionError> {
        self.driver.ensure_connection_alive()?;
        self.window
            .as_ref()
            .ok_or_else(|| SqlSessionError::usage("cursor is deactivated; requery it first"))
    }

    /// Number of rows in the current window.
    ///
    /// # Errors
    /// Fails when the cursor is closed, deactivated, or its connection is gone.
    pub fn count(&self) -> Result<usize, SqlSessionError> {
        Ok(self.window()?.len())
    }

    /// Current row index; `-1` before the first row and `count()` after the last.
    #[must_use]
    pub fn position(&self) -> isize {
        self.position
    }

    /// Move to `position`, clamping to before-first / after-last. Returns whether the
    /// cursor is now on a row.
    ///
    /// # Errors
    /// Fails when the cursor is closed, deactivated, or its connection is gone.
    pub fn move_to_position(&mut self, position: isize) -> Result<bool, SqlSessionError> {
        let count = isize::try_from(self.count()?).unwrap_or(isize::MAX);
        self.position = position.clamp(BEFORE_FIRST, count);
        Ok(self.position >= 0 && self.position < count)
    }

    /// # Errors
    /// See [`Cursor::move_to_position`].
    pub fn move_by(&mut self, offset: isize) -> Result<bool, SqlSessionError> {
        self.move_to_position(self.position.saturating_add(offset))
    }

    /// # Errors
    /// See [`Cursor::move_to_position`].
    pub fn move_to_first(&mut self) -> Result<bool, SqlSessionError> {
        self.move_to_position(0)
    }

    /// # Errors
    /// See [`Cursor::move_to_position`].
    pub fn move_to_last(&mut self) -> Result<bool, SqlSessionError> {
        let count = isize::try_from(self.count()?).unwrap_or(isize::MAX);
        self.move_to_position(count - 1)
    }

    /// # Errors
    /// See [`Cursor::move_to_position`].
    pub fn move_to_next(&mut self) -> Result<bool, SqlSessionError> {
        self.move_by(1)
    }

    /// # Errors
    /// See [`Cursor::move_to_position`].
    pub fn move_to_previous(&mut self) -> Result<bool, SqlSessionError> {
        self.move_by(-1)
    }

    #[must_use]
    pub fn is_before_first(&self) -> bool {
        self.position == BEFORE_FIRST
    }

    /// The row under the cursor, or `None` when positioned off the rows.
    ///
    /// # Errors
    /// Fails when the cursor is closed, deactivated, or its connection is gone.
    pub fn row(&self) -> Result<Option<&CustomDbRow>, SqlSessionError> {
        let window = self.window()?;
        Ok(usize::try_from(self.position)
            .ok()
            .and_then(|idx| window.results.get(idx)))
    }

    /// A value of the current row by column name.
    ///
    /// # Errors
    /// Fails when the cursor is closed, deactivated, or its connection is gone.
    pub fn get(&self, column: &str) -> Result<Option<&RowValues>, SqlSessionError> {
        Ok(self.row()?.and_then(|row| row.get(column)))
    }

    /// Column names of the driving statement.
    ///
    /// # Errors
    /// Returns `SqlSessionError::CursorClosed` after close.
    pub fn column_names(&self) -> Result<Vec<String>, SqlSessionError> {
        self.driver
            .statement()
            .map(|stmt| stmt.column_names().to_vec())
            .ok_or(SqlSessionError::CursorClosed)
    }

    /// True while the cursor holds a row window.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.window.is_some() && !self.driver.is_closed()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.driver.is_closed()
    }

    /// Drop the row window, keeping the query, arguments and position for a later requery.
    pub fn deactivate(&mut self) {
        if self.driver.is_closed() {
            return;
        }
        self.window = None;
        self.driver.cursor_deactivated();
    }

    /// Re-run the query on `conn` and restore the previous position. If that row no longer
    /// exists the cursor lands before the first row.
    ///
    /// # Errors
    /// Returns `SqlSessionError::CursorClosed` after close,
    /// `SqlSessionError::ConnectionClosed` if the connection the cursor was opened on is
    /// gone, or the engine error. The cursor stays deactivated on failure.
    pub fn requery(&mut self, conn: &mut Connection) -> Result<(), SqlSessionError> {
        self.window = None;
        let window = self.driver.cursor_requeried(conn)?;
        let count = isize::try_from(window.len()).unwrap_or(isize::MAX);
        if self.position >= count {
            self.position = BEFORE_FIRST;
        }
        self.window = Some(window);
        Ok(())
    }

    /// Replace the bind arguments; they take effect on the next [`Cursor::requery`].
    pub fn set_bind_arguments(&mut self, bind_args: Vec<RowValues>) {
        self.driver.set_bind_arguments(bind_args);
    }

    /// Release the window and the statement. Idempotent.
    pub fn close(&mut self) {
        self.window = None;
        self.driver.cursor_closed();
    }
}
