use std::sync::{Arc, Weak};

use tracing::debug;

use crate::connection::Connection;
use crate::engine::build_result_set;
use crate::error::SqlSessionError;
use crate::results::ResultSet;
use crate::statement::PreparedStatement;
use crate::types::{ConnectionId, RowValues};

use super::Cursor;

/// The connection a cursor was opened on, held without keeping it alive.
#[derive(Debug, Clone)]
struct BoundConnection {
    id: ConnectionId,
    liveness: Weak<()>,
}

/// Re-executes a cursor's query on demand.
///
/// The driver keeps the SQL, the bind arguments and its own reference to the compiled
/// statement, so the cursor survives cache eviction or invalidation on its connection.
#[derive(Debug)]
pub struct CursorDriver {
    sql: String,
    bind_args: Vec<RowValues>,
    statement: Option<Arc<PreparedStatement>>,
    bound: Option<BoundConnection>,
    closed: bool,
}

impl CursorDriver {
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            bind_args: Vec::new(),
            statement: None,
            bound: None,
            closed: false,
        }
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn bind_args(&self) -> &[RowValues] {
        &self.bind_args
    }

    /// The compiled statement; `None` once the cursor is closed.
    #[must_use]
    pub fn statement(&self) -> Option<&Arc<PreparedStatement>> {
        self.statement.as_ref()
    }

    /// The connection the cursor was opened on.
    #[must_use]
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.bound.as_ref().map(|bound| bound.id)
    }

    /// Compile, bind and execute the query on `conn`, returning a cursor positioned
    /// before the first row.
    ///
    /// # Errors
    /// Returns `SqlSessionError::Usage` if the argument count does not match the
    /// statement, or the annotated engine error.
    pub fn query(
        mut self,
        conn: &mut Connection,
        bind_args: Vec<RowValues>,
    ) -> Result<Cursor, SqlSessionError> {
        let window = self.execute(conn, &bind_args)?;
        self.bind_args = bind_args;
        Ok(Cursor::new(self, window))
    }

    fn execute(
        &mut self,
        conn: &mut Connection,
        args: &[RowValues],
    ) -> Result<ResultSet, SqlSessionError> {
        let (window, statement) = conn.run_prepared(&self.sql, args, build_result_set)?;
        self.statement = Some(statement);
        self.bound = Some(BoundConnection {
            id: conn.id(),
            liveness: conn.liveness_token(),
        });
        Ok(window)
    }

    /// The consumer let go of the cursor's rows without closing it.
    pub fn cursor_deactivated(&mut self) {
        debug!(sql = %self.sql, "cursor deactivated");
    }

    /// Re-run the query with the current bind arguments.
    ///
    /// # Errors
    /// Returns `SqlSessionError::CursorClosed` after close,
    /// `SqlSessionError::ConnectionClosed` if the bound connection is gone,
    /// `SqlSessionError::Usage` if `conn` is a different connection, or the engine error.
    pub fn cursor_requeried(&mut self, conn: &mut Connection) -> Result<ResultSet, SqlSessionError> {
        self.ensure_connection_alive()?;
        if let Some(bound) = &self.bound
            && bound.id != conn.id()
        {
            return Err(SqlSessionError::usage(format!(
                "cursor was opened on connection {} but requeried on {}",
                bound.id,
                conn.id()
            )));
        }
        let args = self.bind_args.clone();
        self.execute(conn, &args)
    }

    /// Release the statement. Calling this more than once has no effect.
    pub fn cursor_closed(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.statement = None;
        debug!(sql = %self.sql, "cursor closed");
    }

    /// Replace the bind arguments used by the next requery.
    pub fn set_bind_arguments(&mut self, bind_args: Vec<RowValues>) {
        self.bind_args = bind_args;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn ensure_connection_alive(&self) -> Result<(), SqlSessionError> {
        if self.closed {
            return Err(SqlSessionError::CursorClosed);
        }
        match &self.bound {
            Some(bound) if bound.liveness.upgrade().is_none() => {
                Err(SqlSessionError::ConnectionClosed(bound.id))
            }
            _ => Ok(()),
        }
    }
}
