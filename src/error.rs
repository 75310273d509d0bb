use std::time::Duration;

use thiserror::Error;

use crate::types::ConnectionId;

#[derive(Debug, Error)]
pub enum SqlSessionError {
    /// Engine failure annotated with the connection, transaction depth and SQL that produced it.
    #[error("SQLite error on connection {connection_id} (transaction depth {depth}) executing `{sql}`: {source}")]
    Engine {
        connection_id: ConnectionId,
        depth: usize,
        sql: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Caller protocol violation (end without begin, double mark, argument count mismatch, ...).
    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Timed out after {0:?} waiting for a connection lease")]
    LeaseTimeout(Duration),

    #[error("Connection pool has been closed")]
    PoolClosed,

    #[error("Connection {0} has been closed")]
    ConnectionClosed(ConnectionId),

    #[error("Cursor has already been closed")]
    CursorClosed,

    /// Reconfiguration refused because another transaction or lease is in flight.
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),
}

impl SqlSessionError {
    pub(crate) fn usage(message: impl Into<String>) -> Self {
        SqlSessionError::Usage(message.into())
    }

    pub(crate) fn conflict(message: impl Into<String>) -> Self {
        SqlSessionError::ConcurrencyConflict(message.into())
    }

    /// True for lease timeouts, which callers may retry with backoff.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, SqlSessionError::LeaseTimeout(_))
    }

    #[must_use]
    pub fn is_usage(&self) -> bool {
        matches!(self, SqlSessionError::Usage(_))
    }

    /// The underlying engine error, if this error came from `SQLite`.
    #[must_use]
    pub fn engine_error(&self) -> Option<&rusqlite::Error> {
        match self {
            SqlSessionError::Engine { source, .. } => Some(source),
            SqlSessionError::SqliteError(err) => Some(err),
            _ => None,
        }
    }
}
