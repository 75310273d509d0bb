//! A single engine connection with its statement cache and transaction stack.

mod dml;
mod lifecycle;
mod pragma;
mod select;
mod tx;

pub use pragma::AttachedDatabase;

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::statement::{PreparedStatement, StatementCache};
use crate::transaction::TransactionStack;
use crate::types::{ConnectionId, TransactionMode};

/// Whether a connection may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionRole {
    /// The single writable connection.
    Primary,
    /// A read-only connection opened in WAL mode.
    Reader,
}

/// One open engine connection.
///
/// A connection is only ever reachable through one lease at a time; see
/// [`crate::PooledConnection`].
pub struct Connection {
    id: ConnectionId,
    role: ConnectionRole,
    read_only: bool,
    conn: rusqlite::Connection,
    cache: StatementCache<Arc<PreparedStatement>>,
    transactions: TransactionStack,
    default_mode: TransactionMode,
    label: String,
    last_used_at: Instant,
    /// Generation of the pool-level settings last applied to this connection.
    settings_generation: u64,
    /// Cursors hold a `Weak` to this; it dies with the connection.
    liveness: Arc<()>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("label", &self.label)
            .field("transactions", &self.transactions)
            .field("cached_statements", &self.cache.len())
            .finish_non_exhaustive()
    }
}
