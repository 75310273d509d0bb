#![forbid(unsafe_op_in_unsafe_fn)]

//! Pooled `SQLite` sessions.
//!
//! `sql-session` leases connections to one database file (or a private in-memory database),
//! tracks nested transactions per connection, caches compiled statements, and guards the
//! engine settings that are only safe to change while nothing is in flight.
//!
//! ```rust
//! use sql_session::{Database, RowValues};
//!
//! # fn main() -> Result<(), sql_session::SqlSessionError> {
//! let db = Database::open_in_memory()?;
//! db.execute_batch("CREATE TABLE t (n INTEGER)")?;
//!
//! let mut conn = db.pool().acquire_write()?;
//! conn.begin_transaction(None)?;
//! conn.execute("INSERT INTO t (n) VALUES (?)", &[RowValues::Int(1)])?;
//! conn.set_transaction_successful()?;
//! conn.end_transaction()?;
//! drop(conn);
//!
//! assert_eq!(db.long_for_query("SELECT count(*) FROM t", &[])?, 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod cursor;
pub mod database;
pub mod engine;
pub mod error;
pub mod executor;
pub mod pool;
pub mod prelude;
pub mod results;
pub mod statement;
pub mod transaction;
pub mod types;

pub use config::{Configuration, ConfigurationBuilder, LookasideConfig, MEMORY_DB_PATH, OpenFlags};
pub use connection::{AttachedDatabase, Connection, ConnectionRole};
pub use cursor::{Cursor, CursorDriver};
pub use database::{Database, delete_database};
pub use error::SqlSessionError;
pub use executor::{InlineExecutor, Task, TaskExecutor, TaskHandle, ThreadExecutor, TokioExecutor};
pub use pool::{ConnectionPool, ConnectionStats, PoolStats, PooledConnection};
pub use results::{CustomDbRow, ResultSet};
pub use statement::{CacheStats, PreparedStatement, StatementCache, StatementKind};
pub use transaction::TransactionListener;
pub use types::{ConnectionId, LeaseIntent, RowValues, TransactionMode};
