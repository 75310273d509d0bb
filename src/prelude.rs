//! Convenient imports for common functionality.
//!
//! ```rust
//! use sql_session::prelude::*;
//! ```

pub use crate::config::{Configuration, ConfigurationBuilder};
pub use crate::connection::Connection;
pub use crate::cursor::Cursor;
pub use crate::database::Database;
pub use crate::error::SqlSessionError;
pub use crate::executor::{TaskExecutor, TaskHandle};
pub use crate::pool::{ConnectionPool, PooledConnection};
pub use crate::results::{CustomDbRow, ResultSet};
pub use crate::transaction::TransactionListener;
pub use crate::types::{LeaseIntent, RowValues, TransactionMode};
