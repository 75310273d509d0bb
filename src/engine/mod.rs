//! Glue between the session layer and the rusqlite engine.

mod compiler;
mod lookaside;
pub mod params;
pub mod query;

pub(crate) use compiler::{SqliteCompiler, describe};
pub(crate) use lookaside::configure_lookaside;
pub use params::{Params, row_value_to_sqlite_value};
pub use query::{build_result_set, sqlite_extract_value_sync};
