// Core infrastructure modules
pub mod config;
pub mod core;

// SQL generation
pub mod dialect;
pub mod safety;
pub mod template;
pub mod typemap;

// Database operations
pub mod database;
pub mod ddl;
pub mod insert;

#[cfg(any(feature = "mysql", feature = "postgres"))]
pub mod drivers;

pub mod test_utils;

pub use config::DbConfig;
pub use core::db::connection::{ConnectOptions, Driver, TransactionState};
pub use core::db::query::{FetchMode, QueryOptions, QueryResult, Row};
pub use core::db::schema::{Column, ColumnChange, ColumnDefault, Index, IndexKind, Table};
pub use core::{CallSite, DbError, Result};
pub use database::Database;
pub use ddl::IfExists;
pub use dialect::DialectKind;
pub use insert::{Insert, InsertMode, InsertResult, Returning};
pub use template::{Bindings, Value};

/// Installs the default `tracing` subscriber for binaries embedding the
/// crate. Does nothing if one is already set.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt::try_init();
}
