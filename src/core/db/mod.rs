/// Database Module
///
/// The engine-neutral core of the database layer.
///
/// ## Architecture
///
/// - **Connection Management** (`connection.rs`): the driver seam, connection state and transactions
/// - **Schema Descriptors** (`schema.rs`): generic tables, columns and indexes
/// - **Query Execution** (`query.rs`): result sets, execution options and statement rewrites
///
/// ## Error Handling
///
/// All database operations use the standardized `DbError` type for consistent error propagation.
pub mod connection;
pub mod query;
pub mod schema;

pub use connection::*;
pub use query::*;
pub use schema::*;
