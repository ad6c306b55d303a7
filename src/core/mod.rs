/// Core Module for forumdb
///
/// Shared infrastructure: the error type, the per-connection session state
/// and the engine-neutral database primitives everything else builds on.

pub mod db;
pub mod error;
pub mod session;

// Re-export commonly used types for convenience
pub use error::{DbError, Result, SchemaConflict};
pub use session::{CallSite, PackageLogEntry, ProfileEntry, Session};
