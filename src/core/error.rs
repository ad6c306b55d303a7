/// forumdb Error Module
///
/// Error types for the database layer. Validation and security failures are
/// always fatal for the current call; schema conflicts are not errors at all and
/// are reported through `bool` results (see [`SchemaConflict`]).
use std::fmt;
use thiserror::Error;

/// Error type for every fallible operation in the crate.
#[derive(Error, Debug)]
pub enum DbError {
    /// A binding was malformed, missing, or used an unknown type tag.
    #[error("Validation error: {message} ({tag}:{name})")]
    Validation {
        tag: String,
        name: String,
        message: String,
    },

    /// A banned construct was found in a statement that was not marked trusted.
    #[error("Security violation at {call_site}: {reason}")]
    Security { call_site: String, reason: String },

    /// Connecting to the server or preparing the session failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The underlying driver rejected a statement.
    #[error("Driver error: {0}")]
    Driver(String),

    /// Begin/commit/rollback used out of order.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON schema descriptor errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML configuration or schema descriptor errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Errors raised by the sqlx client behind the server drivers
    #[cfg(any(feature = "mysql", feature = "postgres"))]
    #[error("SQL client error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl DbError {
    /// Create a validation error for a placeholder.
    pub fn validation(
        tag: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        DbError::Validation {
            tag: tag.into(),
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a security violation attributed to a call site.
    pub fn security(call_site: impl fmt::Display, reason: impl Into<String>) -> Self {
        DbError::Security {
            call_site: call_site.to_string(),
            reason: reason.into(),
        }
    }
}

/// Type alias for Result to use DbError as the error type.
pub type Result<T> = std::result::Result<T, DbError>;

/// Why a schema mutation declined to run.
///
/// These never surface as `Err`; the mutators log them and return `Ok(false)`
/// so migration scripts can carry on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaConflict {
    /// The table is one of the forum's core tables.
    Reserved(String),
    /// The object is already there and overwriting was not requested.
    AlreadyExists(String),
    /// The object to change or remove is not there.
    Missing(String),
}

impl fmt::Display for SchemaConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaConflict::Reserved(name) => write!(f, "{} is a reserved table", name),
            SchemaConflict::AlreadyExists(name) => write!(f, "{} already exists", name),
            SchemaConflict::Missing(name) => write!(f, "{} does not exist", name),
        }
    }
}
