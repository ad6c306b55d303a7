//! Server drivers.
//!
//! Both wrap a single sqlx connection driven by a current-thread tokio
//! runtime, so the rest of the crate stays synchronous. Statements go over
//! the text protocol; every value comes back as text and is handed up as
//! such.

#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;

use crate::core::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::runtime::{Builder, Runtime};

static ROW_STATEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*(\(\s*)*(SELECT|SHOW|WITH|DESCRIBE|DESC|EXPLAIN|VALUES)\b|\bRETURNING\b")
        .expect("row statement pattern")
});

fn runtime() -> Result<Runtime> {
    Ok(Builder::new_current_thread().enable_all().build()?)
}

/// Whether a statement produces a result set rather than a row count.
fn returns_rows(sql: &str) -> bool {
    ROW_STATEMENT.is_match(sql)
}
