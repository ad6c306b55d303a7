/// # Test Utilities Module
///
/// Scripted driver and fixtures for exercising the database layer without a
/// server.
///
/// This module provides:
/// - `MockDriver`, which records every statement and answers from rules
/// - `StatementLog`, a handle on the recorded statements shared with tests
/// - `mock_database`, a `Database` over a mock driver with the `smf_` prefix
/// - `init_test_logging`, routing tracing output through the test harness

use crate::config::DbConfig;
use crate::core::db::connection::Driver;
use crate::core::db::query::{QueryResult, RowSink};
use crate::core::{DbError, Result};
use crate::database::Database;
use crate::dialect::DialectKind;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Shared record of the statements a [`MockDriver`] received.
#[derive(Debug, Clone, Default)]
pub struct StatementLog {
    statements: Arc<Mutex<Vec<String>>>,
}

impl StatementLog {
    fn push(&self, sql: &str) {
        if let Ok(mut statements) = self.statements.lock() {
            statements.push(sql.to_string());
        }
    }

    /// Returns the recorded statements and clears the log.
    pub fn take(&self) -> Vec<String> {
        self.statements
            .lock()
            .map(|mut s| std::mem::take(&mut *s))
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut statements) = self.statements.lock() {
            statements.clear();
        }
    }

    /// Copy of the recorded statements, leaving the log intact.
    pub fn snapshot(&self) -> Vec<String> {
        self.statements
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug)]
struct Rule {
    needle: String,
    result: QueryResult,
}

/// A driver that answers statements from substring-matched rules.
///
/// One-shot rules are consulted before persistent ones and are consumed when
/// they match. Statements matching no rule return an empty result.
#[derive(Debug, Default)]
pub struct MockDriver {
    log: StatementLog,
    streamed: StatementLog,
    once: Vec<Rule>,
    rules: Vec<Rule>,
    failures: Vec<String>,
    insert_ids: VecDeque<i64>,
    last_insert_id: Option<i64>,
}

impl MockDriver {
    pub fn new() -> Self {
        MockDriver::default()
    }

    pub fn log(&self) -> StatementLog {
        self.log.clone()
    }

    /// Statements that were run through [`Driver::stream`].
    pub fn streamed(&self) -> StatementLog {
        self.streamed.clone()
    }

    /// Answer every statement containing `needle` with `result`.
    pub fn respond(mut self, needle: &str, result: QueryResult) -> Self {
        self.rules.push(Rule {
            needle: needle.to_string(),
            result,
        });
        self
    }

    /// Answer the next statement containing `needle` with `result`.
    pub fn respond_once(mut self, needle: &str, result: QueryResult) -> Self {
        self.once.push(Rule {
            needle: needle.to_string(),
            result,
        });
        self
    }

    /// Fail every statement containing `needle`.
    pub fn fail_on(mut self, needle: &str) -> Self {
        self.failures.push(needle.to_string());
        self
    }

    /// Values returned by successive `last_insert_id` calls. The last value
    /// repeats once the queue is drained.
    pub fn with_insert_ids(mut self, ids: &[i64]) -> Self {
        self.insert_ids.extend(ids.iter().copied());
        self
    }
}

impl Driver for MockDriver {
    fn execute(&mut self, sql: &str) -> Result<QueryResult> {
        self.log.push(sql);
        self.answer(sql)
    }

    fn stream(&mut self, sql: &str, on_row: &mut RowSink<'_>) -> Result<u64> {
        self.log.push(sql);
        self.streamed.push(sql);
        let result = self.answer(sql)?;
        for row in result.rows() {
            on_row(row)?;
        }
        Ok(result.row_count as u64)
    }

    fn last_insert_id(&mut self) -> Result<Option<i64>> {
        if let Some(id) = self.insert_ids.pop_front() {
            self.last_insert_id = Some(id);
        }
        Ok(self.last_insert_id)
    }
}

impl MockDriver {
    /// Result for `sql` by the failure, one-shot and persistent rules.
    fn answer(&mut self, sql: &str) -> Result<QueryResult> {
        if let Some(needle) = self.failures.iter().find(|n| sql.contains(n.as_str())) {
            return Err(DbError::Driver(format!("mock failure on {}", needle)));
        }
        if let Some(pos) = self.once.iter().position(|r| sql.contains(&r.needle)) {
            return Ok(self.once.remove(pos).result);
        }
        Ok(self
            .rules
            .iter()
            .find(|r| sql.contains(&r.needle))
            .map(|r| r.result.clone())
            .unwrap_or_default())
    }
}

/// Configuration used by [`mock_database`].
pub fn mock_config(kind: DialectKind) -> DbConfig {
    DbConfig::new(kind, "forum").with_prefix("smf_")
}

/// A `Database` over `driver`, with the statement log of the driver.
///
/// The log still holds the session setup statements; clear it first when a
/// test only cares about what follows.
pub fn mock_database(kind: DialectKind, driver: MockDriver) -> (Database, StatementLog) {
    mock_database_with(mock_config(kind), driver)
}

pub fn mock_database_with(config: DbConfig, driver: MockDriver) -> (Database, StatementLog) {
    let log = driver.log();
    let db = Database::with_driver(config, Box::new(driver))
        .expect("Failed to set up mock database");
    (db, log)
}

/// Single-column result, handy for catalog listings.
pub fn column_result(name: &str, values: &[&str]) -> QueryResult {
    QueryResult::new(
        vec![name],
        values.iter().map(|v| vec![Some(*v)]).collect(),
    )
}

/// Installs a tracing subscriber that writes through the test harness.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
