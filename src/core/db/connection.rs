/// Connection Management Module
///
/// The driver seam, plus connection state and the non-nested transaction
/// lifecycle layered over it.
use crate::core::db::query::{FetchMode, QueryResult, RowSink};
use crate::core::{DbError, Result};
use tracing::{debug, warn};

/// A live connection to one database server.
///
/// Implemented by the MySQL and PostgreSQL client wrappers in
/// [`crate::drivers`] and by the scripted driver in [`crate::test_utils`].
pub trait Driver: Send {
    /// Runs one statement. Writes report `affected_rows`; reads fill rows.
    fn execute(&mut self, sql: &str) -> Result<QueryResult>;

    /// Runs a query and hands each row to `on_row` as it is read off the
    /// connection, without holding the result set. Returns the row count.
    ///
    /// The default reads the whole result first.
    fn stream(&mut self, sql: &str, on_row: &mut RowSink<'_>) -> Result<u64> {
        let result = self.execute(sql)?;
        for row in result.rows() {
            on_row(row)?;
        }
        Ok(result.row_count as u64)
    }

    /// Id generated by the most recent insert, if the engine reports one.
    fn last_insert_id(&mut self) -> Result<Option<i64>>;
}

/// Represents database transaction states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    /// No active transaction (autocommit mode)
    #[default]
    Autocommit,
    /// Transaction in progress
    Transaction,
    /// A statement failed inside the transaction; only rollback is useful
    Failed,
}

/// Options for [`Database::open`](crate::Database::open).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Return `Ok(None)` instead of an error when the server is unreachable.
    pub non_fatal: bool,
}

/// Owns the driver and tracks transaction state.
pub struct ConnectionManager {
    driver: Box<dyn Driver>,
    transaction_state: TransactionState,
    fetch_mode: FetchMode,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("transaction_state", &self.transaction_state)
            .field("fetch_mode", &self.fetch_mode)
            .finish()
    }
}

impl ConnectionManager {
    /// Creates a new connection manager around a connected driver
    pub fn new(driver: Box<dyn Driver>, fetch_mode: FetchMode) -> Self {
        ConnectionManager {
            driver,
            transaction_state: TransactionState::Autocommit,
            fetch_mode,
        }
    }

    /// Fetch mode used when a call does not pick one.
    pub fn fetch_mode(&self) -> FetchMode {
        self.fetch_mode
    }

    /// Runs a statement. A failure inside a transaction marks it failed.
    pub fn execute(&mut self, sql: &str) -> Result<QueryResult> {
        let result = self.driver.execute(sql);
        self.track(result)
    }

    /// Runs a query in `mode`, handing rows to `on_row`. Unbuffered queries
    /// stream from the driver; buffered ones are read whole first.
    pub fn stream(&mut self, sql: &str, mode: FetchMode, on_row: &mut RowSink<'_>) -> Result<u64> {
        let result = match mode {
            FetchMode::Unbuffered => self.driver.stream(sql, on_row),
            FetchMode::Buffered => self.driver.execute(sql).and_then(|result| {
                for row in result.rows() {
                    on_row(row)?;
                }
                Ok(result.row_count as u64)
            }),
        };
        self.track(result)
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if self.transaction_state == TransactionState::Transaction {
                warn!(error = %e, "statement failed inside transaction");
                self.transaction_state = TransactionState::Failed;
            }
        }
        result
    }

    pub fn last_insert_id(&mut self) -> Result<Option<i64>> {
        self.driver.last_insert_id()
    }

    /// Gets the current transaction state
    pub fn transaction_state(&self) -> TransactionState {
        self.transaction_state
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction_state != TransactionState::Autocommit
    }

    /// Starts a transaction. Transactions do not nest.
    pub fn begin(&mut self) -> Result<()> {
        if self.transaction_state != TransactionState::Autocommit {
            return Err(DbError::Transaction(
                "Transaction already in progress".to_string(),
            ));
        }
        self.driver.execute("BEGIN")?;
        self.transaction_state = TransactionState::Transaction;
        debug!("transaction started");
        Ok(())
    }

    /// Commits the open transaction. A failed transaction must be rolled back.
    pub fn commit(&mut self) -> Result<()> {
        match self.transaction_state {
            TransactionState::Transaction => {}
            TransactionState::Failed => {
                return Err(DbError::Transaction(
                    "Transaction failed; roll it back".to_string(),
                ))
            }
            TransactionState::Autocommit => {
                return Err(DbError::Transaction("No transaction in progress".to_string()))
            }
        }
        self.driver.execute("COMMIT")?;
        self.transaction_state = TransactionState::Autocommit;
        debug!("transaction committed");
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        if self.transaction_state == TransactionState::Autocommit {
            return Err(DbError::Transaction("No transaction in progress".to_string()));
        }
        // The server discards the transaction even if this reports an error.
        self.transaction_state = TransactionState::Autocommit;
        self.driver.execute("ROLLBACK")?;
        debug!("transaction rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockDriver;

    fn manager() -> (ConnectionManager, crate::test_utils::StatementLog) {
        let driver = MockDriver::new();
        let log = driver.log();
        (ConnectionManager::new(Box::new(driver), FetchMode::Buffered), log)
    }

    #[test]
    fn test_transaction_state_management() {
        let (mut conn, log) = manager();
        assert_eq!(conn.transaction_state(), TransactionState::Autocommit);

        conn.begin().unwrap();
        assert_eq!(conn.transaction_state(), TransactionState::Transaction);

        // Try to start another transaction - should fail
        assert!(matches!(conn.begin(), Err(DbError::Transaction(_))));

        conn.commit().unwrap();
        assert_eq!(conn.transaction_state(), TransactionState::Autocommit);

        // Try to commit without transaction - should fail
        assert!(conn.commit().is_err());
        assert!(conn.rollback().is_err());

        assert_eq!(log.take(), vec!["BEGIN", "COMMIT"]);
    }

    #[test]
    fn test_failure_marks_transaction_failed() {
        let driver = MockDriver::new().fail_on("broken");
        let log = driver.log();
        let mut conn = ConnectionManager::new(Box::new(driver), FetchMode::Buffered);

        conn.begin().unwrap();
        assert!(conn.execute("UPDATE broken SET a = 1").is_err());
        assert_eq!(conn.transaction_state(), TransactionState::Failed);
        assert!(conn.commit().is_err());

        conn.rollback().unwrap();
        assert_eq!(conn.transaction_state(), TransactionState::Autocommit);
        assert_eq!(log.take(), vec!["BEGIN", "UPDATE broken SET a = 1", "ROLLBACK"]);
    }

    #[test]
    fn test_stream_follows_fetch_mode() {
        let driver = MockDriver::new().respond("FROM boards", crate::test_utils::column_result("id", &["1", "2", "3"]));
        let streamed = driver.streamed();
        let mut conn = ConnectionManager::new(Box::new(driver), FetchMode::Buffered);

        let mut seen = Vec::new();
        let count = conn
            .stream("SELECT id FROM boards", FetchMode::Unbuffered, &mut |row| {
                seen.push(row.get("id").unwrap_or_default().to_string());
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(seen, vec!["1", "2", "3"]);

        conn.stream("SELECT id FROM boards", FetchMode::Buffered, &mut |_| Ok(()))
            .unwrap();
        assert_eq!(streamed.take(), vec!["SELECT id FROM boards"]);
    }

    #[test]
    fn test_failed_stream_marks_transaction_failed() {
        let driver = MockDriver::new().respond("FROM boards", crate::test_utils::column_result("id", &["1", "2"]));
        let mut conn = ConnectionManager::new(Box::new(driver), FetchMode::Unbuffered);
        conn.begin().unwrap();

        let mut rows = 0;
        let result = conn.stream("SELECT id FROM boards", FetchMode::Unbuffered, &mut |_| {
            rows += 1;
            Err(DbError::Driver("stop".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(rows, 1);
        assert_eq!(conn.transaction_state(), TransactionState::Failed);
    }

    #[test]
    fn test_failure_outside_transaction_keeps_autocommit() {
        let driver = MockDriver::new().fail_on("broken");
        let mut conn = ConnectionManager::new(Box::new(driver), FetchMode::Buffered);
        assert!(conn.execute("SELECT broken").is_err());
        assert_eq!(conn.transaction_state(), TransactionState::Autocommit);
    }
}
