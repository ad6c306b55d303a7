//! The database handle.
//!
//! [`Database`] ties a driver, a dialect strategy and the session state
//! together. Queries go through [`Database::query`]: the template is checked
//! for raw quotes, compiled, rewritten where the dialect asks for it, checked
//! by the safety filter and then executed and profiled.

use crate::config::DbConfig;
use crate::core::db::connection::{ConnectOptions, ConnectionManager, Driver, TransactionState};
use crate::core::db::query::{suppress_group_sort, FetchMode, QueryOptions, QueryResult, Row};
use crate::core::{CallSite, DbError, Result, Session};
use crate::dialect::{Dialect, DialectKind};
use crate::safety;
use crate::template::{self, Bindings};
use std::borrow::Cow;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// A connected database session.
#[derive(Debug)]
pub struct Database {
    config: DbConfig,
    dialect: Box<dyn Dialect>,
    conn: ConnectionManager,
    session: Session,
}

impl Database {
    /// Wraps an already connected driver and prepares the session.
    pub fn with_driver(config: DbConfig, driver: Box<dyn Driver>) -> Result<Self> {
        let fetch = if config.unbuffered {
            FetchMode::Unbuffered
        } else {
            FetchMode::Buffered
        };
        let mut db = Database {
            dialect: config.dialect.build(&config),
            session: Session::new(&config),
            conn: ConnectionManager::new(driver, fetch),
            config,
        };

        let site = crate::call_site!("session_setup");
        for statement in db.dialect.session_setup() {
            db.execute_sql(site, &statement, QueryOptions::trusted())
                .map_err(|e| DbError::Connection(format!("session setup failed: {}", e)))?;
        }
        info!(
            dialect = %db.config.dialect,
            database = %db.config.database,
            "database session ready"
        );
        Ok(db)
    }

    /// Connects using the driver compiled in for the configured dialect.
    ///
    /// With [`ConnectOptions::non_fatal`] a failed connection is logged and
    /// reported as `Ok(None)` so the caller can degrade gracefully.
    pub fn open(config: DbConfig, options: ConnectOptions) -> Result<Option<Self>> {
        let attempt = connect_driver(&config).and_then(|driver| Database::with_driver(config.clone(), driver));
        match attempt {
            Ok(db) => Ok(Some(db)),
            Err(e) if options.non_fatal => {
                warn!(host = %config.host, error = %e, "database unavailable, continuing without it");
                Ok(None)
            }
            Err(e) => {
                error!(host = %config.host, error = %e, "failed to connect to database");
                Err(e)
            }
        }
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn kind(&self) -> DialectKind {
        self.dialect.kind()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Compiles a template without running it.
    pub fn quote(&self, template: &str, bindings: &Bindings) -> Result<String> {
        template::compile(self.dialect.as_ref(), &self.session, template, bindings)
    }

    pub fn query(&mut self, site: CallSite, template: &str, bindings: &Bindings) -> Result<QueryResult> {
        self.query_with(site, template, bindings, QueryOptions::default())
    }

    pub fn query_with(
        &mut self,
        site: CallSite,
        template: &str,
        bindings: &Bindings,
        options: QueryOptions,
    ) -> Result<QueryResult> {
        let sql = self.compile_checked(site, template, bindings, options)?;
        self.execute_sql(site, &sql, options)
    }

    /// Runs a query and hands its rows to `on_row` one at a time, returning
    /// the row count. An error from `on_row` stops the query.
    ///
    /// In unbuffered mode (the `unbuffered` setting, or
    /// [`QueryOptions::unbuffered`]) rows are read off the connection as
    /// `on_row` consumes them and the result set is never held whole.
    pub fn query_each<F>(&mut self, site: CallSite, template: &str, bindings: &Bindings, on_row: F) -> Result<u64>
    where
        F: FnMut(Row<'_>) -> Result<()>,
    {
        self.query_each_with(site, template, bindings, QueryOptions::default(), on_row)
    }

    pub fn query_each_with<F>(
        &mut self,
        site: CallSite,
        template: &str,
        bindings: &Bindings,
        options: QueryOptions,
        mut on_row: F,
    ) -> Result<u64>
    where
        F: FnMut(Row<'_>) -> Result<()>,
    {
        let compiled = self.compile_checked(site, template, bindings, options)?;
        let prepared = self.prepare_statement(site, &compiled, options)?;
        let sql: &str = &prepared;

        let mode = options.fetch.unwrap_or(self.conn.fetch_mode());
        let started = Instant::now();
        let result = self.conn.stream(sql, mode, &mut on_row);
        let elapsed = started.elapsed();
        self.session.record_query(site, elapsed, sql);

        match result {
            Ok(rows) => {
                debug!(
                    call_site = %site,
                    elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                    rows,
                    ?mode,
                    "streamed query"
                );
                Ok(rows)
            }
            Err(e) => {
                error!(call_site = %site, error = %e, sql, "statement failed");
                Err(e)
            }
        }
    }

    /// Checks a template for raw quotes and compiles it.
    fn compile_checked(&self, site: CallSite, template: &str, bindings: &Bindings, options: QueryOptions) -> Result<String> {
        if !options.security_override {
            safety::check_template(template, site)?;
        }
        self.quote(template, bindings).map_err(|e| {
            error!(call_site = %site, error = %e, "query validation failed");
            e
        })
    }

    /// Applies the dialect's rewrites and the safety filter to compiled SQL.
    fn prepare_statement<'s>(&self, site: CallSite, sql: &'s str, options: QueryOptions) -> Result<Cow<'s, str>> {
        let sql = if self.dialect.sorts_grouped_results() {
            suppress_group_sort(sql, self.dialect.backslash_escapes()).map_or(Cow::Borrowed(sql), Cow::Owned)
        } else {
            Cow::Borrowed(sql)
        };
        if !options.security_override {
            safety::check_statement(self.dialect.as_ref(), &sql, site)?;
        }
        Ok(sql)
    }

    /// Runs SQL that is already compiled, reading the whole result.
    pub(crate) fn execute_sql(&mut self, site: CallSite, sql: &str, options: QueryOptions) -> Result<QueryResult> {
        let prepared = self.prepare_statement(site, sql, options)?;
        let sql: &str = &prepared;

        let started = Instant::now();
        let result = self.conn.execute(sql);
        let elapsed = started.elapsed();
        self.session.record_query(site, elapsed, sql);

        match result {
            Ok(result) => {
                debug!(
                    call_site = %site,
                    elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                    rows = result.row_count,
                    "executed statement"
                );
                Ok(result)
            }
            Err(e) => {
                error!(call_site = %site, error = %e, sql, "statement failed");
                Err(e)
            }
        }
    }

    // ===== Transactions =====

    pub fn begin(&mut self) -> Result<()> {
        self.conn.begin()
    }

    pub fn commit(&mut self) -> Result<()> {
        self.conn.commit()
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.conn.rollback()
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.conn.transaction_state()
    }

    /// Runs `work` inside a transaction when `wrap` is set and none is open
    /// yet; rolls back if it fails.
    pub(crate) fn atomically<T>(&mut self, wrap: bool, work: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if !wrap || self.conn.in_transaction() {
            return work(self);
        }
        self.begin()?;
        match work(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.rollback() {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    // ===== Helpers =====

    pub fn escape_string(&self, value: &str) -> String {
        self.dialect.escape_string(value)
    }

    /// Escapes a value for use inside a `LIKE` pattern.
    pub fn escape_wildcard_string(&self, value: &str) -> String {
        if self.dialect.backslash_escapes() {
            self.dialect
                .escape_string(value)
                .replace('%', "\\%")
                .replace('_', "\\_")
        } else {
            self.dialect.escape_string(
                &value
                    .replace('\\', "\\\\")
                    .replace('%', "\\%")
                    .replace('_', "\\_"),
            )
        }
    }

    /// Id generated by the last insert into `table`.
    pub fn insert_id(&mut self, site: CallSite, table: &str) -> Result<Option<i64>> {
        let table = self.session.resolve_table(table);
        match self.dialect.insert_id_sql(&table) {
            Some(sql) => {
                let result = self.execute_sql(site, &sql, QueryOptions::trusted())?;
                Ok(result.scalar().and_then(|v| v.parse().ok()))
            }
            None => self.conn.last_insert_id(),
        }
    }

    pub(crate) fn driver_insert_id(&mut self) -> Result<Option<i64>> {
        self.conn.last_insert_id()
    }

    pub fn server_version(&mut self, site: CallSite) -> Result<String> {
        let sql = self.dialect.server_version_sql();
        let result = self.execute_sql(site, sql, QueryOptions::trusted())?;
        result
            .scalar()
            .map(str::to_string)
            .ok_or_else(|| DbError::Driver("server did not report a version".to_string()))
    }
}

fn connect_driver(config: &DbConfig) -> Result<Box<dyn Driver>> {
    match config.dialect {
        #[cfg(feature = "mysql")]
        DialectKind::Mysql => Ok(Box::new(crate::drivers::mysql::MysqlDriver::connect(config)?)),
        #[cfg(feature = "postgres")]
        DialectKind::Postgres => Ok(Box::new(crate::drivers::postgres::PostgresDriver::connect(
            config,
        )?)),
        #[allow(unreachable_patterns)]
        other => Err(DbError::Connection(format!(
            "forumdb was built without the {} driver",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings;
    use crate::call_site;
    use crate::test_utils::{mock_database, MockDriver};

    #[test]
    fn test_session_setup_runs_first() {
        let (_db, log) = mock_database(DialectKind::Mysql, MockDriver::new());
        let statements = log.take();
        assert_eq!(statements[0], "SET NAMES utf8mb4");
        assert!(statements[1].starts_with("SET SESSION sql_mode"));

        let (_db, log) = mock_database(DialectKind::Postgres, MockDriver::new());
        assert_eq!(
            log.take(),
            vec!["SET NAMES 'UTF8'", "SET standard_conforming_strings = on"]
        );
    }

    #[test]
    fn test_query_compiles_and_executes() {
        let (mut db, log) = mock_database(DialectKind::Mysql, MockDriver::new());
        log.clear();
        db.query(
            call_site!(),
            "SELECT id_board FROM {db_prefix}boards WHERE id_cat = {int:cat} GROUP BY id_board",
            &bindings! { "cat" => 2 },
        )
        .unwrap();
        assert_eq!(
            log.take(),
            vec!["SELECT id_board FROM smf_boards WHERE id_cat = 2 GROUP BY id_board ORDER BY NULL"]
        );
        assert!(db.session().query_count() >= 1);
    }

    #[test]
    fn test_group_by_left_alone_on_postgres() {
        let (mut db, log) = mock_database(DialectKind::Postgres, MockDriver::new());
        log.clear();
        db.query(call_site!(), "SELECT a FROM t GROUP BY a", &Bindings::new())
            .unwrap();
        assert_eq!(log.take(), vec!["SELECT a FROM t GROUP BY a"]);
    }

    #[test]
    fn test_security_violation_never_reaches_driver() {
        let (mut db, log) = mock_database(DialectKind::Mysql, MockDriver::new());
        log.clear();
        let err = db
            .query(
                call_site!("profile"),
                "SELECT * FROM t WHERE id = {int:id} -- drop",
                &bindings! { "id" => 1 },
            )
            .unwrap_err();
        assert!(matches!(err, DbError::Security { .. }));
        assert!(log.take().is_empty());

        let err = db
            .query(call_site!(), "SELECT * FROM t WHERE name = 'x'", &Bindings::new())
            .unwrap_err();
        assert!(matches!(err, DbError::Security { .. }));
    }

    #[test]
    fn test_security_override_skips_checks() {
        let (mut db, log) = mock_database(DialectKind::Mysql, MockDriver::new());
        log.clear();
        db.query_with(
            call_site!(),
            "SELECT 'a' -- trusted",
            &Bindings::new(),
            QueryOptions::trusted(),
        )
        .unwrap();
        assert_eq!(log.take(), vec!["SELECT 'a' -- trusted"]);
    }

    #[test]
    fn test_validation_failure_issues_no_sql() {
        let (mut db, log) = mock_database(DialectKind::Mysql, MockDriver::new());
        log.clear();
        let err = db
            .query(call_site!(), "SELECT * FROM t WHERE id = {int:id}", &bindings! { "id" => "5abc" })
            .unwrap_err();
        assert!(matches!(err, DbError::Validation { .. }));
        assert!(log.take().is_empty());
    }

    #[test]
    fn test_atomically_rolls_back_on_error() {
        let (mut db, log) = mock_database(DialectKind::Postgres, MockDriver::new().fail_on("boom"));
        log.clear();
        let result: Result<()> = db.atomically(true, |db| {
            db.execute_sql(call_site!(), "UPDATE ok SET a = 1", QueryOptions::trusted())?;
            db.execute_sql(call_site!(), "UPDATE boom SET a = 1", QueryOptions::trusted())?;
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(
            log.take(),
            vec!["BEGIN", "UPDATE ok SET a = 1", "UPDATE boom SET a = 1", "ROLLBACK"]
        );
        assert_eq!(db.transaction_state(), TransactionState::Autocommit);
    }

    #[test]
    fn test_atomically_joins_open_transaction() {
        let (mut db, log) = mock_database(DialectKind::Postgres, MockDriver::new());
        db.begin().unwrap();
        log.clear();
        db.atomically(true, |db| {
            db.execute_sql(call_site!(), "SELECT 1", QueryOptions::trusted())
        })
        .unwrap();
        assert_eq!(log.take(), vec!["SELECT 1"]);
        db.commit().unwrap();
    }

    #[test]
    fn test_escape_wildcard_string() {
        let (db, _) = mock_database(DialectKind::Mysql, MockDriver::new());
        assert_eq!(db.escape_wildcard_string("50%_o'k"), "50\\%\\_o\\'k");

        let (db, _) = mock_database(DialectKind::Postgres, MockDriver::new());
        assert_eq!(db.escape_wildcard_string("50%_o'k"), "50\\%\\_o''k");
    }

    #[test]
    fn test_insert_id_per_dialect() {
        let driver = MockDriver::new().with_insert_ids(&[42]);
        let (mut db, _) = mock_database(DialectKind::Mysql, driver);
        assert_eq!(db.insert_id(call_site!(), "{db_prefix}log").unwrap(), Some(42));

        let driver = MockDriver::new().respond("CURRVAL", QueryResult::new(vec!["currval"], vec![vec![Some("7")]]));
        let (mut db, log) = mock_database(DialectKind::Postgres, driver);
        log.clear();
        assert_eq!(db.insert_id(call_site!(), "{db_prefix}log").unwrap(), Some(7));
        assert_eq!(log.take(), vec!["SELECT CURRVAL('smf_log_seq')"]);
    }

    #[test]
    fn test_server_version() {
        let driver = MockDriver::new().respond("VERSION()", QueryResult::new(vec!["v"], vec![vec![Some("8.0.36")]]));
        let (mut db, _) = mock_database(DialectKind::Mysql, driver);
        assert_eq!(db.server_version(call_site!()).unwrap(), "8.0.36");
    }

    #[test]
    fn test_open_non_fatal_without_driver() {
        let config = DbConfig::new(DialectKind::Mysql, "forum").with_prefix("smf_");
        let options = ConnectOptions { non_fatal: true };
        // Either no driver is compiled in, or nothing listens on the port.
        let mut config = config;
        config.port = Some(1);
        assert!(Database::open(config, options).unwrap().is_none());
    }
}
