//! SQL dialect strategies.
//!
//! Everything that differs between the supported engines lives behind the
//! [`Dialect`] trait: literal encoding, identifier quoting, the type map,
//! catalog queries, upsert syntax and DDL generation. The compiler, insert
//! engine and schema mutator are written once against this trait.
//!
//! - [`MysqlDialect`]: MySQL / MariaDB
//! - [`PostgresDialect`]: PostgreSQL

mod mysql;
mod postgres;

pub use mysql::MysqlDialect;
pub use postgres::PostgresDialect;

use crate::config::DbConfig;
use crate::core::db::query::QueryResult;
use crate::core::db::schema::{Column, Index, Table};
use crate::core::Result;
use crate::insert::InsertMode;
use crate::template::Bindings;
use crate::typemap::SqlType;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use std::fmt;
use std::net::IpAddr;
use uuid::Uuid;

/// Which engine a dialect targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    #[serde(alias = "mariadb")]
    Mysql,
    #[serde(alias = "postgresql", alias = "pgsql")]
    Postgres,
}

impl DialectKind {
    pub fn name(&self) -> &'static str {
        match self {
            DialectKind::Mysql => "mysql",
            DialectKind::Postgres => "postgresql",
        }
    }

    /// Build the strategy object configured for this session.
    pub fn build(&self, config: &DbConfig) -> Box<dyn Dialect> {
        match self {
            DialectKind::Mysql => Box::new(MysqlDialect::from_config(config)),
            DialectKind::Postgres => Box::new(PostgresDialect::from_config(config)),
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A catalog query expressed as a template plus its bindings.
pub type CatalogQuery = (&'static str, Bindings);

/// Statements needed to create one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateTablePlan {
    /// Run before `CREATE TABLE` (sequences).
    pub before: Vec<String>,
    pub create: String,
    /// Run after rows were copied across (secondary indexes).
    pub after: Vec<String>,
}

/// SQL syntax strategy for one database engine.
pub trait Dialect: Send + Sync + fmt::Debug {
    fn kind(&self) -> DialectKind;

    // ===== Quoting =====

    /// Escape a string for use inside single quotes.
    fn escape_string(&self, value: &str) -> String;

    fn quote_string(&self, value: &str) -> String {
        format!("'{}'", self.escape_string(value))
    }

    /// Quote a possibly dotted identifier, dropping any quote characters
    /// already present.
    fn quote_identifier(&self, ident: &str) -> String;

    /// Whether backslash escapes the next character inside string literals.
    fn backslash_escapes(&self) -> bool;

    /// Comment introducers that must never appear outside string literals.
    fn comment_markers(&self) -> &'static [&'static str];

    // ===== Literals =====

    fn date_literal(&self, date: &NaiveDate) -> String;

    fn time_literal(&self, time: &NaiveTime) -> String;

    fn datetime_literal(&self, datetime: &NaiveDateTime) -> String;

    fn inet_literal(&self, addr: &IpAddr) -> String;

    fn uuid_literal(&self, uuid: &Uuid) -> String;

    // ===== Session =====

    /// Statements run once right after connecting.
    fn session_setup(&self) -> Vec<String>;

    fn server_version_sql(&self) -> &'static str;

    // ===== Capabilities =====

    /// Whether DDL can be rolled back.
    fn transactional_ddl(&self) -> bool;

    /// Whether `GROUP BY` implies a sort that `ORDER BY NULL` suppresses.
    fn sorts_grouped_results(&self) -> bool;

    /// Longest indexable prefix of a text column, if the engine has one.
    fn index_prefix_limit(&self) -> Option<u32>;

    /// Whether auto-increment is emulated with named sequences.
    fn uses_sequences(&self) -> bool;

    // ===== Types =====

    /// Map a type between generic and native names. See [`crate::typemap`].
    fn calculate_type(&self, type_name: &str, size: Option<u32>, reverse: bool) -> SqlType;

    /// Native type text for a column, e.g. `int(10) unsigned`.
    fn column_type_sql(&self, column: &Column) -> String;

    // ===== Inserts =====

    fn insert_keyword(&self, mode: InsertMode) -> &'static str;

    /// Clause appended after `VALUES` to get the requested conflict handling.
    fn conflict_clause(&self, mode: InsertMode, columns: &[&str], keys: &[&str]) -> String;

    /// `RETURNING` clause, when the engine has one.
    fn returning_clause(&self, column: &str) -> Option<String>;

    /// Query for the last generated id, when the driver cannot report it.
    fn insert_id_sql(&self, table: &str) -> Option<String>;

    // ===== Catalog =====

    fn list_tables_query(&self, filter: Option<&str>) -> CatalogQuery;

    fn list_columns_query(&self, table: &str, catalog_table: &str) -> CatalogQuery;

    fn parse_columns(&self, result: &QueryResult) -> Result<Vec<Column>>;

    fn list_indexes_query(&self, table: &str, catalog_table: &str) -> CatalogQuery;

    fn parse_indexes(&self, result: &QueryResult, catalog_table: &str) -> Vec<Index>;

    /// Query reporting the storage engine of a table.
    fn table_engine_query(&self, catalog_table: &str) -> Option<CatalogQuery>;

    // ===== DDL =====

    fn create_table_sql(&self, table: &str, definition: &Table, reuse_sequence: bool) -> CreateTablePlan;

    fn drop_table_sql(&self, table: &str, columns: &[Column]) -> Vec<String>;

    /// Moves a table aside, together with any constraint names the new
    /// table of the same name would otherwise collide with.
    fn rename_table_sql(&self, from: &str, to: &str) -> Vec<String>;

    fn add_column_sql(&self, table: &str, column: &Column) -> Vec<String>;

    /// Statements moving `old` to `new`, in execution order.
    fn change_column_sql(&self, table: &str, old: &Column, new: &Column) -> Vec<String>;

    fn remove_column_sql(&self, table: &str, column: &Column) -> Vec<String>;

    fn add_index_sql(&self, table: &str, index: &Index) -> String;

    fn remove_index_sql(&self, table: &str, index: &Index) -> String;
}

/// Splits a dotted identifier and strips quote characters from each part.
pub(crate) fn identifier_parts(ident: &str, quote_chars: &[char]) -> Vec<String> {
    ident
        .split('.')
        .map(|part| part.chars().filter(|c| !quote_chars.contains(c)).collect::<String>())
        .map(|part| part.trim().to_string())
        .collect()
}

/// Last segment of a possibly qualified table name, unquoted.
pub(crate) fn unqualified(table: &str) -> String {
    identifier_parts(table, &['`', '"'])
        .pop()
        .unwrap_or_default()
}

/// Whether a default value can be written without quotes.
pub(crate) fn is_numeric_literal(value: &str) -> bool {
    !value.is_empty()
        && value.trim() == value
        && value.parse::<f64>().map(|f| f.is_finite()).unwrap_or(false)
}
