use super::{identifier_parts, unqualified, CatalogQuery, CreateTablePlan, Dialect, DialectKind};
use crate::bindings;
use crate::config::DbConfig;
use crate::core::db::query::QueryResult;
use crate::core::db::schema::{Column, ColumnDefault, Index, IndexColumn, IndexKind, Table};
use crate::core::{DbError, Result};
use crate::insert::InsertMode;
use crate::typemap::{calculate_type, SqlType};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::IpAddr;
use uuid::Uuid;

static INDEX_COLUMNS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(([^)]+)\)").expect("index definition pattern"));

/// PostgreSQL syntax.
#[derive(Debug, Clone)]
pub struct PostgresDialect {
    schema: String,
    charset: String,
}

impl PostgresDialect {
    pub fn from_config(config: &DbConfig) -> Self {
        PostgresDialect {
            schema: config.postgres.schema.clone(),
            charset: config
                .charset
                .as_deref()
                .unwrap_or("UTF8")
                .chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
                .collect(),
        }
    }

    fn sequence_name(&self, table: &str) -> String {
        format!("{}_seq", table)
    }

    /// `nextval('<table>_seq')`, the default of auto-increment columns.
    fn nextval(&self, table: &str) -> String {
        format!("nextval({})", self.quote_string(&self.sequence_name(&unqualified(table))))
    }

    fn default_clause(&self, column: &Column, table: &str) -> Option<String> {
        if column.auto_increment {
            return Some(format!("DEFAULT {}", self.nextval(table)));
        }
        match &column.default {
            ColumnDefault::Value(v) => Some(format!("DEFAULT {}", self.quote_string(v))),
            ColumnDefault::Null if column.nullable => Some("DEFAULT NULL".to_string()),
            _ => None,
        }
    }

    fn column_definition(&self, column: &Column, table: &str) -> String {
        let mut def = format!(
            "{} {}",
            self.quote_identifier(&column.name),
            self.column_type_sql(column)
        );
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = self.default_clause(column, table) {
            def.push(' ');
            def.push_str(&default);
        }
        def
    }

    /// Index columns without prefix lengths, which PostgreSQL has no syntax for.
    fn index_columns(&self, columns: &[IndexColumn]) -> String {
        columns
            .iter()
            .map(|c| self.quote_identifier(&c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn index_name(&self, table: &str, index: &Index) -> String {
        format!("{}_{}", unqualified(table), index.resolved_name())
    }

    fn create_index_sql(&self, table: &str, index: &Index) -> String {
        let unique = if index.kind == IndexKind::Unique { "UNIQUE " } else { "" };
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            unique,
            self.quote_identifier(&self.index_name(table, index)),
            self.quote_identifier(table),
            self.index_columns(&index.columns)
        )
    }

    fn sequence_statements(&self, table: &str, reuse: bool) -> Vec<String> {
        let seq = self.quote_identifier(&self.sequence_name(table));
        if reuse {
            vec![format!("CREATE SEQUENCE IF NOT EXISTS {}", seq)]
        } else {
            vec![
                format!("DROP SEQUENCE IF EXISTS {}", seq),
                format!("CREATE SEQUENCE {}", seq),
            ]
        }
    }
}

/// Strips `'...'::type` casts from an introspected default.
fn parse_default(raw: &str) -> ColumnDefault {
    let raw = raw.trim();
    if raw.to_uppercase().starts_with("NULL") {
        return ColumnDefault::Null;
    }
    let value = match raw.find("::") {
        Some(pos) => &raw[..pos],
        None => raw,
    };
    let value = value.trim_start_matches('(').trim_end_matches(')');
    if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        ColumnDefault::Value(value[1..value.len() - 1].replace("''", "'"))
    } else {
        ColumnDefault::Value(value.to_string())
    }
}

/// Treats NULL and "no default" as equal when diffing.
fn same_default(a: &ColumnDefault, b: &ColumnDefault) -> bool {
    a.as_value() == b.as_value()
}

impl Dialect for PostgresDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn escape_string(&self, value: &str) -> String {
        value.replace('\0', "").replace('\'', "''")
    }

    fn quote_identifier(&self, ident: &str) -> String {
        identifier_parts(ident, &['`', '"'])
            .iter()
            .map(|part| format!("\"{}\"", part))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn backslash_escapes(&self) -> bool {
        false
    }

    fn comment_markers(&self) -> &'static [&'static str] {
        &["/*", "--"]
    }

    fn date_literal(&self, date: &NaiveDate) -> String {
        format!("'{}'::date", date.format("%Y-%m-%d"))
    }

    fn time_literal(&self, time: &NaiveTime) -> String {
        format!("'{}'::time", time.format("%H:%M:%S"))
    }

    fn datetime_literal(&self, datetime: &NaiveDateTime) -> String {
        format!("'{}'::timestamp", datetime.format("%Y-%m-%d %H:%M:%S"))
    }

    fn inet_literal(&self, addr: &IpAddr) -> String {
        format!("'{}'::inet", addr)
    }

    fn uuid_literal(&self, uuid: &Uuid) -> String {
        format!("'{}'::uuid", uuid.hyphenated())
    }

    fn session_setup(&self) -> Vec<String> {
        vec![
            format!("SET NAMES '{}'", self.charset),
            "SET standard_conforming_strings = on".to_string(),
        ]
    }

    fn server_version_sql(&self) -> &'static str {
        "SHOW server_version"
    }

    fn transactional_ddl(&self) -> bool {
        true
    }

    fn sorts_grouped_results(&self) -> bool {
        false
    }

    fn index_prefix_limit(&self) -> Option<u32> {
        None
    }

    fn uses_sequences(&self) -> bool {
        true
    }

    fn calculate_type(&self, type_name: &str, size: Option<u32>, reverse: bool) -> SqlType {
        calculate_type(DialectKind::Postgres, type_name, size, reverse)
    }

    fn column_type_sql(&self, column: &Column) -> String {
        self.calculate_type(&column.type_name, column.size, false)
            .to_string()
    }

    fn insert_keyword(&self, _mode: InsertMode) -> &'static str {
        "INSERT"
    }

    fn conflict_clause(&self, mode: InsertMode, columns: &[&str], keys: &[&str]) -> String {
        match mode {
            InsertMode::Plain => String::new(),
            InsertMode::Ignore => " ON CONFLICT DO NOTHING".to_string(),
            InsertMode::Replace => {
                let targets = keys
                    .iter()
                    .map(|k| self.quote_identifier(k))
                    .collect::<Vec<_>>()
                    .join(", ");
                let updates: Vec<String> = columns
                    .iter()
                    .filter(|c| !keys.contains(c))
                    .map(|c| {
                        let col = self.quote_identifier(c);
                        format!("{} = EXCLUDED.{}", col, col)
                    })
                    .collect();
                if updates.is_empty() {
                    format!(" ON CONFLICT ({}) DO NOTHING", targets)
                } else {
                    format!(" ON CONFLICT ({}) DO UPDATE SET {}", targets, updates.join(", "))
                }
            }
        }
    }

    fn returning_clause(&self, column: &str) -> Option<String> {
        Some(format!(" RETURNING {}", self.quote_identifier(column)))
    }

    fn insert_id_sql(&self, table: &str) -> Option<String> {
        Some(format!(
            "SELECT CURRVAL({})",
            self.quote_string(&self.sequence_name(&unqualified(table)))
        ))
    }

    fn list_tables_query(&self, filter: Option<&str>) -> CatalogQuery {
        match filter {
            Some(filter) => (
                "SELECT tablename FROM pg_tables WHERE schemaname = {string:schema} AND tablename LIKE {string:filter} ORDER BY tablename",
                bindings! { "schema" => self.schema.as_str(), "filter" => filter },
            ),
            None => (
                "SELECT tablename FROM pg_tables WHERE schemaname = {string:schema} ORDER BY tablename",
                bindings! { "schema" => self.schema.as_str() },
            ),
        }
    }

    fn list_columns_query(&self, _table: &str, catalog_table: &str) -> CatalogQuery {
        (
            "SELECT column_name, column_default, is_nullable, data_type, character_maximum_length \
             FROM information_schema.columns \
             WHERE table_schema = {string:schema} AND table_name = {string:table} \
             ORDER BY ordinal_position",
            bindings! { "schema" => self.schema.as_str(), "table" => catalog_table },
        )
    }

    fn parse_columns(&self, result: &QueryResult) -> Result<Vec<Column>> {
        let mut columns = Vec::with_capacity(result.rows.len());
        for row in result.rows() {
            let name = row.get("column_name").ok_or_else(|| {
                DbError::Driver("information_schema.columns returned no column_name".to_string())
            })?;
            let size = row
                .get("character_maximum_length")
                .and_then(|s| s.parse::<u32>().ok());
            let native = self.calculate_type(row.get("data_type").unwrap_or_default(), size, true);
            let nullable = row
                .get("is_nullable")
                .map(|n| n.eq_ignore_ascii_case("yes"))
                .unwrap_or(false);

            let raw_default = row.get("column_default");
            let auto_increment = raw_default.map(|d| d.contains("nextval(")).unwrap_or(false);
            let default = match raw_default {
                _ if auto_increment => ColumnDefault::Unset,
                Some(raw) => parse_default(raw),
                None if nullable => ColumnDefault::Null,
                None => ColumnDefault::Unset,
            };

            columns.push(Column {
                name: name.to_string(),
                type_name: native.name,
                size: native.size,
                unsigned: false,
                nullable,
                default,
                auto_increment,
            });
        }
        Ok(columns)
    }

    fn list_indexes_query(&self, _table: &str, catalog_table: &str) -> CatalogQuery {
        (
            "SELECT CASE WHEN i.indisprimary THEN 1 ELSE 0 END AS is_primary, \
             CASE WHEN i.indisunique THEN 1 ELSE 0 END AS is_unique, \
             c2.relname AS name, pg_get_indexdef(i.indexrelid) AS inddef \
             FROM pg_class AS c, pg_class AS c2, pg_index AS i, pg_namespace AS n \
             WHERE c.relname = {string:table} AND c.oid = i.indrelid AND i.indexrelid = c2.oid \
             AND c.relnamespace = n.oid AND n.nspname = {string:schema}",
            bindings! { "schema" => self.schema.as_str(), "table" => catalog_table },
        )
    }

    fn parse_indexes(&self, result: &QueryResult, catalog_table: &str) -> Vec<Index> {
        let own_prefix = format!("{}_", catalog_table);
        result
            .rows()
            .filter_map(|row| {
                let raw_name = row.get("name")?;
                let definition = row.get("inddef")?;
                let columns = INDEX_COLUMNS
                    .captures(definition)?
                    .get(1)?
                    .as_str()
                    .split(',')
                    .map(|c| IndexColumn::new(c.trim().trim_matches('"')))
                    .collect();

                let (kind, name) = if row.get("is_primary") == Some("1") {
                    (IndexKind::Primary, raw_name.to_string())
                } else {
                    let kind = if row.get("is_unique") == Some("1") {
                        IndexKind::Unique
                    } else {
                        IndexKind::Index
                    };
                    let name = raw_name.strip_prefix(&own_prefix).unwrap_or(raw_name);
                    (kind, name.to_string())
                };
                Some(Index {
                    name: Some(name),
                    kind,
                    columns,
                })
            })
            .collect()
    }

    fn table_engine_query(&self, _catalog_table: &str) -> Option<CatalogQuery> {
        None
    }

    fn create_table_sql(&self, table: &str, definition: &Table, reuse_sequence: bool) -> CreateTablePlan {
        let before = if definition.columns.iter().any(|c| c.auto_increment) {
            self.sequence_statements(table, reuse_sequence)
        } else {
            Vec::new()
        };

        let mut parts: Vec<String> = definition
            .columns
            .iter()
            .map(|c| self.column_definition(c, table))
            .collect();
        if let Some(primary) = definition.indexes.iter().find(|i| i.kind == IndexKind::Primary) {
            parts.push(format!("PRIMARY KEY ({})", self.index_columns(&primary.columns)));
        }

        let after = definition
            .indexes
            .iter()
            .filter(|i| i.kind != IndexKind::Primary)
            .map(|i| self.create_index_sql(table, i))
            .collect();

        CreateTablePlan {
            before,
            create: format!(
                "CREATE TABLE {} ({})",
                self.quote_identifier(table),
                parts.join(", ")
            ),
            after,
        }
    }

    fn drop_table_sql(&self, table: &str, columns: &[Column]) -> Vec<String> {
        let mut statements = vec![format!("DROP TABLE {}", self.quote_identifier(table))];
        if columns.iter().any(|c| c.auto_increment) {
            statements.push(format!(
                "DROP SEQUENCE IF EXISTS {}",
                self.quote_identifier(&self.sequence_name(table))
            ));
        }
        statements
    }

    fn rename_table_sql(&self, from: &str, to: &str) -> Vec<String> {
        // The primary key index keeps its name across a table rename.
        vec![
            format!(
                "ALTER TABLE {} RENAME TO {}",
                self.quote_identifier(from),
                self.quote_identifier(&unqualified(to))
            ),
            format!(
                "ALTER INDEX IF EXISTS {} RENAME TO {}",
                self.quote_identifier(&format!("{}_pkey", from)),
                self.quote_identifier(&format!("{}_pkey", unqualified(to)))
            ),
        ]
    }

    fn add_column_sql(&self, table: &str, column: &Column) -> Vec<String> {
        let mut statements = Vec::new();
        if column.auto_increment {
            statements.extend(self.sequence_statements(table, true));
        }
        let mut sql = format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote_identifier(table),
            self.column_definition(column, table)
        );
        if column.auto_increment {
            sql.push_str(" PRIMARY KEY");
        }
        statements.push(sql);
        statements
    }

    fn change_column_sql(&self, table: &str, old: &Column, new: &Column) -> Vec<String> {
        let t = self.quote_identifier(table);
        let col = self.quote_identifier(&new.name);
        let mut statements = Vec::new();

        if old.name != new.name {
            statements.push(format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                t,
                self.quote_identifier(&old.name),
                col
            ));
        }

        let mut current_default = old.default.clone();
        let mut current_nullable = old.nullable;

        let retype = old.type_name != new.type_name || old.size != new.size;
        if retype {
            let native = self.column_type_sql(new);
            let temp = self.quote_identifier(&format!("{}_tempxx", new.name));
            statements.push(format!("ALTER TABLE {} ADD COLUMN {} {}", t, temp, native));
            statements.push(format!("UPDATE {} SET {} = CAST({} AS {})", t, temp, col, native));
            statements.push(format!("ALTER TABLE {} DROP COLUMN {}", t, col));
            statements.push(format!("ALTER TABLE {} RENAME COLUMN {} TO {}", t, temp, col));
            current_default = ColumnDefault::Unset;
            current_nullable = true;
        }

        if !new.auto_increment && !old.auto_increment && !same_default(&new.default, &current_default) {
            match new.default.as_value() {
                Some(v) => statements.push(format!(
                    "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
                    t,
                    col,
                    self.quote_string(v)
                )),
                None => statements.push(format!("ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT", t, col)),
            }
        }

        if new.nullable != current_nullable {
            if new.nullable {
                statements.push(format!("ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL", t, col));
            } else {
                if let Some(v) = new.default.as_value() {
                    statements.push(format!(
                        "UPDATE {} SET {} = {} WHERE {} IS NULL",
                        t,
                        col,
                        self.quote_string(v),
                        col
                    ));
                }
                statements.push(format!("ALTER TABLE {} ALTER COLUMN {} SET NOT NULL", t, col));
            }
        }

        if new.auto_increment != old.auto_increment {
            if new.auto_increment {
                statements.extend(self.sequence_statements(table, true));
                statements.push(format!(
                    "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
                    t,
                    col,
                    self.nextval(table)
                ));
            } else {
                statements.push(format!("ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT", t, col));
                statements.push(format!(
                    "DROP SEQUENCE IF EXISTS {}",
                    self.quote_identifier(&self.sequence_name(table))
                ));
            }
        } else if new.auto_increment && retype {
            statements.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
                t,
                col,
                self.nextval(table)
            ));
        }

        statements
    }

    fn remove_column_sql(&self, table: &str, column: &Column) -> Vec<String> {
        let mut statements = vec![format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote_identifier(table),
            self.quote_identifier(&column.name)
        )];
        if column.auto_increment {
            statements.push(format!(
                "DROP SEQUENCE IF EXISTS {}",
                self.quote_identifier(&self.sequence_name(table))
            ));
        }
        statements
    }

    fn add_index_sql(&self, table: &str, index: &Index) -> String {
        match index.kind {
            IndexKind::Primary => format!(
                "ALTER TABLE {} ADD PRIMARY KEY ({})",
                self.quote_identifier(table),
                self.index_columns(&index.columns)
            ),
            _ => self.create_index_sql(table, index),
        }
    }

    fn remove_index_sql(&self, table: &str, index: &Index) -> String {
        match index.kind {
            IndexKind::Primary => {
                let constraint = match index.name.as_deref() {
                    Some(name) if !name.is_empty() && !name.eq_ignore_ascii_case("primary") => {
                        name.to_string()
                    }
                    _ => format!("{}_pkey", unqualified(table)),
                };
                format!(
                    "ALTER TABLE {} DROP CONSTRAINT {}",
                    self.quote_identifier(table),
                    self.quote_identifier(&constraint)
                )
            }
            _ => format!(
                "DROP INDEX {}",
                self.quote_identifier(&self.index_name(table, index))
            ),
        }
    }
}
