use super::{identifier_parts, is_numeric_literal, CatalogQuery, CreateTablePlan, Dialect, DialectKind};
use crate::bindings;
use crate::config::DbConfig;
use crate::core::db::query::QueryResult;
use crate::core::db::schema::{is_integer_type, Column, ColumnDefault, Index, IndexColumn, IndexKind, Table};
use crate::core::{DbError, Result};
use crate::insert::InsertMode;
use crate::typemap::{calculate_type, SqlType};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::IpAddr;
use uuid::Uuid;

const STRICT_SQL_MODE: &str = "ONLY_FULL_GROUP_BY,STRICT_TRANS_TABLES,NO_ZERO_IN_DATE,NO_ZERO_DATE,ERROR_FOR_DIVISION_BY_ZERO,NO_ENGINE_SUBSTITUTION";

/// Largest index prefix that fits utf8mb4 under the 767 byte key limit.
const INDEX_PREFIX_LIMIT: u32 = 191;

/// Types MySQL refuses a DEFAULT on.
const NO_DEFAULT_TYPES: &[&str] = &[
    "tinytext",
    "text",
    "mediumtext",
    "largetext",
    "longtext",
    "tinyblob",
    "blob",
    "mediumblob",
    "longblob",
    "json",
];

static FIELD_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-z ]+?)\s*(?:\((\d+)(?:,\s*(\d+))?\))?(\s+unsigned)?(?:\s+zerofill)?$")
        .expect("field type pattern")
});

/// MySQL / MariaDB syntax.
#[derive(Debug, Clone)]
pub struct MysqlDialect {
    database: String,
    engine: String,
    charset: String,
    collation: Option<String>,
    strict_mode: bool,
}

impl MysqlDialect {
    pub fn from_config(config: &DbConfig) -> Self {
        MysqlDialect {
            database: config.database.clone(),
            engine: sanitize_word(&config.mysql.engine),
            charset: sanitize_word(config.charset.as_deref().unwrap_or("utf8mb4")),
            collation: config.mysql.collation.as_deref().map(sanitize_word),
            strict_mode: config.strict_mode,
        }
    }

    fn column_definition(&self, column: &Column) -> String {
        let mut def = format!(
            "{} {}",
            self.quote_identifier(&column.name),
            self.column_type_sql(column)
        );
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        if column.auto_increment {
            def.push_str(" AUTO_INCREMENT");
            return def;
        }
        if NO_DEFAULT_TYPES.contains(&column.type_name.as_str()) {
            return def;
        }
        match &column.default {
            ColumnDefault::Value(v) if is_numeric_literal(v) => {
                def.push_str(&format!(" DEFAULT {}", v));
            }
            ColumnDefault::Value(v) => {
                def.push_str(&format!(" DEFAULT {}", self.quote_string(v)));
            }
            ColumnDefault::Null if column.nullable => def.push_str(" DEFAULT NULL"),
            _ => {}
        }
        def
    }

    fn index_columns(&self, columns: &[IndexColumn]) -> String {
        columns
            .iter()
            .map(|c| match c.prefix {
                Some(prefix) => format!("{}({})", self.quote_identifier(&c.name), prefix),
                None => self.quote_identifier(&c.name),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn index_clause(&self, index: &Index) -> String {
        let cols = self.index_columns(&index.columns);
        let name = self.quote_identifier(&index.resolved_name());
        match index.kind {
            IndexKind::Primary => format!("PRIMARY KEY ({})", cols),
            IndexKind::Unique => format!("UNIQUE KEY {} ({})", name, cols),
            IndexKind::Index => format!("KEY {} ({})", name, cols),
            IndexKind::Fulltext => format!("FULLTEXT KEY {} ({})", name, cols),
        }
    }

    /// Splits a `SHOW FIELDS` type into generic name, size and signedness.
    ///
    /// A two-argument type such as `decimal(10,2)` has no single size; it is
    /// kept whole as the type name so it is re-emitted unchanged.
    fn parse_field_type(&self, raw: &str) -> (SqlType, bool) {
        let raw = raw.trim().to_lowercase();
        match FIELD_TYPE.captures(&raw) {
            Some(caps) => {
                let name = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
                let unsigned = caps.get(4).is_some();
                match (caps.get(2), caps.get(3)) {
                    (Some(precision), Some(scale)) => (
                        SqlType::new(&format!("{}({},{})", name, precision.as_str(), scale.as_str()), None),
                        unsigned,
                    ),
                    (size, _) => (
                        self.calculate_type(name, size.and_then(|m| m.as_str().parse().ok()), true),
                        unsigned,
                    ),
                }
            }
            None => (SqlType::new(&raw, None), false),
        }
    }
}

fn sanitize_word(word: &str) -> String {
    word.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// MariaDB reports string defaults quoted and NULL as text.
fn unquote_default(raw: &str) -> ColumnDefault {
    if raw.eq_ignore_ascii_case("null") {
        return ColumnDefault::Null;
    }
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return ColumnDefault::Value(raw[1..raw.len() - 1].replace("''", "'"));
    }
    ColumnDefault::Value(raw.to_string())
}

impl Dialect for MysqlDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Mysql
    }

    fn escape_string(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len() + 8);
        for c in value.chars() {
            match c {
                '\0' => out.push_str("\\0"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\\' => out.push_str("\\\\"),
                '\'' => out.push_str("\\'"),
                '"' => out.push_str("\\\""),
                '\x1a' => out.push_str("\\Z"),
                c => out.push(c),
            }
        }
        out
    }

    fn quote_identifier(&self, ident: &str) -> String {
        identifier_parts(ident, &['`', '"'])
            .iter()
            .map(|part| format!("`{}`", part))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn backslash_escapes(&self) -> bool {
        true
    }

    fn comment_markers(&self) -> &'static [&'static str] {
        &["/*", "--", "#"]
    }

    fn date_literal(&self, date: &NaiveDate) -> String {
        format!("'{}'", date.format("%Y-%m-%d"))
    }

    fn time_literal(&self, time: &NaiveTime) -> String {
        format!("'{}'", time.format("%H:%M:%S"))
    }

    fn datetime_literal(&self, datetime: &NaiveDateTime) -> String {
        format!(
            "str_to_date('{}', '%Y-%m-%d %H:%i:%s')",
            datetime.format("%Y-%m-%d %H:%M:%S")
        )
    }

    fn inet_literal(&self, addr: &IpAddr) -> String {
        let bytes = match addr {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        };
        format!("unhex('{}')", hex::encode(bytes))
    }

    fn uuid_literal(&self, uuid: &Uuid) -> String {
        format!("UUID_TO_BIN('{}')", uuid.hyphenated())
    }

    fn session_setup(&self) -> Vec<String> {
        let mut statements = vec![format!("SET NAMES {}", self.charset)];
        if self.strict_mode {
            statements.push(format!("SET SESSION sql_mode = '{}'", STRICT_SQL_MODE));
        }
        statements
    }

    fn server_version_sql(&self) -> &'static str {
        "SELECT VERSION()"
    }

    fn transactional_ddl(&self) -> bool {
        false
    }

    fn sorts_grouped_results(&self) -> bool {
        true
    }

    fn index_prefix_limit(&self) -> Option<u32> {
        Some(INDEX_PREFIX_LIMIT)
    }

    fn uses_sequences(&self) -> bool {
        false
    }

    fn calculate_type(&self, type_name: &str, size: Option<u32>, reverse: bool) -> SqlType {
        calculate_type(DialectKind::Mysql, type_name, size, reverse)
    }

    fn column_type_sql(&self, column: &Column) -> String {
        let native = self.calculate_type(&column.type_name, column.size, false);
        if column.unsigned && is_integer_type(&column.type_name) {
            format!("{} unsigned", native)
        } else {
            native.to_string()
        }
    }

    fn insert_keyword(&self, mode: InsertMode) -> &'static str {
        match mode {
            InsertMode::Plain => "INSERT",
            InsertMode::Ignore => "INSERT IGNORE",
            InsertMode::Replace => "REPLACE",
        }
    }

    fn conflict_clause(&self, _mode: InsertMode, _columns: &[&str], _keys: &[&str]) -> String {
        String::new()
    }

    fn returning_clause(&self, _column: &str) -> Option<String> {
        None
    }

    fn insert_id_sql(&self, _table: &str) -> Option<String> {
        None
    }

    fn list_tables_query(&self, filter: Option<&str>) -> CatalogQuery {
        match filter {
            Some(filter) => (
                "SHOW TABLES FROM {identifier:database} LIKE {string:filter}",
                bindings! { "database" => self.database.as_str(), "filter" => filter },
            ),
            None => (
                "SHOW TABLES FROM {identifier:database}",
                bindings! { "database" => self.database.as_str() },
            ),
        }
    }

    fn list_columns_query(&self, table: &str, _catalog_table: &str) -> CatalogQuery {
        ("SHOW FIELDS FROM {identifier:table}", bindings! { "table" => table })
    }

    fn parse_columns(&self, result: &QueryResult) -> Result<Vec<Column>> {
        let mut columns = Vec::with_capacity(result.rows.len());
        for row in result.rows() {
            let name = row
                .get("Field")
                .ok_or_else(|| DbError::Driver("SHOW FIELDS returned no Field column".to_string()))?;
            let (native, unsigned) = self.parse_field_type(row.get("Type").unwrap_or_default());
            let nullable = row.get("Null").map(|n| n.eq_ignore_ascii_case("yes")).unwrap_or(false);
            let auto_increment = row
                .get("Extra")
                .map(|e| e.to_lowercase().contains("auto_increment"))
                .unwrap_or(false);
            let default = match row.get("Default") {
                _ if auto_increment => ColumnDefault::Unset,
                Some(raw) => unquote_default(raw),
                None if nullable => ColumnDefault::Null,
                None => ColumnDefault::Unset,
            };

            columns.push(Column {
                name: name.to_string(),
                type_name: native.name,
                size: native.size,
                unsigned,
                nullable,
                default,
                auto_increment,
            });
        }
        Ok(columns)
    }

    fn list_indexes_query(&self, table: &str, _catalog_table: &str) -> CatalogQuery {
        ("SHOW KEYS FROM {identifier:table}", bindings! { "table" => table })
    }

    fn parse_indexes(&self, result: &QueryResult, _catalog_table: &str) -> Vec<Index> {
        let mut indexes: Vec<Index> = Vec::new();
        for row in result.rows() {
            let Some(key_name) = row.get("Key_name") else {
                continue;
            };
            let Some(column) = row.get("Column_name") else {
                continue;
            };
            let column = match row.get("Sub_part").and_then(|p| p.parse::<u32>().ok()) {
                Some(prefix) => IndexColumn::with_prefix(column, prefix),
                None => IndexColumn::new(column),
            };

            if let Some(existing) = indexes
                .iter_mut()
                .find(|i| i.name.as_deref() == Some(key_name))
            {
                existing.columns.push(column);
                continue;
            }

            let kind = if key_name == "PRIMARY" {
                IndexKind::Primary
            } else if row
                .get("Index_type")
                .map(|t| t.eq_ignore_ascii_case("fulltext"))
                .unwrap_or(false)
            {
                IndexKind::Fulltext
            } else if row.get("Non_unique") == Some("0") {
                IndexKind::Unique
            } else {
                IndexKind::Index
            };
            indexes.push(Index {
                name: Some(key_name.to_string()),
                kind,
                columns: vec![column],
            });
        }
        indexes
    }

    fn table_engine_query(&self, catalog_table: &str) -> Option<CatalogQuery> {
        Some((
            "SHOW TABLE STATUS FROM {identifier:database} LIKE {string:table}",
            bindings! { "database" => self.database.as_str(), "table" => catalog_table },
        ))
    }

    fn create_table_sql(&self, table: &str, definition: &Table, _reuse_sequence: bool) -> CreateTablePlan {
        let mut parts: Vec<String> = definition
            .columns
            .iter()
            .map(|c| self.column_definition(c))
            .collect();
        parts.extend(definition.indexes.iter().map(|i| self.index_clause(i)));

        let mut create = format!(
            "CREATE TABLE {} ({}) ENGINE={} DEFAULT CHARSET={}",
            self.quote_identifier(table),
            parts.join(", "),
            self.engine,
            self.charset
        );
        if let Some(collation) = &self.collation {
            create.push_str(&format!(" COLLATE={}", collation));
        }

        CreateTablePlan {
            before: Vec::new(),
            create,
            after: Vec::new(),
        }
    }

    fn drop_table_sql(&self, table: &str, _columns: &[Column]) -> Vec<String> {
        vec![format!("DROP TABLE {}", self.quote_identifier(table))]
    }

    fn rename_table_sql(&self, from: &str, to: &str) -> Vec<String> {
        vec![format!(
            "RENAME TABLE {} TO {}",
            self.quote_identifier(from),
            self.quote_identifier(to)
        )]
    }

    fn add_column_sql(&self, table: &str, column: &Column) -> Vec<String> {
        let mut sql = format!(
            "ALTER TABLE {} ADD {}",
            self.quote_identifier(table),
            self.column_definition(column)
        );
        if column.auto_increment {
            sql.push_str(" PRIMARY KEY");
        }
        vec![sql]
    }

    fn change_column_sql(&self, table: &str, old: &Column, new: &Column) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} CHANGE COLUMN {} {}",
            self.quote_identifier(table),
            self.quote_identifier(&old.name),
            self.column_definition(new)
        )]
    }

    fn remove_column_sql(&self, table: &str, column: &Column) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote_identifier(table),
            self.quote_identifier(&column.name)
        )]
    }

    fn add_index_sql(&self, table: &str, index: &Index) -> String {
        let table = self.quote_identifier(table);
        let cols = self.index_columns(&index.columns);
        let name = self.quote_identifier(&index.resolved_name());
        match index.kind {
            IndexKind::Primary => format!("ALTER TABLE {} ADD PRIMARY KEY ({})", table, cols),
            IndexKind::Unique => format!("ALTER TABLE {} ADD UNIQUE {} ({})", table, name, cols),
            IndexKind::Index => format!("ALTER TABLE {} ADD INDEX {} ({})", table, name, cols),
            IndexKind::Fulltext => format!("ALTER TABLE {} ADD FULLTEXT {} ({})", table, name, cols),
        }
    }

    fn remove_index_sql(&self, table: &str, index: &Index) -> String {
        let table = self.quote_identifier(table);
        match index.kind {
            IndexKind::Primary => format!("ALTER TABLE {} DROP PRIMARY KEY", table),
            _ => format!(
                "ALTER TABLE {} DROP INDEX {}",
                table,
                self.quote_identifier(&index.resolved_name())
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::schema::Index;

    fn dialect() -> MysqlDialect {
        MysqlDialect::from_config(&DbConfig::new(DialectKind::Mysql, "forum"))
    }

    #[test]
    fn test_escape_string() {
        let d = dialect();
        assert_eq!(d.escape_string("a'b\"c\\d\n\0"), "a\\'b\\\"c\\\\d\\n\\0");
        assert_eq!(d.quote_string("x"), "'x'");
    }

    #[test]
    fn test_column_definitions() {
        let d = dialect();
        let id = Column::new("id_item", "int").size(10).unsigned().auto_increment();
        assert_eq!(
            d.column_definition(&id),
            "`id_item` int(10) unsigned NOT NULL AUTO_INCREMENT"
        );

        let price = Column::new("price", "float").not_null().default_value("0");
        assert_eq!(d.column_definition(&price), "`price` float NOT NULL DEFAULT 0");

        let name = Column::new("name", "varchar").size(80).not_null().default_value("it's");
        assert_eq!(
            d.column_definition(&name),
            "`name` varchar(80) NOT NULL DEFAULT 'it\\'s'"
        );

        let body = Column::new("body", "text").not_null().default_value("");
        assert_eq!(d.column_definition(&body), "`body` text NOT NULL");

        let ip = Column::new("ip", "inet").default_null();
        assert_eq!(d.column_definition(&ip), "`ip` varbinary(16) DEFAULT NULL");
    }

    #[test]
    fn test_create_table() {
        let d = dialect();
        let table = Table::new(
            "smf_shop",
            vec![
                Column::new("id", "int").unsigned().auto_increment(),
                Column::new("name", "varchar").size(255).not_null().default_value(""),
            ],
            vec![
                Index::primary(&["id"]),
                Index::new(IndexKind::Index, &["name(191)"]).named("idx_name"),
            ],
        );
        let plan = d.create_table_sql("smf_shop", &table, false);
        assert!(plan.before.is_empty());
        assert_eq!(
            plan.create,
            "CREATE TABLE `smf_shop` (`id` int unsigned NOT NULL AUTO_INCREMENT, \
             `name` varchar(255) NOT NULL DEFAULT '', PRIMARY KEY (`id`), \
             KEY `idx_name` (`name`(191))) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"
        );
    }

    #[test]
    fn test_parse_field_types() {
        let d = dialect();
        let (t, unsigned) = d.parse_field_type("int(10) unsigned");
        assert_eq!(t, SqlType::new("int", Some(10)));
        assert!(unsigned);

        let (t, _) = d.parse_field_type("varbinary(16)");
        assert_eq!(t, SqlType::new("inet", None));

        let (t, _) = d.parse_field_type("decimal(10,2)");
        assert_eq!(t, SqlType::new("decimal(10,2)", None));

        let (t, unsigned) = d.parse_field_type("decimal(8, 3) unsigned");
        assert_eq!(t, SqlType::new("decimal(8,3)", None));
        assert!(unsigned);

        let (t, _) = d.parse_field_type("enum('a','b')");
        assert_eq!(t.name, "enum('a','b')");
    }

    #[test]
    fn test_parse_columns() {
        let d = dialect();
        let result = QueryResult::new(
            vec!["Field", "Type", "Null", "Key", "Default", "Extra"],
            vec![
                vec![Some("id"), Some("int(10) unsigned"), Some("NO"), Some("PRI"), None, Some("auto_increment")],
                vec![Some("note"), Some("varchar(80)"), Some("YES"), Some(""), None, Some("")],
                vec![Some("title"), Some("varchar(80)"), Some("NO"), Some(""), Some("'x'"), Some("")],
            ],
        );
        let columns = d.parse_columns(&result).unwrap();
        assert!(columns[0].auto_increment);
        assert!(columns[0].unsigned);
        assert_eq!(columns[0].default, ColumnDefault::Unset);
        assert_eq!(columns[1].default, ColumnDefault::Null);
        assert_eq!(columns[2].default, ColumnDefault::value("x"));
    }

    #[test]
    fn test_parse_indexes() {
        let d = dialect();
        let result = QueryResult::new(
            vec!["Key_name", "Non_unique", "Column_name", "Sub_part", "Index_type"],
            vec![
                vec![Some("PRIMARY"), Some("0"), Some("id"), None, Some("BTREE")],
                vec![Some("name"), Some("0"), Some("name"), Some("191"), Some("BTREE")],
                vec![Some("name"), Some("0"), Some("id_cat"), None, Some("BTREE")],
                vec![Some("body"), Some("1"), Some("body"), None, Some("FULLTEXT")],
            ],
        );
        let indexes = d.parse_indexes(&result, "smf_t");
        assert_eq!(indexes.len(), 3);
        assert_eq!(indexes[0].kind, IndexKind::Primary);
        assert_eq!(indexes[1].kind, IndexKind::Unique);
        assert_eq!(indexes[1].columns.len(), 2);
        assert_eq!(indexes[1].columns[0].prefix, Some(191));
        assert_eq!(indexes[2].kind, IndexKind::Fulltext);
    }

    #[test]
    fn test_session_setup() {
        let d = dialect();
        let setup = d.session_setup();
        assert_eq!(setup[0], "SET NAMES utf8mb4");
        assert!(setup[1].contains("STRICT_TRANS_TABLES"));
    }

    #[test]
    fn test_index_statements() {
        let d = dialect();
        let idx = Index::new(IndexKind::Unique, &["a", "b"]);
        assert_eq!(d.add_index_sql("t", &idx), "ALTER TABLE `t` ADD UNIQUE `a_b` (`a`, `b`)");
        assert_eq!(
            d.remove_index_sql("t", &Index::primary(&["a"])),
            "ALTER TABLE `t` DROP PRIMARY KEY"
        );
    }
}
