/// Schema Descriptor Module
///
/// Generic, dialect-neutral descriptions of tables, columns and indexes.
/// Package code declares tables with these types; introspection produces
/// them from the live catalog so the two can be compared.
use crate::core::{DbError, Result};
use crate::template::Value;
use serde::{Deserialize, Deserializer};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;

const INTEGER_TYPES: &[&str] = &["tinyint", "smallint", "mediumint", "int", "integer", "bigint"];

const TEXT_TYPES: &[&str] = &[
    "char",
    "varchar",
    "tinytext",
    "text",
    "mediumtext",
    "largetext",
    "longtext",
];

/// Whether a generic type name is one of the integer family.
pub fn is_integer_type(type_name: &str) -> bool {
    INTEGER_TYPES.contains(&type_name.to_lowercase().as_str())
}

/// Whether a generic type name holds character data.
pub fn is_text_type(type_name: &str) -> bool {
    TEXT_TYPES.contains(&type_name.to_lowercase().as_str())
}

/// Column default with "not given" kept apart from "NULL".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ColumnDefault {
    #[default]
    Unset,
    Null,
    Value(String),
}

impl ColumnDefault {
    pub fn value(value: impl Into<String>) -> Self {
        ColumnDefault::Value(value.into())
    }

    pub fn as_value(&self) -> Option<&str> {
        match self {
            ColumnDefault::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for ColumnDefault {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Literal {
            Text(String),
            Int(i64),
            Float(f64),
            Bool(bool),
        }

        Ok(match Option::<Literal>::deserialize(deserializer)? {
            None => ColumnDefault::Null,
            Some(Literal::Text(s)) => ColumnDefault::Value(s),
            Some(Literal::Int(i)) => ColumnDefault::Value(i.to_string()),
            Some(Literal::Float(f)) => ColumnDefault::Value(f.to_string()),
            Some(Literal::Bool(b)) => ColumnDefault::Value(if b { "1" } else { "0" }.to_string()),
        })
    }
}

fn default_nullable() -> bool {
    true
}

/// A column in generic form.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Column {
    pub name: String,
    /// Generic type name, e.g. `int`, `varchar`, `inet`.
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub size: Option<u32>,
    #[serde(default)]
    pub unsigned: bool,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub default: ColumnDefault,
    #[serde(default, rename = "auto")]
    pub auto_increment: bool,
}

impl Column {
    pub fn new(name: &str, type_name: &str) -> Self {
        Column {
            name: name.to_string(),
            type_name: type_name.to_lowercase(),
            size: None,
            unsigned: false,
            nullable: true,
            default: ColumnDefault::Unset,
            auto_increment: false,
        }
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    pub fn unsigned(mut self) -> Self {
        self.unsigned = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = ColumnDefault::Value(value.into());
        self
    }

    pub fn default_null(mut self) -> Self {
        self.default = ColumnDefault::Null;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self.nullable = false;
        self
    }

    /// Insert type tag matching this column's generic type.
    pub fn binding_tag(&self) -> &'static str {
        let t = self.type_name.as_str();
        if is_integer_type(t) {
            "int"
        } else {
            match t {
                "float" | "double" | "decimal" | "real" => "float",
                "date" => "date",
                "time" => "time",
                "datetime" | "timestamp" => "datetime",
                "inet" => "inet",
                "uuid" => "uuid",
                _ => "string",
            }
        }
    }
}

/// Index flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Primary,
    Unique,
    #[default]
    Index,
    Fulltext,
}

/// A column reference inside an index, optionally limited to a prefix length.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub struct IndexColumn {
    pub name: String,
    pub prefix: Option<u32>,
}

impl IndexColumn {
    pub fn new(name: &str) -> Self {
        IndexColumn {
            name: name.trim().to_string(),
            prefix: None,
        }
    }

    pub fn with_prefix(name: &str, prefix: u32) -> Self {
        IndexColumn {
            name: name.trim().to_string(),
            prefix: Some(prefix),
        }
    }

    /// Parses `name` or `name(191)`.
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        if let (Some(open), true) = (spec.find('('), spec.ends_with(')')) {
            if let Ok(prefix) = spec[open + 1..spec.len() - 1].trim().parse::<u32>() {
                return IndexColumn::with_prefix(&spec[..open], prefix);
            }
        }
        IndexColumn::new(spec)
    }
}

impl From<String> for IndexColumn {
    fn from(spec: String) -> Self {
        IndexColumn::parse(&spec)
    }
}

impl From<&str> for IndexColumn {
    fn from(spec: &str) -> Self {
        IndexColumn::parse(spec)
    }
}

impl fmt::Display for IndexColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.prefix {
            Some(prefix) => write!(f, "{}({})", self.name, prefix),
            None => write!(f, "{}", self.name),
        }
    }
}

/// An index in generic form.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Index {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: IndexKind,
    pub columns: Vec<IndexColumn>,
}

impl Index {
    pub fn new(kind: IndexKind, columns: &[&str]) -> Self {
        Index {
            name: None,
            kind,
            columns: columns.iter().map(|c| IndexColumn::parse(c)).collect(),
        }
    }

    pub fn primary(columns: &[&str]) -> Self {
        Index::new(IndexKind::Primary, columns)
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// The explicit name, or one derived from the column list.
    pub fn resolved_name(&self) -> String {
        if self.kind == IndexKind::Primary {
            return "primary".to_string();
        }
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => self
                .columns
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join("_"),
        }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// A declared table, with optional rows written at install time.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub indexes: Vec<Index>,
    #[serde(default)]
    pub seed_rows: Vec<HashMap<String, Value>>,
}

impl Table {
    pub fn new(name: &str, columns: Vec<Column>, indexes: Vec<Index>) -> Self {
        Table {
            name: name.to_string(),
            columns,
            indexes,
            seed_rows: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Checks the descriptor invariants before any DDL is generated.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| DbError::validation("table", self.name.clone(), message);

        if self.columns.is_empty() {
            return Err(invalid("a table needs at least one column".to_string()));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(invalid(format!("duplicate column {}", column.name)));
            }
        }

        for index in &self.indexes {
            for col in &index.columns {
                if !seen.contains(col.name.as_str()) {
                    return Err(invalid(format!(
                        "index {} references unknown column {}",
                        index.resolved_name(),
                        col.name
                    )));
                }
            }
        }

        let primary = self.indexes.iter().find(|i| i.kind == IndexKind::Primary);
        for column in self.columns.iter().filter(|c| c.auto_increment) {
            if !is_integer_type(&column.type_name) {
                return Err(invalid(format!(
                    "auto-increment column {} must be an integer type",
                    column.name
                )));
            }
            let in_primary = primary
                .map(|p| p.columns.iter().any(|c| c.name == column.name))
                .unwrap_or(false);
            if !in_primary {
                return Err(invalid(format!(
                    "auto-increment column {} must be part of the primary key",
                    column.name
                )));
            }
        }

        Ok(())
    }
}

/// Introspected table: columns, indexes and (MySQL) storage engine.
#[derive(Debug, Clone, PartialEq)]
pub struct TableStructure {
    pub name: String,
    pub engine: Option<String>,
    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
}

/// A partial column definition applied over an existing column.
///
/// Every `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnChange {
    pub name: Option<String>,
    pub type_name: Option<String>,
    pub size: Option<u32>,
    pub unsigned: Option<bool>,
    pub nullable: Option<bool>,
    pub default: Option<ColumnDefault>,
    pub drop_default: bool,
    pub auto_increment: Option<bool>,
}

impl ColumnChange {
    /// The full column that results from applying this change to `old`.
    pub fn apply(&self, old: &Column) -> Column {
        let type_name = self
            .type_name
            .as_ref()
            .map(|t| t.to_lowercase())
            .unwrap_or_else(|| old.type_name.clone());
        let unsigned = is_integer_type(&type_name) && self.unsigned.unwrap_or(old.unsigned);
        let nullable = self.nullable.unwrap_or(old.nullable);

        let mut default = if self.drop_default {
            ColumnDefault::Unset
        } else {
            self.default.clone().unwrap_or_else(|| old.default.clone())
        };
        // NOT NULL with a NULL default means "no default at all".
        if !nullable && default == ColumnDefault::Null {
            default = ColumnDefault::Unset;
        }

        Column {
            name: self.name.clone().unwrap_or_else(|| old.name.clone()),
            type_name,
            size: self.size.or(old.size),
            unsigned,
            nullable,
            default,
            auto_increment: self.auto_increment.unwrap_or(old.auto_increment),
        }
    }
}

impl From<&Column> for ColumnChange {
    fn from(column: &Column) -> Self {
        ColumnChange {
            name: Some(column.name.clone()),
            type_name: Some(column.type_name.clone()),
            size: column.size,
            unsigned: Some(column.unsigned),
            nullable: Some(column.nullable),
            default: match column.default {
                ColumnDefault::Unset => None,
                ref d => Some(d.clone()),
            },
            drop_default: false,
            auto_increment: Some(column.auto_increment),
        }
    }
}

#[derive(Deserialize)]
struct SchemaFile {
    tables: Vec<Table>,
}

/// Reads table descriptors from a `.json` (array of tables) or `.toml`
/// (`[[tables]]`) file.
pub fn load_tables<P: AsRef<Path>>(path: P) -> Result<Vec<Table>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let tables = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str::<Vec<Table>>(&content)?,
        Some("toml") => toml::from_str::<SchemaFile>(&content)?.tables,
        _ => {
            return Err(DbError::Config(format!(
                "unsupported schema file {}",
                path.display()
            )))
        }
    };
    for table in &tables {
        table.validate()?;
    }
    Ok(tables)
}
