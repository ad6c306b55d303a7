//! Generic ↔ native column type mapping.
//!
//! Package code declares columns with generic names (`int`, `varchar`,
//! `inet`, `largetext`, ...). Each engine stores them under its own names;
//! introspection maps the native names back so declared and live schemas
//! compare equal.

use crate::dialect::DialectKind;
use std::fmt;

/// A type name with an optional size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlType {
    pub name: String,
    pub size: Option<u32>,
}

impl SqlType {
    pub fn new(name: &str, size: Option<u32>) -> Self {
        SqlType {
            name: name.to_string(),
            size,
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.size {
            Some(size) => write!(f, "{}({})", self.name, size),
            None => f.write_str(&self.name),
        }
    }
}

/// MySQL types that never carry a size.
const MYSQL_UNSIZED: &[&str] = &[
    "boolean",
    "bool",
    "tinytext",
    "text",
    "mediumtext",
    "longtext",
    "tinyblob",
    "blob",
    "mediumblob",
    "longblob",
    "date",
    "datetime",
    "time",
    "timestamp",
    "json",
    "float",
    "double",
];

const MYSQL_FORWARD: &[(&str, &str, Option<u32>)] = &[
    ("inet", "varbinary", Some(16)),
    ("uuid", "binary", Some(16)),
    ("largetext", "longtext", None),
    ("integer", "int", None),
];

const POSTGRES_FORWARD: &[(&str, &str)] = &[
    ("varchar", "character varying"),
    ("char", "character"),
    ("mediumint", "int"),
    ("tinyint", "smallint"),
    ("tinytext", "character varying"),
    ("mediumtext", "text"),
    ("largetext", "text"),
    ("longtext", "text"),
    ("time", "time without time zone"),
    ("datetime", "timestamp without time zone"),
    ("timestamp", "timestamp without time zone"),
    ("float", "real"),
    ("double", "double precision"),
    ("decimal", "numeric"),
    ("bool", "boolean"),
    ("tinyblob", "bytea"),
    ("blob", "bytea"),
    ("mediumblob", "bytea"),
    ("longblob", "bytea"),
    ("binary", "bytea"),
    ("varbinary", "bytea"),
];

const POSTGRES_REVERSE: &[(&str, &str)] = &[
    ("character varying", "varchar"),
    ("character", "char"),
    ("integer", "int"),
    ("time without time zone", "time"),
    ("timestamp without time zone", "datetime"),
    ("real", "float"),
    ("double precision", "double"),
    ("numeric", "decimal"),
    ("bytea", "blob"),
];

/// Maps a type between its generic and native names.
///
/// With `reverse == false` a generic declaration is turned into the native
/// type to emit in DDL; with `reverse == true` an introspected native type is
/// turned back into its generic name. Names are compared case-insensitively
/// and unknown types pass through unchanged.
pub fn calculate_type(
    dialect: DialectKind,
    type_name: &str,
    size: Option<u32>,
    reverse: bool,
) -> SqlType {
    let name = type_name.trim().to_lowercase();
    match dialect {
        DialectKind::Mysql => mysql_type(&name, size, reverse),
        DialectKind::Postgres => postgres_type(&name, size, reverse),
    }
}

fn mysql_type(name: &str, size: Option<u32>, reverse: bool) -> SqlType {
    let mapped = if reverse {
        match (name, size) {
            ("varbinary", Some(16)) => SqlType::new("inet", None),
            ("binary", Some(16)) => SqlType::new("uuid", None),
            ("integer", _) => SqlType::new("int", size),
            _ => SqlType::new(name, size),
        }
    } else {
        MYSQL_FORWARD
            .iter()
            .find(|(generic, _, _)| *generic == name)
            .map(|(_, native, fixed)| SqlType::new(native, fixed.or(size)))
            .unwrap_or_else(|| SqlType::new(name, size))
    };

    if MYSQL_UNSIZED.contains(&mapped.name.as_str()) {
        SqlType::new(&mapped.name, None)
    } else {
        mapped
    }
}

fn postgres_type(name: &str, size: Option<u32>, reverse: bool) -> SqlType {
    let table = if reverse { POSTGRES_REVERSE } else { POSTGRES_FORWARD };
    let native = table
        .iter()
        .find(|(from, _)| *from == name)
        .map(|(_, to)| *to)
        .unwrap_or(name);

    // tinytext has no native counterpart; it becomes a bounded varchar.
    if !reverse && name == "tinytext" {
        return SqlType::new(native, Some(255));
    }

    if native.contains("char") {
        SqlType::new(native, size)
    } else {
        SqlType::new(native, None)
    }
}
