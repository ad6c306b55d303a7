//! Typed query templates.
//!
//! A template is SQL text with `{tag:name}` placeholders. Compiling it
//! validates each bound value against its tag and substitutes a literal
//! encoded for the session's dialect. Two bare tokens are reserved:
//! `{db_prefix}` expands to the table prefix and `{query_*}` to a SQL
//! fragment registered on the session.

mod tags;
mod value;

pub use tags::{encode, TypeTag};
pub use value::{Bindings, Value};

use crate::core::{DbError, Result, Session};
use crate::dialect::Dialect;
use once_cell::sync::Lazy;
use regex::Regex;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{([a-z_]+)(?::([a-zA-Z0-9_-]+))?\}").expect("placeholder pattern")
});

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    /// `{name}` with no type: only `db_prefix` and `query_*` are valid.
    Bare(String),
    Literal(String),
    Typed { tag: TypeTag, name: String },
}

/// A parsed template, reusable across many sets of bindings.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl QueryTemplate {
    /// Splits `source` into text and placeholders. Unknown type tags fail
    /// here; missing bindings fail at [`render`](Self::render).
    pub fn parse(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in PLACEHOLDER.captures_iter(source) {
            let (Some(whole), Some(tag)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if whole.start() > last {
                segments.push(Segment::Text(source[last..whole.start()].to_string()));
            }
            let tag = tag.as_str();
            segments.push(match caps.get(2).map(|m| m.as_str()) {
                None => Segment::Bare(tag.to_string()),
                Some(name) if tag == "literal" => Segment::Literal(name.to_string()),
                Some(name) => Segment::Typed {
                    tag: tag.parse::<TypeTag>().map_err(|_| {
                        DbError::validation(tag, name, "Undefined type used in the database query")
                    })?,
                    name: name.to_string(),
                },
            });
            last = whole.end();
        }
        if last < source.len() {
            segments.push(Segment::Text(source[last..].to_string()));
        }

        Ok(QueryTemplate {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names of the typed placeholders, in order of appearance.
    pub fn placeholders(&self) -> impl Iterator<Item = (TypeTag, &str)> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Typed { tag, name } => Some((*tag, name.as_str())),
            _ => None,
        })
    }

    /// Produces final SQL for the given bindings.
    pub fn render(&self, dialect: &dyn Dialect, session: &Session, bindings: &Bindings) -> Result<String> {
        let mut sql = String::with_capacity(self.source.len() + 16);
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => sql.push_str(text),
                Segment::Bare(name) if name == "db_prefix" => sql.push_str(session.prefix()),
                Segment::Bare(name) => match session.context_fragment(name) {
                    Some(fragment) if name.starts_with("query_") => sql.push_str(fragment),
                    _ => {
                        return Err(DbError::validation(
                            name.as_str(),
                            "",
                            "Invalid value inserted or no type specified",
                        ))
                    }
                },
                Segment::Literal(text) => sql.push_str(&dialect.quote_string(text)),
                Segment::Typed { tag, name } => {
                    let value = bindings.get(name).ok_or_else(|| {
                        DbError::validation(
                            tag.as_str(),
                            name.as_str(),
                            "The database value you're trying to insert does not exist",
                        )
                    })?;
                    sql.push_str(&encode(dialect, *tag, name, value)?);
                }
            }
        }
        Ok(sql)
    }
}

/// Parses and renders in one step.
pub fn compile(dialect: &dyn Dialect, session: &Session, template: &str, bindings: &Bindings) -> Result<String> {
    QueryTemplate::parse(template)?.render(dialect, session, bindings)
}
