/// Query Execution Module
///
/// Result sets as returned by the drivers, per-call execution options, and
/// the statement rewrite applied before execution on engines that sort
/// grouped results implicitly.
use crate::core::Result;

/// How a driver should fetch a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Read the whole result into memory before returning.
    #[default]
    Buffered,
    /// Stream rows from the server.
    Unbuffered,
}

/// Represents the result of a SQL statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Column names from the query result
    pub columns: Vec<String>,
    /// Rows of data, `None` for SQL NULL
    pub rows: Vec<Vec<Option<String>>>,
    /// Number of rows returned
    pub row_count: usize,
    /// Rows changed by a write statement
    pub affected_rows: u64,
}

impl QueryResult {
    /// Creates a new QueryResult from column names and row data
    pub fn new<C, V>(columns: Vec<C>, rows: Vec<Vec<Option<V>>>) -> Self
    where
        C: Into<String>,
        V: Into<String>,
    {
        let rows: Vec<Vec<Option<String>>> = rows
            .into_iter()
            .map(|row| row.into_iter().map(|v| v.map(Into::into)).collect())
            .collect();
        QueryResult {
            columns: columns.into_iter().map(Into::into).collect(),
            row_count: rows.len(),
            rows,
            affected_rows: 0,
        }
    }

    /// Result of a statement that returns no rows.
    pub fn affected(affected_rows: u64) -> Self {
        QueryResult {
            affected_rows,
            ..Default::default()
        }
    }

    pub fn with_affected_rows(mut self, affected_rows: u64) -> Self {
        self.affected_rows = affected_rows;
        self
    }

    /// Position of a column, compared case-insensitively.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Iterates rows with by-name column access.
    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |values| Row::new(&self.columns, values))
    }

    /// First column of the first row.
    pub fn scalar(&self) -> Option<&str> {
        self.rows.first()?.first()?.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A borrowed row, either of a [`QueryResult`] or fresh off a stream.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    values: &'a [Option<String>],
}

/// Receives the rows of a streamed query one at a time. An error stops
/// the stream.
pub type RowSink<'a> = dyn FnMut(Row<'_>) -> Result<()> + 'a;

impl<'a> Row<'a> {
    pub fn new(columns: &'a [String], values: &'a [Option<String>]) -> Self {
        Row { columns, values }
    }

    /// Value of the named column; `None` if absent or NULL.
    pub fn get(&self, column: &str) -> Option<&'a str> {
        let index = self.columns.iter().position(|c| c.eq_ignore_ascii_case(column))?;
        self.at(index)
    }

    pub fn at(&self, index: usize) -> Option<&'a str> {
        self.values.get(index)?.as_deref()
    }
}

/// Per-call execution options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Skip the raw-quote and comment/delay-function checks for SQL the caller built.
    pub security_override: bool,
    /// Overrides the session's configured fetch mode for
    /// [`Database::query_each_with`](crate::Database::query_each_with).
    pub fetch: Option<FetchMode>,
}

impl QueryOptions {
    pub fn trusted() -> Self {
        QueryOptions {
            security_override: true,
            fetch: None,
        }
    }

    pub fn unbuffered(mut self) -> Self {
        self.fetch = Some(FetchMode::Unbuffered);
        self
    }
}

/// Appends `ORDER BY NULL` to a grouped query with no ordering of its own,
/// before any trailing `LIMIT`. Returns `None` when the statement is left
/// unchanged.
///
/// Keywords are only looked for outside string literals, so bound values
/// are never edited. `backslash_escapes` follows the dialect's literal rules.
pub fn suppress_group_sort(sql: &str, backslash_escapes: bool) -> Option<String> {
    let code = blank_literals(sql, backslash_escapes)?.to_ascii_uppercase();
    if !code.trim_start().starts_with("SELECT") || code.contains("ORDER BY") {
        return None;
    }
    let group_by = code.rfind("GROUP BY")?;
    match code[group_by..].find("LIMIT ") {
        Some(offset) => {
            let pos = group_by + offset;
            Some(format!("{}ORDER BY NULL {}", &sql[..pos], &sql[pos..]))
        }
        None => Some(format!("{} ORDER BY NULL", sql.trim_end())),
    }
}

/// Copy of `sql` with the contents of every single-quoted literal replaced
/// by spaces, byte for byte. `None` if a literal is never closed.
fn blank_literals(sql: &str, backslash_escapes: bool) -> Option<String> {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        out.push(c);
        if c != '\'' {
            continue;
        }
        let mut closed = false;
        while let Some(inner) = chars.next() {
            match inner {
                '\\' if backslash_escapes => {
                    out.push(' ');
                    if let Some(escaped) = chars.next() {
                        out.extend(std::iter::repeat(' ').take(escaped.len_utf8()));
                    }
                }
                '\'' if chars.peek() == Some(&'\'') => {
                    chars.next();
                    out.push_str("  ");
                }
                '\'' => {
                    out.push('\'');
                    closed = true;
                    break;
                }
                other => out.extend(std::iter::repeat(' ').take(other.len_utf8())),
            }
        }
        if !closed {
            return None;
        }
    }
    Some(out)
}
