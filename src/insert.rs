//! Multi-row inserts with conflict handling.
//!
//! One call inserts many rows in `plain`, `ignore` or `replace` mode and can
//! report the generated keys. Dialects without a native form of a feature
//! get it emulated: PostgreSQL spells ignore/replace with `ON CONFLICT`,
//! MySQL reports ids through the driver and has ignore-with-ids done row by
//! row with a keyed lookup for rows that were skipped.

use crate::core::{CallSite, DbError, Result};
use crate::core::db::query::QueryOptions;
use crate::database::Database;
use crate::template::{Bindings, QueryTemplate, TypeTag, Value};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static COLUMN_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("column name pattern"));

/// What happens when a row collides with an existing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertMode {
    /// The statement fails.
    #[default]
    Plain,
    /// The row is skipped.
    Ignore,
    /// The existing row is overwritten.
    Replace,
}

/// Which generated keys to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Returning {
    #[default]
    Nothing,
    /// The key of the last row.
    Single,
    /// One key per row, in row order.
    PerRow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertResult {
    Nothing,
    Single(i64),
    PerRow(Vec<i64>),
}

/// A column of an insert, parsed from its type spec.
///
/// `string-N` truncates the value to N characters server side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertColumn {
    pub name: String,
    pub tag: TypeTag,
    pub max_length: Option<u32>,
}

impl InsertColumn {
    pub fn parse(name: &str, type_spec: &str) -> Result<Self> {
        if !COLUMN_NAME.is_match(name) {
            return Err(DbError::validation(type_spec, name, "Invalid column name"));
        }
        let (tag, max_length) = match type_spec.split_once('-') {
            Some(("string", length)) => {
                let length = length.parse::<u32>().map_err(|_| {
                    DbError::validation(type_spec, name, "Invalid string length")
                })?;
                (TypeTag::String, Some(length))
            }
            _ => (type_spec.parse::<TypeTag>().map_err(|_| {
                DbError::validation(type_spec, name, "Undefined type used in the database query")
            })?, None),
        };
        Ok(InsertColumn {
            name: name.to_string(),
            tag,
            max_length,
        })
    }

    /// The placeholder this column contributes to a row template.
    fn placeholder(&self) -> String {
        match self.max_length {
            Some(length) => format!("SUBSTRING({{string:{}}}, 1, {})", self.name, length),
            None => format!("{{{}:{}}}", self.tag, self.name),
        }
    }
}

/// An insert request.
///
/// ```
/// use forumdb::{Insert, InsertMode, Returning};
///
/// let insert = Insert::new("{db_prefix}log_actions")
///     .mode(InsertMode::Ignore)
///     .column("id_member", "int")
///     .column("action", "string-30")
///     .row(vec![1.into(), "login".into()])
///     .keys(&["id_action", "id_member", "action"])
///     .returning(Returning::Single);
/// assert_eq!(insert.rows.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Insert {
    pub table: String,
    pub mode: InsertMode,
    /// `(name, type spec)` pairs.
    pub columns: Vec<(String, String)>,
    pub rows: Vec<Vec<Value>>,
    /// Key columns. The first one is the column whose values are returned.
    pub keys: Vec<String>,
    pub returning: Returning,
}

impl Insert {
    pub fn new(table: &str) -> Self {
        Insert {
            table: table.to_string(),
            ..Default::default()
        }
    }

    pub fn mode(mut self, mode: InsertMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn column(mut self, name: &str, type_spec: &str) -> Self {
        self.columns.push((name.to_string(), type_spec.to_string()));
        self
    }

    pub fn row(mut self, values: Vec<Value>) -> Self {
        self.rows.push(values);
        self
    }

    pub fn rows(mut self, rows: impl IntoIterator<Item = Vec<Value>>) -> Self {
        self.rows.extend(rows);
        self
    }

    pub fn keys(mut self, keys: &[&str]) -> Self {
        self.keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn returning(mut self, returning: Returning) -> Self {
        self.returning = returning;
        self
    }
}

/// Everything an insert needs once validated.
struct Plan<'a> {
    table: String,
    columns: Vec<InsertColumn>,
    keys: Vec<&'a str>,
    /// `INSERT ... INTO t (cols)`
    head: String,
    conflict: String,
    rendered: Vec<String>,
}

impl Database {
    /// Inserts rows, returning generated keys as requested.
    ///
    /// An empty table name or an empty row set is a no-op.
    pub fn insert(&mut self, site: CallSite, insert: &Insert) -> Result<InsertResult> {
        if insert.table.is_empty() || insert.rows.is_empty() {
            return Ok(InsertResult::Nothing);
        }
        let plan = self.plan_insert(insert)?;
        debug!(
            table = %plan.table,
            rows = plan.rendered.len(),
            mode = ?insert.mode,
            "inserting rows"
        );

        let key_column = match (insert.returning, plan.keys.first()) {
            (Returning::Nothing, _) => {
                let sql = format!("{} VALUES {}{}", plan.head, plan.rendered.join(", "), plan.conflict);
                self.execute_sql(site, &sql, QueryOptions::trusted())?;
                return Ok(InsertResult::Nothing);
            }
            (_, Some(key)) => *key,
            (_, None) => {
                return Err(DbError::validation(
                    "insert",
                    insert.table.as_str(),
                    "Returning ids needs at least one key column",
                ))
            }
        };

        let ids = if insert.mode == InsertMode::Ignore {
            self.insert_each_ignoring(site, &plan, key_column, &insert.rows)?
        } else {
            self.insert_returning(site, &plan, key_column)?
        };

        Ok(match insert.returning {
            Returning::PerRow => InsertResult::PerRow(ids),
            _ => ids
                .last()
                .map(|id| InsertResult::Single(*id))
                .unwrap_or(InsertResult::Nothing),
        })
    }

    fn plan_insert<'a>(&self, insert: &'a Insert) -> Result<Plan<'a>> {
        let invalid = |message: &str| DbError::validation("insert", insert.table.as_str(), message);

        let columns = insert
            .columns
            .iter()
            .map(|(name, spec)| InsertColumn::parse(name, spec))
            .collect::<Result<Vec<_>>>()?;
        if columns.is_empty() {
            return Err(invalid("No columns given"));
        }
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        let keys: Vec<&str> = insert.keys.iter().map(String::as_str).collect();

        if insert.mode == InsertMode::Replace {
            if keys.is_empty() {
                return Err(invalid("When using the replace mode, the key column is a required entry."));
            }
            if keys.iter().any(|k| !names.contains(k)) {
                return Err(invalid("Primary Key field missing in insert call"));
            }
        }
        if insert.mode == InsertMode::Ignore
            && insert.returning != Returning::Nothing
            && !keys.iter().any(|k| names.contains(k))
        {
            return Err(invalid("Ignore mode with returned ids needs a key column among the inserted columns"));
        }
        if let Some(bad) = insert.rows.iter().position(|r| r.len() != columns.len()) {
            return Err(invalid(&format!(
                "Row {} has {} values for {} columns",
                bad,
                insert.rows[bad].len(),
                columns.len()
            )));
        }

        let mold = QueryTemplate::parse(&format!(
            "({})",
            columns
                .iter()
                .map(InsertColumn::placeholder)
                .collect::<Vec<_>>()
                .join(", ")
        ))?;
        let rendered = insert
            .rows
            .iter()
            .map(|row| {
                mold.render(
                    self.dialect(),
                    self.session(),
                    &row_bindings(&columns, row),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let dialect = self.dialect();
        let table = self.session().resolve_table(&insert.table);
        let head = format!(
            "{} INTO {} ({})",
            dialect.insert_keyword(insert.mode),
            dialect.quote_identifier(&table),
            names
                .iter()
                .map(|n| dialect.quote_identifier(n))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let conflict = dialect.conflict_clause(insert.mode, &names, &keys);

        Ok(Plan {
            table,
            columns,
            keys,
            head,
            conflict,
            rendered,
        })
    }

    /// One statement for all rows.
    fn insert_returning(&mut self, site: CallSite, plan: &Plan<'_>, key_column: &str) -> Result<Vec<i64>> {
        let sql = format!("{} VALUES {}{}", plan.head, plan.rendered.join(", "), plan.conflict);

        if let Some(returning) = self.dialect().returning_clause(key_column) {
            let result = self.execute_sql(site, &format!("{}{}", sql, returning), QueryOptions::trusted())?;
            return result.rows().filter_map(|r| r.at(0)).map(parse_id).collect();
        }

        self.execute_sql(site, &sql, QueryOptions::trusted())?;
        let first = self
            .driver_insert_id()?
            .ok_or_else(|| DbError::Driver(format!("no insert id reported for {}", plan.table)))?;
        Ok((0..plan.rendered.len() as i64).map(|i| first + i).collect())
    }

    /// Row by row, so skipped rows can be told apart from inserted ones.
    ///
    /// A skipped row's key is read back with a lookup on the key columns.
    /// Between the skipped insert and that lookup another session may delete
    /// the row; the lookup then fails with a driver error.
    fn insert_each_ignoring(
        &mut self,
        site: CallSite,
        plan: &Plan<'_>,
        key_column: &str,
        rows: &[Vec<Value>],
    ) -> Result<Vec<i64>> {
        let lookup = self.key_lookup_template(plan, key_column)?;
        let returning = self.dialect().returning_clause(key_column);
        let mut ids = Vec::with_capacity(plan.rendered.len());

        for (rendered, values) in plan.rendered.iter().zip(rows) {
            let sql = format!("{} VALUES {}{}", plan.head, rendered, plan.conflict);

            let inserted = match &returning {
                Some(clause) => {
                    let result = self.execute_sql(site, &format!("{}{}", sql, clause), QueryOptions::trusted())?;
                    result.scalar().map(parse_id).transpose()?
                }
                None => {
                    let before = self.driver_insert_id()?;
                    self.execute_sql(site, &sql, QueryOptions::trusted())?;
                    let after = self.driver_insert_id()?;
                    after.filter(|id| *id != 0 && after != before)
                }
            };

            let id = match inserted {
                Some(id) => id,
                None => {
                    let query = lookup.render(self.dialect(), self.session(), &row_bindings(&plan.columns, values))?;
                    let result = self.execute_sql(site, &query, QueryOptions::trusted())?;
                    match result.scalar() {
                        Some(raw) => parse_id(raw)?,
                        None => {
                            return Err(DbError::Driver(format!(
                                "row skipped by {} could not be read back",
                                plan.table
                            )))
                        }
                    }
                }
            };
            ids.push(id);
        }
        Ok(ids)
    }

    /// `SELECT key FROM t WHERE k1 = ... AND k2 = ... LIMIT 1` over the key
    /// columns present in the insert.
    fn key_lookup_template(&self, plan: &Plan<'_>, key_column: &str) -> Result<QueryTemplate> {
        let dialect = self.dialect();
        let conditions: Vec<String> = plan
            .columns
            .iter()
            .filter(|c| plan.keys.contains(&c.name.as_str()))
            .map(|c| format!("{} = {}", dialect.quote_identifier(&c.name), c.placeholder()))
            .collect();
        QueryTemplate::parse(&format!(
            "SELECT {} FROM {} WHERE {} LIMIT 1",
            dialect.quote_identifier(key_column),
            dialect.quote_identifier(&plan.table),
            conditions.join(" AND ")
        ))
    }
}

fn row_bindings(columns: &[InsertColumn], row: &[Value]) -> Bindings {
    columns
        .iter()
        .zip(row)
        .map(|(c, v)| (c.name.clone(), v.clone()))
        .collect()
}

fn parse_id(raw: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| DbError::Driver(format!("returned key {} is not an integer", raw)))
}
