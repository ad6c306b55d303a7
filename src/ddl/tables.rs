use super::{adjust_index_columns, declined, IfExists};
use crate::core::db::schema::{Column, ColumnDefault, Table};
use crate::core::session::PackageLogEntry;
use crate::core::{CallSite, Result, SchemaConflict};
use crate::database::Database;
use crate::insert::Insert;
use crate::template::Value;
use tracing::{debug, info};

impl Database {
    /// Creates a table from its generic description.
    ///
    /// An existing table is kept under [`IfExists::Ignore`] (reported as
    /// success), dropped and recreated under [`IfExists::Overwrite`], and
    /// rebuilt with its rows carried over under [`IfExists::Update`].
    pub fn create_table(&mut self, site: CallSite, table: &Table, if_exists: IfExists) -> Result<bool> {
        let resolved = self.session().resolve_table(&table.name);
        if self.session().is_reserved(&resolved) {
            return Ok(declined(site, SchemaConflict::Reserved(resolved)));
        }
        table.validate()?;

        self.session_mut().log_package(PackageLogEntry::RemoveTable {
            table: resolved.clone(),
        });

        let mut definition = table.clone();
        definition.indexes = table
            .indexes
            .iter()
            .map(|i| adjust_index_columns(self.dialect(), i, &table.columns))
            .collect();

        if self.table_exists(site, &table.name)? {
            match if_exists {
                IfExists::Ignore => {
                    debug!(table = %resolved, "table already exists");
                    return Ok(true);
                }
                IfExists::Overwrite => {
                    self.drop_table(site, &table.name)?;
                }
                IfExists::Update => {
                    self.rebuild_table(site, &resolved, &definition)?;
                    info!(table = %resolved, "rebuilt table");
                    return Ok(true);
                }
            }
        }

        let plan = self.dialect().create_table_sql(&resolved, &definition, false);
        let mut statements = plan.before;
        statements.push(plan.create);
        statements.extend(plan.after);
        self.execute_ddl_atomically(site, &statements)?;
        info!(table = %resolved, "created table");
        Ok(true)
    }

    /// Renames the table aside, creates the new definition and copies the
    /// columns both versions share before dropping the old copy.
    fn rebuild_table(&mut self, site: CallSite, resolved: &str, definition: &Table) -> Result<()> {
        let previous: Vec<Column> = self.list_columns(site, &definition.name)?;
        let old = format!("{}_old", resolved);
        let wrap = self.dialect().transactional_ddl();

        self.atomically(wrap, |db| {
            if db.table_exists(site, &old)? {
                let leftover = db.dialect().drop_table_sql(&old, &[]);
                db.execute_ddl(site, &leftover)?;
            }
            let rename = db.dialect().rename_table_sql(resolved, &old);
            db.execute_ddl(site, &rename)?;

            let plan = db.dialect().create_table_sql(resolved, definition, true);
            db.execute_ddl(site, &plan.before)?;
            db.execute_ddl(site, &[plan.create])?;

            let shared: Vec<String> = definition
                .columns
                .iter()
                .filter(|c| previous.iter().any(|p| p.name == c.name))
                .map(|c| db.dialect().quote_identifier(&c.name))
                .collect();
            if !shared.is_empty() {
                let list = shared.join(", ");
                let copy = format!(
                    "INSERT INTO {} ({}) SELECT {} FROM {}",
                    db.dialect().quote_identifier(resolved),
                    list,
                    list,
                    db.dialect().quote_identifier(&old)
                );
                db.execute_ddl(site, &[copy])?;
            }

            // The sequence is shared with the new table, so only the table goes.
            let drop_old = db.dialect().drop_table_sql(&old, &[]);
            db.execute_ddl(site, &drop_old)?;
            db.execute_ddl(site, &plan.after)
        })
    }

    /// Drops a table, and its id sequence where the dialect keeps one.
    pub fn drop_table(&mut self, site: CallSite, table: &str) -> Result<bool> {
        let resolved = self.session().resolve_table(table);
        if self.session().is_reserved(&resolved) {
            return Ok(declined(site, SchemaConflict::Reserved(resolved)));
        }
        if !self.table_exists(site, table)? {
            return Ok(declined(site, SchemaConflict::Missing(resolved)));
        }

        let columns = if self.dialect().uses_sequences() {
            self.list_columns(site, table)?
        } else {
            Vec::new()
        };
        let statements = self.dialect().drop_table_sql(&resolved, &columns);
        self.execute_ddl_atomically(site, &statements)?;
        info!(table = %resolved, "dropped table");
        Ok(true)
    }

    /// Creates every missing table and writes its seed rows. Tables that
    /// already exist are left untouched, seeds included.
    ///
    /// Returns the resolved names of the tables that were created.
    pub fn install(&mut self, site: CallSite, tables: &[Table]) -> Result<Vec<String>> {
        let mut created = Vec::new();
        for table in tables {
            let resolved = self.session().resolve_table(&table.name);
            if self.table_exists(site, &table.name)? {
                debug!(table = %resolved, "already installed");
                continue;
            }
            if !self.create_table(site, table, IfExists::Ignore)? {
                continue;
            }
            if let Some(seed) = seed_insert(table) {
                self.insert(site, &seed)?;
            }
            created.push(resolved);
        }
        info!(tables = created.len(), "install finished");
        Ok(created)
    }
}

/// One insert covering every column any seed row names. Missing values fall
/// back to the column default, or NULL.
fn seed_insert(table: &Table) -> Option<Insert> {
    if table.seed_rows.is_empty() {
        return None;
    }
    let columns: Vec<&Column> = table
        .columns
        .iter()
        .filter(|c| table.seed_rows.iter().any(|r| r.contains_key(&c.name)))
        .collect();
    if columns.is_empty() {
        return None;
    }

    let mut insert = Insert::new(&table.name);
    for column in &columns {
        insert = insert.column(&column.name, column.binding_tag());
    }
    Some(insert.rows(table.seed_rows.iter().map(|row| {
        columns
            .iter()
            .map(|c| match (row.get(&c.name), &c.default) {
                (Some(value), _) => value.clone(),
                (None, ColumnDefault::Value(v)) => Value::Text(v.clone()),
                (None, _) => Value::Null,
            })
            .collect()
    })))
}
