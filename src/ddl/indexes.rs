use super::{declined, IfExists};
use crate::core::db::schema::{is_text_type, Column, Index, IndexKind};
use crate::core::session::PackageLogEntry;
use crate::core::{CallSite, DbError, Result, SchemaConflict};
use crate::database::Database;
use crate::dialect::Dialect;
use tracing::info;

/// Fits index column prefixes to what the dialect supports.
///
/// Where the engine caps index key length, text columns without an explicit
/// prefix get one when they are unsized or longer than the cap. Engines
/// without prefix syntax get every prefix removed.
pub fn adjust_index_columns(dialect: &dyn Dialect, index: &Index, columns: &[Column]) -> Index {
    let mut adjusted = index.clone();
    match dialect.index_prefix_limit() {
        Some(limit) => {
            for col in adjusted.columns.iter_mut().filter(|c| c.prefix.is_none()) {
                let needs_prefix = columns
                    .iter()
                    .find(|c| c.name == col.name)
                    .map(|c| is_text_type(&c.type_name) && c.size.map_or(true, |s| s > limit))
                    .unwrap_or(false);
                if needs_prefix {
                    col.prefix = Some(limit);
                }
            }
        }
        None => {
            for col in adjusted.columns.iter_mut() {
                col.prefix = None;
            }
        }
    }
    adjusted
}

fn same_index(a: &Index, b: &Index) -> bool {
    match (a.kind, b.kind) {
        (IndexKind::Primary, IndexKind::Primary) => true,
        (IndexKind::Primary, _) | (_, IndexKind::Primary) => false,
        _ => a.resolved_name().eq_ignore_ascii_case(&b.resolved_name()),
    }
}

impl Database {
    /// Adds an index. With [`IfExists::Ignore`] an index of the same name (or
    /// any primary key, for a primary key) leaves the table untouched;
    /// otherwise the old index is dropped first.
    pub fn add_index(&mut self, site: CallSite, table: &str, index: &Index, if_exists: IfExists) -> Result<bool> {
        if index.columns.is_empty() {
            return Ok(false);
        }
        let resolved = self.session().resolve_table(table);
        if self.session().is_reserved(&resolved) {
            return Ok(declined(site, SchemaConflict::Reserved(resolved)));
        }

        let columns = self.list_columns(site, table)?;
        if let Some(missing) = index
            .columns
            .iter()
            .find(|ic| !columns.iter().any(|c| c.name == ic.name))
        {
            return Err(DbError::validation(
                "index",
                index.resolved_name(),
                format!("column {} does not exist in {}", missing.name, resolved),
            ));
        }
        let index = adjust_index_columns(self.dialect(), index, &columns);
        let name = index.resolved_name();

        self.session_mut().log_package(PackageLogEntry::RemoveIndex {
            table: resolved.clone(),
            index: name.clone(),
        });

        let existing = self.list_indexes(site, table)?;
        if let Some(found) = existing.iter().find(|i| same_index(i, &index)) {
            if if_exists == IfExists::Ignore {
                return Ok(declined(site, SchemaConflict::AlreadyExists(format!("{}.{}", resolved, name))));
            }
            let sql = self.dialect().remove_index_sql(&resolved, found);
            self.execute_ddl(site, &[sql])?;
        }

        let sql = self.dialect().add_index_sql(&resolved, &index);
        self.execute_ddl(site, &[sql])?;
        info!(table = %resolved, index = %name, "added index");
        Ok(true)
    }

    /// Drops an index by name; `primary` names the primary key.
    pub fn remove_index(&mut self, site: CallSite, table: &str, name: &str) -> Result<bool> {
        let resolved = self.session().resolve_table(table);
        if self.session().is_reserved(&resolved) {
            return Ok(declined(site, SchemaConflict::Reserved(resolved)));
        }

        let existing = self.list_indexes(site, table)?;
        let found = existing.iter().find(|i| {
            if name.eq_ignore_ascii_case("primary") {
                i.kind == IndexKind::Primary
            } else {
                i.kind != IndexKind::Primary && i.resolved_name().eq_ignore_ascii_case(name)
            }
        });
        let Some(found) = found else {
            return Ok(declined(site, SchemaConflict::Missing(format!("{}.{}", resolved, name))));
        };

        let sql = self.dialect().remove_index_sql(&resolved, found);
        self.execute_ddl(site, &[sql])?;
        info!(table = %resolved, index = %name, "removed index");
        Ok(true)
    }
}
