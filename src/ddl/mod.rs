//! Schema introspection and mutation.
//!
//! Mutators compare the requested definition with what the catalog reports
//! and only issue the DDL needed to close the gap. Conflicts (reserved
//! tables, objects already present or missing) are logged and reported as
//! `Ok(false)` rather than errors, so install scripts can run repeatedly.

mod columns;
mod indexes;
mod introspect;
mod tables;

pub use indexes::adjust_index_columns;

use crate::core::db::query::QueryOptions;
use crate::core::{CallSite, Result, SchemaConflict};
use crate::database::Database;
use tracing::{debug, warn};

/// What to do when the object being created already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IfExists {
    /// Leave it alone.
    #[default]
    Ignore,
    /// Drop and recreate it.
    Overwrite,
    /// Rebuild it and carry existing rows over (tables only).
    Update,
}

impl Database {
    /// Runs generated DDL, which is trusted.
    fn execute_ddl(&mut self, site: CallSite, statements: &[String]) -> Result<()> {
        for sql in statements {
            self.execute_sql(site, sql, QueryOptions::trusted())?;
        }
        Ok(())
    }

    /// Runs statements as one unit where the engine can roll DDL back.
    fn execute_ddl_atomically(&mut self, site: CallSite, statements: &[String]) -> Result<()> {
        let wrap = statements.len() > 1 && self.dialect().transactional_ddl();
        self.atomically(wrap, |db| db.execute_ddl(site, statements))
    }
}

fn declined(site: CallSite, conflict: SchemaConflict) -> bool {
    match conflict {
        SchemaConflict::Reserved(_) => warn!(call_site = %site, %conflict, "schema change refused"),
        _ => debug!(call_site = %site, %conflict, "schema change skipped"),
    }
    false
}
