use super::{declined, IfExists};
use crate::core::db::schema::{is_integer_type, Column, ColumnChange};
use crate::core::session::PackageLogEntry;
use crate::core::{CallSite, DbError, Result, SchemaConflict};
use crate::database::Database;
use tracing::{debug, info};

impl Database {
    /// Adds a column. An existing column of the same name is left alone
    /// under [`IfExists::Ignore`] and changed to match otherwise.
    pub fn add_column(&mut self, site: CallSite, table: &str, column: &Column, if_exists: IfExists) -> Result<bool> {
        let resolved = self.session().resolve_table(table);
        if self.session().is_reserved(&resolved) {
            return Ok(declined(site, SchemaConflict::Reserved(resolved)));
        }
        if column.auto_increment && !is_integer_type(&column.type_name) {
            return Err(DbError::validation(
                "column",
                column.name.as_str(),
                "auto-increment columns must be integers",
            ));
        }

        self.session_mut().log_package(PackageLogEntry::RemoveColumn {
            table: resolved.clone(),
            column: column.name.clone(),
        });

        let existing = self.list_columns(site, table)?;
        if existing.iter().any(|c| c.name == column.name) {
            if if_exists == IfExists::Ignore {
                return Ok(declined(
                    site,
                    SchemaConflict::AlreadyExists(format!("{}.{}", resolved, column.name)),
                ));
            }
            return self.change_column(site, table, &column.name, &ColumnChange::from(column));
        }

        let statements = self.dialect().add_column_sql(&resolved, column);
        self.execute_ddl_atomically(site, &statements)?;
        info!(table = %resolved, column = %column.name, "added column");
        Ok(true)
    }

    /// Applies a partial change to an existing column. Nothing is issued when
    /// the result equals what the catalog already reports.
    pub fn change_column(&mut self, site: CallSite, table: &str, name: &str, change: &ColumnChange) -> Result<bool> {
        let resolved = self.session().resolve_table(table);
        if self.session().is_reserved(&resolved) {
            return Ok(declined(site, SchemaConflict::Reserved(resolved)));
        }

        let existing = self.list_columns(site, table)?;
        let Some(old) = existing.iter().find(|c| c.name == name) else {
            return Ok(declined(site, SchemaConflict::Missing(format!("{}.{}", resolved, name))));
        };

        let new = change.apply(old);
        if new.auto_increment && !is_integer_type(&new.type_name) {
            return Err(DbError::validation(
                "column",
                new.name.as_str(),
                "auto-increment columns must be integers",
            ));
        }
        if new.name != old.name && existing.iter().any(|c| c.name == new.name) {
            return Ok(declined(
                site,
                SchemaConflict::AlreadyExists(format!("{}.{}", resolved, new.name)),
            ));
        }
        if &new == old {
            debug!(table = %resolved, column = %name, "column already up to date");
            return Ok(true);
        }

        let statements = self.dialect().change_column_sql(&resolved, old, &new);
        self.execute_ddl_atomically(site, &statements)?;
        info!(table = %resolved, column = %name, "changed column");
        Ok(true)
    }

    pub fn remove_column(&mut self, site: CallSite, table: &str, name: &str) -> Result<bool> {
        let resolved = self.session().resolve_table(table);
        if self.session().is_reserved(&resolved) {
            return Ok(declined(site, SchemaConflict::Reserved(resolved)));
        }

        let existing = self.list_columns(site, table)?;
        let Some(column) = existing.iter().find(|c| c.name == name) else {
            return Ok(declined(site, SchemaConflict::Missing(format!("{}.{}", resolved, name))));
        };

        let statements = self.dialect().remove_column_sql(&resolved, column);
        self.execute_ddl_atomically(site, &statements)?;
        info!(table = %resolved, column = %name, "removed column");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_site;
    use crate::core::db::query::QueryResult;
    use crate::core::db::schema::ColumnDefault;
    use crate::dialect::DialectKind;
    use crate::test_utils::{mock_database, MockDriver};

    fn fields(rows: Vec<Vec<Option<&str>>>) -> QueryResult {
        QueryResult::new(vec!["Field", "Type", "Null", "Key", "Default", "Extra"], rows)
    }

    fn title_field() -> Vec<Option<&'static str>> {
        vec![Some("title"), Some("varchar(80)"), Some("NO"), Some(""), Some(""), Some("")]
    }

    #[test]
    fn test_add_column_twice_is_idempotent() {
        let driver = MockDriver::new()
            .respond_once("SHOW FIELDS", fields(vec![]))
            .respond("SHOW FIELDS", fields(vec![title_field()]));
        let (mut db, log) = mock_database(DialectKind::Mysql, driver);
        log.clear();

        let column = Column::new("title", "varchar").size(80).not_null().default_value("");
        assert!(db.add_column(call_site!(), "{db_prefix}t", &column, IfExists::Ignore).unwrap());
        assert_eq!(
            log.take(),
            vec![
                "SHOW FIELDS FROM `smf_t`",
                "ALTER TABLE `smf_t` ADD `title` varchar(80) NOT NULL DEFAULT ''",
            ]
        );

        assert!(!db.add_column(call_site!(), "{db_prefix}t", &column, IfExists::Ignore).unwrap());
        assert_eq!(log.take(), vec!["SHOW FIELDS FROM `smf_t`"]);
    }

    #[test]
    fn test_add_existing_column_with_overwrite_changes_it() {
        let driver = MockDriver::new().respond("SHOW FIELDS", fields(vec![title_field()]));
        let (mut db, log) = mock_database(DialectKind::Mysql, driver);
        log.clear();

        let column = Column::new("title", "varchar").size(255).not_null().default_value("");
        assert!(db.add_column(call_site!(), "{db_prefix}t", &column, IfExists::Overwrite).unwrap());
        assert_eq!(
            log.take().last().map(String::as_str),
            Some("ALTER TABLE `smf_t` CHANGE COLUMN `title` `title` varchar(255) NOT NULL DEFAULT ''")
        );
    }

    #[test]
    fn test_change_column_unchanged_issues_nothing() {
        let driver = MockDriver::new().respond("SHOW FIELDS", fields(vec![title_field()]));
        let (mut db, log) = mock_database(DialectKind::Mysql, driver);
        log.clear();

        let change = ColumnChange {
            default: Some(ColumnDefault::value("")),
            ..Default::default()
        };
        assert!(db.change_column(call_site!(), "{db_prefix}t", "title", &change).unwrap());
        assert_eq!(log.take().len(), 1);
    }

    #[test]
    fn test_change_keeps_two_argument_type() {
        let price = vec![Some("price"), Some("decimal(10,2)"), Some("YES"), Some(""), None, Some("")];
        let driver = MockDriver::new().respond("SHOW FIELDS", fields(vec![price]));
        let (mut db, log) = mock_database(DialectKind::Mysql, driver);
        log.clear();

        let change = ColumnChange {
            nullable: Some(false),
            ..Default::default()
        };
        assert!(db.change_column(call_site!(), "{db_prefix}shop", "price", &change).unwrap());
        let statements = log.take();
        let alter = statements.last().map(String::as_str).unwrap_or_default();
        assert!(
            alter.starts_with("ALTER TABLE `smf_shop` CHANGE COLUMN `price` `price` decimal(10,2) NOT NULL"),
            "{}",
            alter
        );
    }

    #[test]
    fn test_change_missing_column() {
        let driver = MockDriver::new().respond("SHOW FIELDS", fields(vec![]));
        let (mut db, _) = mock_database(DialectKind::Mysql, driver);
        assert!(!db
            .change_column(call_site!(), "{db_prefix}t", "nope", &ColumnChange::default())
            .unwrap());
    }

    #[test]
    fn test_postgres_change_runs_in_transaction() {
        let driver = MockDriver::new().respond(
            "information_schema.columns",
            QueryResult::new(
                vec!["column_name", "column_default", "is_nullable", "data_type", "character_maximum_length"],
                vec![vec![Some("hits"), None, Some("YES"), Some("integer"), None]],
            ),
        );
        let (mut db, log) = mock_database(DialectKind::Postgres, driver);
        log.clear();

        let change = ColumnChange {
            nullable: Some(false),
            default: Some(ColumnDefault::value("0")),
            ..Default::default()
        };
        assert!(db.change_column(call_site!(), "{db_prefix}t", "hits", &change).unwrap());
        let statements = log.take();
        assert_eq!(statements[1], "BEGIN");
        assert_eq!(
            &statements[2..],
            &[
                "ALTER TABLE \"smf_t\" ALTER COLUMN \"hits\" SET DEFAULT '0'".to_string(),
                "UPDATE \"smf_t\" SET \"hits\" = '0' WHERE \"hits\" IS NULL".to_string(),
                "ALTER TABLE \"smf_t\" ALTER COLUMN \"hits\" SET NOT NULL".to_string(),
                "COMMIT".to_string(),
            ]
        );
    }

    #[test]
    fn test_reserved_table_is_refused() {
        let (mut db, log) = mock_database(DialectKind::Mysql, MockDriver::new());
        log.clear();
        let column = Column::new("x", "int");
        assert!(!db.add_column(call_site!(), "{db_prefix}members", &column, IfExists::Ignore).unwrap());
        assert!(!db.remove_column(call_site!(), "{db_prefix}members", "x").unwrap());
        assert!(log.take().is_empty());
    }

    #[test]
    fn test_remove_column() {
        let driver = MockDriver::new().respond("SHOW FIELDS", fields(vec![title_field()]));
        let (mut db, log) = mock_database(DialectKind::Mysql, driver);
        log.clear();
        assert!(db.remove_column(call_site!(), "{db_prefix}t", "title").unwrap());
        assert_eq!(
            log.take().last().map(String::as_str),
            Some("ALTER TABLE `smf_t` DROP COLUMN `title`")
        );
    }
}
