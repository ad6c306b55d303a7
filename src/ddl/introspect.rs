use crate::core::db::query::QueryOptions;
use crate::core::db::schema::{Column, Index, TableStructure};
use crate::core::{CallSite, Result};
use crate::database::Database;

impl Database {
    /// Table names in the current database or schema, optionally filtered
    /// with a `LIKE` pattern.
    pub fn list_tables(&mut self, site: CallSite, filter: Option<&str>) -> Result<Vec<String>> {
        let (template, bindings) = self.dialect().list_tables_query(filter);
        let result = self.query_with(site, template, &bindings, QueryOptions::trusted())?;
        Ok(result
            .rows()
            .filter_map(|r| r.at(0).map(str::to_string))
            .collect())
    }

    pub fn table_exists(&mut self, site: CallSite, table: &str) -> Result<bool> {
        let catalog = self.session().catalog_table(table);
        let filter = self.escape_like_pattern(&catalog);
        Ok(self
            .list_tables(site, Some(&filter))?
            .iter()
            .any(|t| t == &catalog))
    }

    /// Columns of a table in generic form.
    pub fn list_columns(&mut self, site: CallSite, table: &str) -> Result<Vec<Column>> {
        let resolved = self.session().resolve_table(table);
        let catalog = self.session().catalog_table(table);
        let (template, bindings) = self.dialect().list_columns_query(&resolved, &catalog);
        let result = self.query_with(site, template, &bindings, QueryOptions::trusted())?;
        self.dialect().parse_columns(&result)
    }

    /// Indexes of a table in generic form. PostgreSQL index names come back
    /// without the table name prefix they are created with.
    pub fn list_indexes(&mut self, site: CallSite, table: &str) -> Result<Vec<Index>> {
        let resolved = self.session().resolve_table(table);
        let catalog = self.session().catalog_table(table);
        let (template, bindings) = self.dialect().list_indexes_query(&resolved, &catalog);
        let result = self.query_with(site, template, &bindings, QueryOptions::trusted())?;
        Ok(self.dialect().parse_indexes(&result, &catalog))
    }

    pub fn table_structure(&mut self, site: CallSite, table: &str) -> Result<TableStructure> {
        let catalog = self.session().catalog_table(table);
        let engine = match self.dialect().table_engine_query(&catalog) {
            Some((template, bindings)) => self
                .query_with(site, template, &bindings, QueryOptions::trusted())?
                .rows()
                .next()
                .and_then(|r| r.get("Engine").map(str::to_string)),
            None => None,
        };
        Ok(TableStructure {
            name: self.session().resolve_table(table),
            engine,
            columns: self.list_columns(site, table)?,
            indexes: self.list_indexes(site, table)?,
        })
    }

    /// Escapes `_` and `%` so a table name matches only itself.
    fn escape_like_pattern(&self, name: &str) -> String {
        name.replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_")
    }
}

#[cfg(test)]
mod tests {
    use crate::call_site;
    use crate::core::db::query::QueryResult;
    use crate::core::db::schema::{ColumnDefault, IndexKind};
    use crate::dialect::DialectKind;
    use crate::test_utils::{column_result, mock_database, MockDriver};

    #[test]
    fn test_list_tables_mysql() {
        let driver = MockDriver::new().respond("SHOW TABLES", column_result("Tables_in_forum", &["smf_a", "smf_b"]));
        let (mut db, log) = mock_database(DialectKind::Mysql, driver);
        log.clear();
        assert_eq!(db.list_tables(call_site!(), None).unwrap(), vec!["smf_a", "smf_b"]);
        assert_eq!(log.take(), vec!["SHOW TABLES FROM `forum`"]);
    }

    #[test]
    fn test_table_exists_escapes_wildcards() {
        let driver = MockDriver::new().respond("pg_tables", column_result("tablename", &["smf_shop"]));
        let (mut db, log) = mock_database(DialectKind::Postgres, driver);
        log.clear();
        assert!(db.table_exists(call_site!(), "{db_prefix}shop").unwrap());
        assert!(!db.table_exists(call_site!(), "{db_prefix}shops").unwrap());
        let statements = log.take();
        assert_eq!(
            statements[0],
            "SELECT tablename FROM pg_tables WHERE schemaname = 'public' AND tablename LIKE 'smf\\_shop' ORDER BY tablename"
        );
    }

    #[test]
    fn test_list_columns_postgres() {
        let driver = MockDriver::new().respond(
            "information_schema.columns",
            QueryResult::new(
                vec!["column_name", "column_default", "is_nullable", "data_type", "character_maximum_length"],
                vec![
                    vec![Some("id"), Some("nextval('smf_t_seq'::regclass)"), Some("NO"), Some("integer"), None],
                    vec![Some("name"), Some("''::character varying"), Some("NO"), Some("character varying"), Some("80")],
                    vec![Some("seen"), None, Some("YES"), Some("timestamp without time zone"), None],
                ],
            ),
        );
        let (mut db, _) = mock_database(DialectKind::Postgres, driver);
        let columns = db.list_columns(call_site!(), "{db_prefix}t").unwrap();
        assert!(columns[0].auto_increment);
        assert_eq!(columns[0].type_name, "int");
        assert_eq!(columns[1].type_name, "varchar");
        assert_eq!(columns[1].size, Some(80));
        assert_eq!(columns[1].default, ColumnDefault::value(""));
        assert_eq!(columns[2].type_name, "datetime");
        assert_eq!(columns[2].default, ColumnDefault::Null);
    }

    #[test]
    fn test_table_structure_reports_engine() {
        let driver = MockDriver::new()
            .respond("SHOW TABLE STATUS", QueryResult::new(vec!["Name", "Engine"], vec![vec![Some("smf_t"), Some("InnoDB")]]))
            .respond(
                "SHOW FIELDS",
                QueryResult::new(
                    vec!["Field", "Type", "Null", "Key", "Default", "Extra"],
                    vec![vec![Some("ip"), Some("varbinary(16)"), Some("YES"), Some(""), None, Some("")]],
                ),
            )
            .respond(
                "SHOW KEYS",
                QueryResult::new(
                    vec!["Key_name", "Non_unique", "Column_name", "Sub_part", "Index_type"],
                    vec![vec![Some("ip"), Some("1"), Some("ip"), None, Some("BTREE")]],
                ),
            );
        let (mut db, _) = mock_database(DialectKind::Mysql, driver);
        let structure = db.table_structure(call_site!(), "{db_prefix}t").unwrap();
        assert_eq!(structure.name, "smf_t");
        assert_eq!(structure.engine.as_deref(), Some("InnoDB"));
        assert_eq!(structure.columns[0].type_name, "inet");
        assert_eq!(structure.indexes[0].kind, IndexKind::Index);
    }
}
