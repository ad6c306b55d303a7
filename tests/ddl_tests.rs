#[cfg(test)]
mod ddl_tests {
    use forumdb::call_site;
    use forumdb::core::PackageLogEntry;
    use forumdb::test_utils::{column_result, mock_database, MockDriver, StatementLog};
    use forumdb::{Column, Database, DialectKind, IfExists, Index, IndexKind, QueryResult, Table};

    fn shop_items() -> Table {
        Table::new(
            "{db_prefix}shop_items",
            vec![
                Column::new("id_item", "int").size(10).unsigned().auto_increment(),
                Column::new("name", "varchar").size(255).not_null().default_value(""),
                Column::new("stock", "int").not_null().default_value("0"),
            ],
            vec![Index::primary(&["id_item"]), Index::new(IndexKind::Index, &["name"])],
        )
    }

    fn ddl(log: &StatementLog) -> String {
        log.take()
            .into_iter()
            .filter(|s| !s.starts_with("SHOW") && !s.contains("pg_tables") && !s.contains("information_schema"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn fresh(kind: DialectKind, driver: MockDriver) -> (Database, StatementLog) {
        let (db, log) = mock_database(kind, driver);
        log.clear();
        (db, log)
    }

    #[test]
    fn test_create_table_mysql() {
        let (mut db, log) = fresh(DialectKind::Mysql, MockDriver::new());
        assert!(db.create_table(call_site!(), &shop_items(), IfExists::Ignore).unwrap());
        insta::assert_snapshot!(ddl(&log), @"CREATE TABLE `smf_shop_items` (`id_item` int(10) unsigned NOT NULL AUTO_INCREMENT, `name` varchar(255) NOT NULL DEFAULT '', `stock` int NOT NULL DEFAULT 0, PRIMARY KEY (`id_item`), KEY `name` (`name`(191))) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4");
    }

    #[test]
    fn test_create_table_postgres() {
        let (mut db, log) = fresh(DialectKind::Postgres, MockDriver::new());
        assert!(db.create_table(call_site!(), &shop_items(), IfExists::Ignore).unwrap());
        insta::assert_snapshot!(ddl(&log), @r#"
        BEGIN
        DROP SEQUENCE IF EXISTS "smf_shop_items_seq"
        CREATE SEQUENCE "smf_shop_items_seq"
        CREATE TABLE "smf_shop_items" ("id_item" int NOT NULL DEFAULT nextval('smf_shop_items_seq'), "name" character varying(255) NOT NULL DEFAULT '', "stock" int NOT NULL DEFAULT '0', PRIMARY KEY ("id_item"))
        CREATE INDEX "smf_shop_items_name" ON "smf_shop_items" ("name")
        COMMIT
        "#);
    }

    #[test]
    fn test_update_rebuild_postgres_copies_shared_columns() {
        // Old table: id_item, name and a column `legacy` the new schema drops.
        let driver = MockDriver::new()
            .respond_once("pg_tables", column_result("tablename", &["smf_shop_items"]))
            .respond(
                "information_schema.columns",
                QueryResult::new(
                    vec!["column_name", "column_default", "is_nullable", "data_type", "character_maximum_length"],
                    vec![
                        vec![Some("id_item"), Some("nextval('smf_shop_items_seq'::regclass)"), Some("NO"), Some("integer"), None],
                        vec![Some("name"), Some("''::character varying"), Some("NO"), Some("character varying"), Some("80")],
                        vec![Some("legacy"), None, Some("YES"), Some("text"), None],
                    ],
                ),
            );
        let (mut db, log) = fresh(DialectKind::Postgres, driver);
        assert!(db.create_table(call_site!(), &shop_items(), IfExists::Update).unwrap());
        insta::assert_snapshot!(ddl(&log), @r#"
        BEGIN
        ALTER TABLE "smf_shop_items" RENAME TO "smf_shop_items_old"
        ALTER INDEX IF EXISTS "smf_shop_items_pkey" RENAME TO "smf_shop_items_old_pkey"
        CREATE SEQUENCE IF NOT EXISTS "smf_shop_items_seq"
        CREATE TABLE "smf_shop_items" ("id_item" int NOT NULL DEFAULT nextval('smf_shop_items_seq'), "name" character varying(255) NOT NULL DEFAULT '', "stock" int NOT NULL DEFAULT '0', PRIMARY KEY ("id_item"))
        INSERT INTO "smf_shop_items" ("id_item", "name") SELECT "id_item", "name" FROM "smf_shop_items_old"
        DROP TABLE "smf_shop_items_old"
        CREATE INDEX "smf_shop_items_name" ON "smf_shop_items" ("name")
        COMMIT
        "#);
    }

    #[test]
    fn test_primary_key_drops_after_rebuild_postgres() {
        let driver = MockDriver::new()
            .respond_once("pg_tables", column_result("tablename", &["smf_shop_items"]))
            .respond(
                "pg_get_indexdef",
                QueryResult::new(
                    vec!["is_primary", "is_unique", "name", "inddef"],
                    vec![vec![
                        Some("1"),
                        Some("1"),
                        Some("smf_shop_items_pkey"),
                        Some("CREATE UNIQUE INDEX smf_shop_items_pkey ON public.smf_shop_items USING btree (id_item)"),
                    ]],
                ),
            );
        let (mut db, log) = fresh(DialectKind::Postgres, driver);
        assert!(db.create_table(call_site!(), &shop_items(), IfExists::Update).unwrap());

        // The old key is moved aside before the new table claims the name.
        let statements = log.take();
        let moved = statements
            .iter()
            .position(|s| s.starts_with("ALTER INDEX IF EXISTS \"smf_shop_items_pkey\""))
            .unwrap();
        let created = statements.iter().position(|s| s.starts_with("CREATE TABLE")).unwrap();
        assert!(moved < created);

        assert!(db.remove_index(call_site!(), "{db_prefix}shop_items", "primary").unwrap());
        assert_eq!(
            log.take().last().map(String::as_str),
            Some("ALTER TABLE \"smf_shop_items\" DROP CONSTRAINT \"smf_shop_items_pkey\"")
        );
    }

    #[test]
    fn test_primary_key_dropped_by_catalog_name() {
        // A key PostgreSQL renamed on a collision is dropped under its real name.
        let driver = MockDriver::new().respond(
            "pg_get_indexdef",
            QueryResult::new(
                vec!["is_primary", "is_unique", "name", "inddef"],
                vec![vec![
                    Some("1"),
                    Some("1"),
                    Some("smf_shop_items_pkey1"),
                    Some("CREATE UNIQUE INDEX smf_shop_items_pkey1 ON public.smf_shop_items USING btree (id_item)"),
                ]],
            ),
        );
        let (mut db, log) = fresh(DialectKind::Postgres, driver);
        assert!(db.remove_index(call_site!(), "{db_prefix}shop_items", "primary").unwrap());
        assert_eq!(
            log.take().last().map(String::as_str),
            Some("ALTER TABLE \"smf_shop_items\" DROP CONSTRAINT \"smf_shop_items_pkey1\"")
        );
    }

    #[test]
    fn test_rebuild_failure_rolls_back_on_postgres() {
        let driver = MockDriver::new()
            .respond_once("pg_tables", column_result("tablename", &["smf_shop_items"]))
            .fail_on("CREATE TABLE");
        let (mut db, log) = fresh(DialectKind::Postgres, driver);
        assert!(db.create_table(call_site!(), &shop_items(), IfExists::Update).is_err());
        let statements = log.take();
        assert_eq!(statements.last().map(String::as_str), Some("ROLLBACK"));
        assert!(!statements.iter().any(|s| s.starts_with("DROP TABLE")));
    }

    #[test]
    fn test_overwrite_drops_then_creates() {
        let driver = MockDriver::new()
            .respond_once("SHOW TABLES", column_result("Tables_in_forum", &["smf_shop_items"]))
            .respond_once("SHOW TABLES", column_result("Tables_in_forum", &["smf_shop_items"]));
        let (mut db, log) = fresh(DialectKind::Mysql, driver);
        assert!(db.create_table(call_site!(), &shop_items(), IfExists::Overwrite).unwrap());
        let statements = ddl(&log);
        let lines: Vec<&str> = statements.lines().collect();
        assert_eq!(lines[0], "DROP TABLE `smf_shop_items`");
        assert!(lines[1].starts_with("CREATE TABLE `smf_shop_items`"));
    }

    #[test]
    fn test_reserved_tables_never_get_ddl() {
        for kind in [DialectKind::Mysql, DialectKind::Postgres] {
            for policy in [IfExists::Ignore, IfExists::Overwrite, IfExists::Update] {
                let (mut db, log) = fresh(kind, MockDriver::new());
                let mut table = shop_items();
                table.name = "{db_prefix}messages".to_string();
                assert!(!db.create_table(call_site!(), &table, policy).unwrap());
                assert!(!db.drop_table(call_site!(), "{db_prefix}messages").unwrap());
                assert!(log.take().is_empty());
            }
        }
    }

    #[test]
    fn test_index_prefix_per_dialect() {
        let fields = QueryResult::new(
            vec!["Field", "Type", "Null", "Key", "Default", "Extra"],
            vec![vec![Some("subject"), Some("varchar(255)"), Some("NO"), Some(""), Some(""), Some("")]],
        );
        let (mut db, log) = fresh(DialectKind::Mysql, MockDriver::new().respond("SHOW FIELDS", fields));
        let index = Index::new(IndexKind::Index, &["subject"]);
        assert!(db.add_index(call_site!(), "{db_prefix}topics", &index, IfExists::Ignore).unwrap());
        insta::assert_snapshot!(ddl(&log), @"ALTER TABLE `smf_topics` ADD INDEX `subject` (`subject`(191))");

        let columns = QueryResult::new(
            vec!["column_name", "column_default", "is_nullable", "data_type", "character_maximum_length"],
            vec![vec![Some("subject"), Some("''::character varying"), Some("NO"), Some("character varying"), Some("255")]],
        );
        let (mut db, log) = fresh(
            DialectKind::Postgres,
            MockDriver::new().respond("information_schema.columns", columns),
        );
        assert!(db.add_index(call_site!(), "{db_prefix}topics", &index, IfExists::Ignore).unwrap());
        let statements = log.take();
        assert_eq!(
            statements.last().map(String::as_str),
            Some("CREATE INDEX \"smf_topics_subject\" ON \"smf_topics\" (\"subject\")")
        );
    }

    #[test]
    fn test_package_log_records_inverse_operations() {
        let (mut db, _) = fresh(DialectKind::Mysql, MockDriver::new());
        db.create_table(call_site!(), &shop_items(), IfExists::Ignore).unwrap();
        db.add_column(call_site!(), "{db_prefix}shop_items", &Column::new("price", "float"), IfExists::Ignore)
            .unwrap();

        let entries = db.session_mut().take_package_log();
        assert_eq!(
            entries,
            vec![
                PackageLogEntry::RemoveTable { table: "smf_shop_items".to_string() },
                PackageLogEntry::RemoveColumn {
                    table: "smf_shop_items".to_string(),
                    column: "price".to_string(),
                },
            ]
        );
        assert!(db.session().package_log().is_empty());
    }
}
