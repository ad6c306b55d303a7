use crate::core::{DbError, Result};
use crate::dialect::DialectKind;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// The forum's own tables. Package code may never create or drop these.
pub const DEFAULT_RESERVED_TABLES: &[&str] = &[
    "admin_info_files",
    "approval_queue",
    "attachments",
    "background_tasks",
    "ban_groups",
    "ban_items",
    "board_permissions",
    "board_permissions_view",
    "boards",
    "calendar",
    "calendar_holidays",
    "categories",
    "custom_fields",
    "group_moderators",
    "log_actions",
    "log_activity",
    "log_banned",
    "log_boards",
    "log_comments",
    "log_digest",
    "log_errors",
    "log_floodcontrol",
    "log_group_requests",
    "log_mark_read",
    "log_member_notices",
    "log_notify",
    "log_online",
    "log_packages",
    "log_polls",
    "log_reported",
    "log_reported_comments",
    "log_scheduled_tasks",
    "log_search_messages",
    "log_search_results",
    "log_search_subjects",
    "log_search_topics",
    "log_spider_hits",
    "log_spider_stats",
    "log_subscribed",
    "log_topics",
    "mail_queue",
    "member_logins",
    "membergroups",
    "members",
    "mentions",
    "message_icons",
    "messages",
    "moderator_groups",
    "moderators",
    "package_servers",
    "permission_profiles",
    "permissions",
    "personal_messages",
    "pm_labeled_messages",
    "pm_labels",
    "pm_recipients",
    "pm_rules",
    "poll_choices",
    "polls",
    "qanda",
    "scheduled_tasks",
    "sessions",
    "settings",
    "smileys",
    "smiley_files",
    "spiders",
    "subscriptions",
    "themes",
    "topics",
    "user_alerts",
    "user_alerts_prefs",
    "user_drafts",
    "user_likes",
];

/// Connection and behaviour settings for one database session.
#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    pub dialect: DialectKind,
    #[serde(default = "default_host")]
    pub host: String,
    pub port: Option<u16>,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
    /// Table name prefix substituted for `{db_prefix}`.
    #[serde(default)]
    pub prefix: String,
    pub charset: Option<String>,
    #[serde(default = "default_true")]
    pub strict_mode: bool,
    /// Stream result sets instead of buffering them client side.
    #[serde(default)]
    pub unbuffered: bool,
    #[serde(default)]
    pub profiling: bool,
    /// Number of profiled queries whose SQL text is kept.
    #[serde(default = "default_profile_sql_limit")]
    pub profile_sql_limit: u64,
    #[serde(default = "default_profile_capacity")]
    pub profile_capacity: usize,
    pub reserved_tables: Option<Vec<String>>,
    #[serde(default)]
    pub mysql: MysqlSettings,
    #[serde(default)]
    pub postgres: PostgresSettings,
}

/// MySQL-only table options.
#[derive(Debug, Clone, Deserialize)]
pub struct MysqlSettings {
    #[serde(default = "default_engine")]
    pub engine: String,
    pub collation: Option<String>,
}

impl Default for MysqlSettings {
    fn default() -> Self {
        MysqlSettings {
            engine: default_engine(),
            collation: None,
        }
    }
}

/// PostgreSQL-only settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PostgresSettings {
    #[serde(default = "default_schema")]
    pub schema: String,
}

impl Default for PostgresSettings {
    fn default() -> Self {
        PostgresSettings {
            schema: default_schema(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_true() -> bool {
    true
}

fn default_profile_sql_limit() -> u64 {
    50
}

fn default_profile_capacity() -> usize {
    1000
}

fn default_engine() -> String {
    "InnoDB".to_string()
}

fn default_schema() -> String {
    "public".to_string()
}

impl DbConfig {
    /// Minimal configuration for the given dialect, mostly useful in tests.
    pub fn new(dialect: DialectKind, database: &str) -> Self {
        DbConfig {
            dialect,
            host: default_host(),
            port: None,
            user: String::new(),
            password: String::new(),
            database: database.to_string(),
            prefix: String::new(),
            charset: None,
            strict_mode: true,
            unbuffered: false,
            profiling: false,
            profile_sql_limit: default_profile_sql_limit(),
            profile_capacity: default_profile_capacity(),
            reserved_tables: None,
            mysql: MysqlSettings::default(),
            postgres: PostgresSettings::default(),
        }
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    /// Port to use when none is configured.
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(match self.dialect {
            DialectKind::Mysql => 3306,
            DialectKind::Postgres => 5432,
        })
    }

    /// Reserved table names without prefix.
    pub fn reserved_table_names(&self) -> Vec<String> {
        match &self.reserved_tables {
            Some(names) => names.clone(),
            None => DEFAULT_RESERVED_TABLES.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.database.trim().is_empty() {
            return Err(DbError::Config("database name must not be empty".to_string()));
        }
        if self.profile_capacity == 0 {
            return Err(DbError::Config("profile_capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Loads configuration from a TOML file at the given path.
///
/// # Example
///
/// ```no_run
/// let config = forumdb::config::load_config("db.toml").expect("Failed to load config");
/// println!("{:?}", config.dialect);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<DbConfig> {
    let content = fs::read_to_string(path)?;
    let config: DbConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// `<config dir>/forumdb/db.toml` for the current user.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("forumdb").join("db.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE_CONFIG: &str = r#"
dialect = "mysql"
host = "db.internal"
user = "forum"
password = "secret"
database = "forum"
prefix = "smf_"
charset = "utf8mb4"
profiling = true

[mysql]
engine = "MyISAM"
"#;

    #[test]
    fn test_load_config_from_str() {
        let config: DbConfig = toml::from_str(SAMPLE_CONFIG).expect("Failed to parse sample config");
        assert_eq!(config.dialect, DialectKind::Mysql);
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.prefix, "smf_");
        assert_eq!(config.port_or_default(), 3306);
        assert!(config.strict_mode);
        assert!(config.profiling);
        assert!(!config.unbuffered);
        assert_eq!(config.profile_sql_limit, 50);
        assert_eq!(config.mysql.engine, "MyISAM");
        assert_eq!(config.postgres.schema, "public");
        assert!(config.reserved_table_names().contains(&"members".to_string()));
    }

    #[test]
    fn test_postgres_alias() {
        let config: DbConfig = toml::from_str(
            "dialect = \"postgres\"\nuser = \"u\"\ndatabase = \"forum\"\n",
        )
        .unwrap();
        assert_eq!(config.dialect, DialectKind::Postgres);
        assert_eq!(config.port_or_default(), 5432);
    }

    #[test]
    fn test_load_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE_CONFIG.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.database, "forum");
    }

    #[test]
    fn test_load_config_rejects_empty_database() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"dialect = \"mysql\"\nuser = \"u\"\ndatabase = \"\"\n")
            .unwrap();

        match load_config(file.path()) {
            Err(DbError::Config(msg)) => assert!(msg.contains("database name")),
            other => panic!("Expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(matches!(
            load_config("/nonexistent/forumdb.toml"),
            Err(DbError::Io(_))
        ));
    }
}
