/// Session Context Module
///
/// Per-connection bookkeeping that callers used to reach through globals:
/// the query counter, the profiling ring, the uninstall log and the values
/// substituted for the reserved `{db_prefix}` and `{query_*}` tokens.
use crate::config::DbConfig;
use crate::core::{DbError, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::time::Duration;

/// Identifies the code that issued a database call.
///
/// Carried into log lines and security errors. Build one with
/// [`call_site!`](crate::call_site).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    pub label: &'static str,
    pub file: &'static str,
    pub line: u32,
}

impl CallSite {
    pub const fn new(label: &'static str, file: &'static str, line: u32) -> Self {
        CallSite { label, file, line }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.label.is_empty() {
            write!(f, "{}:{}", self.file, self.line)
        } else {
            write!(f, "{} ({}:{})", self.label, self.file, self.line)
        }
    }
}

/// Captures the current file and line, with an optional label.
///
/// ```
/// use forumdb::call_site;
///
/// let site = call_site!("load_boards");
/// assert_eq!(site.label, "load_boards");
/// ```
#[macro_export]
macro_rules! call_site {
    () => {
        $crate::core::CallSite::new("", file!(), line!())
    };
    ($label:expr) => {
        $crate::core::CallSite::new($label, file!(), line!())
    };
}

/// One profiled statement.
#[derive(Debug, Clone)]
pub struct ProfileEntry {
    /// Value of the query counter for this statement.
    pub seq: u64,
    pub call_site: CallSite,
    pub elapsed: Duration,
    /// `None` once the SQL text threshold has been passed.
    pub sql: Option<String>,
}

/// Inverse operations recorded while installing a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageLogEntry {
    RemoveTable { table: String },
    RemoveColumn { table: String, column: String },
    RemoveIndex { table: String, index: String },
}

/// State scoped to one database session.
#[derive(Debug)]
pub struct Session {
    prefix: String,
    query_count: u64,
    profiling: bool,
    profile: VecDeque<ProfileEntry>,
    profile_capacity: usize,
    profile_sql_limit: u64,
    package_log: Vec<PackageLogEntry>,
    fragments: HashMap<String, String>,
    reserved: HashSet<String>,
}

impl Session {
    pub fn new(config: &DbConfig) -> Self {
        let reserved = config
            .reserved_table_names()
            .iter()
            .map(|name| format!("{}{}", config.prefix, name).to_lowercase())
            .collect();

        Session {
            prefix: config.prefix.clone(),
            query_count: 0,
            profiling: config.profiling,
            profile: VecDeque::new(),
            profile_capacity: config.profile_capacity.max(1),
            profile_sql_limit: config.profile_sql_limit,
            package_log: Vec::new(),
            fragments: HashMap::new(),
            reserved,
        }
    }

    /// The configured prefix, possibly qualified with a database name.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The prefix without any `` `db`. `` qualifier, as the catalog sees it.
    pub fn real_prefix(&self) -> &str {
        match self.prefix.rfind('.') {
            Some(pos) if self.prefix.starts_with('`') || self.prefix.starts_with('"') => {
                &self.prefix[pos + 1..]
            }
            _ => &self.prefix,
        }
    }

    /// Replaces `{db_prefix}` in a table name.
    pub fn resolve_table(&self, name: &str) -> String {
        name.replace("{db_prefix}", &self.prefix)
    }

    /// Table name as it appears in catalog listings.
    pub fn catalog_table(&self, name: &str) -> String {
        let resolved = name.replace("{db_prefix}", self.real_prefix());
        match resolved.rfind('.') {
            Some(pos) => resolved[pos + 1..].trim_matches(|c| c == '`' || c == '"').to_string(),
            None => resolved,
        }
    }

    pub fn is_reserved(&self, resolved_table: &str) -> bool {
        self.reserved.contains(&resolved_table.to_lowercase())
    }

    /// Registers the SQL fragment substituted for a `{query_*}` token.
    pub fn set_context_fragment(&mut self, name: &str, sql: &str) -> Result<()> {
        if !name.starts_with("query_") {
            return Err(DbError::validation(
                name,
                "",
                "context fragments must be named query_*",
            ));
        }
        self.fragments.insert(name.to_string(), sql.to_string());
        Ok(())
    }

    pub fn context_fragment(&self, name: &str) -> Option<&str> {
        self.fragments.get(name).map(String::as_str)
    }

    pub fn query_count(&self) -> u64 {
        self.query_count
    }

    pub fn profiling(&self) -> bool {
        self.profiling
    }

    pub fn set_profiling(&mut self, enabled: bool) {
        self.profiling = enabled;
    }

    /// Counts a statement and, when profiling, keeps its timing.
    pub(crate) fn record_query(&mut self, call_site: CallSite, elapsed: Duration, sql: &str) {
        self.query_count += 1;
        if !self.profiling {
            return;
        }

        if self.profile.len() == self.profile_capacity {
            self.profile.pop_front();
        }
        let sql = if self.query_count <= self.profile_sql_limit {
            Some(sql.to_string())
        } else {
            None
        };
        self.profile.push_back(ProfileEntry {
            seq: self.query_count,
            call_site,
            elapsed,
            sql,
        });
    }

    pub fn profile(&self) -> impl Iterator<Item = &ProfileEntry> {
        self.profile.iter()
    }

    pub(crate) fn log_package(&mut self, entry: PackageLogEntry) {
        self.package_log.push(entry);
    }

    pub fn package_log(&self) -> &[PackageLogEntry] {
        &self.package_log
    }

    /// Hands the uninstall log to the caller and starts a new one.
    pub fn take_package_log(&mut self) -> Vec<PackageLogEntry> {
        std::mem::take(&mut self.package_log)
    }
}
