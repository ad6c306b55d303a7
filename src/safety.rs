//! Statement safety filter.
//!
//! Rejects statements that carry SQL comments, statement separators or
//! delay functions outside string literals. Runs on every
//! statement unless the caller passed a security override.

use crate::core::{CallSite, DbError, Result};
use crate::dialect::Dialect;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::error;

static DELAY_FUNCTIONS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(sleep|benchmark|pg_sleep|pg_sleep_for|pg_sleep_until)\b")
        .expect("delay function pattern")
});

/// Placeholder left where a string literal was masked out.
const MASK: &str = " %s ";

/// Rejects raw single quotes in a template. Literal values belong in
/// bindings, where they are escaped.
pub fn check_template(template: &str, call_site: CallSite) -> Result<()> {
    if template.contains('\'') {
        return Err(violation(call_site, "Illegal character (') used in query"));
    }
    Ok(())
}

/// Checks compiled SQL for banned constructs outside string literals.
pub fn check_statement(dialect: &dyn Dialect, sql: &str, call_site: CallSite) -> Result<()> {
    let masked = mask_literals(sql, dialect.backslash_escapes())
        .ok_or_else(|| violation(call_site, "Unterminated string literal"))?;

    for marker in dialect.comment_markers() {
        if masked.contains(marker) {
            return Err(violation(call_site, &format!("Comment marker {} found", marker)));
        }
    }
    if masked.contains(';') {
        return Err(violation(call_site, "Multiple statements are not allowed"));
    }
    if let Some(func) = DELAY_FUNCTIONS.find(&masked) {
        return Err(violation(
            call_site,
            &format!("Function {} is not allowed", func.as_str().to_lowercase()),
        ));
    }
    Ok(())
}

/// Replaces each single-quoted literal with a neutral marker.
///
/// Doubled quotes always continue a literal; a backslash escapes the next
/// character only when `backslash_escapes` is set. Returns `None` if a
/// literal is never closed.
pub fn mask_literals(sql: &str, backslash_escapes: bool) -> Option<String> {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\'' {
            out.push(c);
            continue;
        }

        let mut closed = false;
        while let Some(inner) = chars.next() {
            match inner {
                '\\' if backslash_escapes => {
                    chars.next();
                }
                '\'' if chars.peek() == Some(&'\'') => {
                    chars.next();
                }
                '\'' => {
                    closed = true;
                    break;
                }
                _ => {}
            }
        }
        if !closed {
            return None;
        }
        out.push_str(MASK);
    }
    Some(out)
}

fn violation(call_site: CallSite, reason: &str) -> DbError {
    error!(call_site = %call_site, reason, "hacking attempt blocked");
    DbError::security(call_site, reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_site;
    use crate::config::DbConfig;
    use crate::dialect::{DialectKind, MysqlDialect, PostgresDialect};

    fn mysql() -> MysqlDialect {
        MysqlDialect::from_config(&DbConfig::new(DialectKind::Mysql, "forum"))
    }

    fn pg() -> PostgresDialect {
        PostgresDialect::from_config(&DbConfig::new(DialectKind::Postgres, "forum"))
    }

    #[test]
    fn test_mask_literals() {
        assert_eq!(
            mask_literals("SELECT 'a;b' FROM t", true).as_deref(),
            Some("SELECT  %s  FROM t")
        );
        assert_eq!(
            mask_literals(r"SELECT 'it\'s -- fine'", true).as_deref(),
            Some("SELECT  %s ")
        );
        assert_eq!(
            mask_literals("SELECT 'it''s -- fine'", false).as_deref(),
            Some("SELECT  %s ")
        );
        assert_eq!(mask_literals("SELECT 'open", true), None);
    }

    #[test]
    fn test_backslash_is_literal_on_postgres() {
        // On PostgreSQL the backslash does not escape, so the literal ends early.
        let sql = r"SELECT 'a\' -- '";
        assert!(check_statement(&pg(), sql, call_site!()).is_err());
        assert!(check_statement(&mysql(), sql, call_site!()).is_ok());
    }

    #[test]
    fn test_comment_markers_rejected() {
        let site = call_site!("search");
        let err = check_statement(&mysql(), "SELECT 1 /* x */", site).unwrap_err();
        assert!(matches!(err, DbError::Security { .. }));
        assert!(check_statement(&mysql(), "SELECT 1 -- x", site).is_err());
        assert!(check_statement(&mysql(), "SELECT 1 # x", site).is_err());
        assert!(check_statement(&pg(), "SELECT 1 # 2", site).is_ok());
    }

    #[test]
    fn test_separators_and_delay_functions_rejected() {
        let site = call_site!();
        assert!(check_statement(&mysql(), "SELECT 1; DROP TABLE t", site).is_err());
        assert!(check_statement(&mysql(), "SELECT SLEEP(5)", site).is_err());
        assert!(check_statement(&mysql(), "SELECT benchmark(1, md5(1))", site).is_err());
        assert!(check_statement(&pg(), "SELECT pg_sleep(1)", site).is_err());
    }

    #[test]
    fn test_literal_contents_are_ignored() {
        let site = call_site!();
        assert!(check_statement(&mysql(), "SELECT * FROM t WHERE a = 'sleep(5); -- #'", site).is_ok());
        assert!(check_statement(&mysql(), "SELECT sleepy, asleep FROM t", site).is_ok());
    }

    #[test]
    fn test_raw_quote_in_template() {
        let err = check_template("SELECT * FROM t WHERE name = 'x'", call_site!("boards")).unwrap_err();
        match err {
            DbError::Security { call_site, reason } => {
                assert!(call_site.starts_with("boards"));
                assert!(reason.contains("Illegal character"));
            }
            other => panic!("Expected Security error, got {:?}", other),
        }
        assert!(check_template("SELECT {string:name}", call_site!()).is_ok());
    }
}
