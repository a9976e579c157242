//! SQL text helpers.

use crate::error::{DbError, DbResult};
use regex_lite::Regex;
use std::sync::LazyLock;

static FROM_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bFROM\s+[`"\[]?([A-Za-z_][A-Za-z0-9_]*)"#).expect("valid regex")
});

/// Quotes a table or column name for interpolation into a statement.
pub fn quote_ident(name: &str) -> DbResult<String> {
    if name.is_empty() || name.contains('\0') {
        return Err(DbError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Best-effort guess of the table a query reads from: the first identifier
/// after `FROM`.
///
/// Joins, subqueries and CTEs are not understood; the first match wins.
pub fn extract_table_name(sql: &str) -> Option<String> {
    FROM_TABLE
        .captures(sql)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
