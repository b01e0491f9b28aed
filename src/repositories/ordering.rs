//! Allow-listed `ORDER BY` builder.
//!
//! Column tokens come from callers (CLI flags, query strings) and end up
//! spliced into SQL, so only names on the allow list ever reach the query.

use crate::error::{AppError, AppResult};

/// Columns a queue listing may be ordered by.
pub const QUEUE_ORDER_COLUMNS: &[&str] = &["id", "name", "state", "run_at", "created_at", "updated_at"];

/// Converts tokens such as `["run_at", "-created_at"]` into
/// `ORDER BY run_at ASC, created_at DESC`.
///
/// An empty token list yields `ORDER BY id`. A leading `-` selects
/// descending order. Unknown or repeated columns are rejected. When `id` is
/// allowed but not named, `id ASC` is appended so OFFSET pages are stable.
pub fn order_by_clause(tokens: &[String], allowed: &[&str]) -> AppResult<String> {
    if tokens.is_empty() {
        return Ok("ORDER BY id".to_string());
    }

    let mut seen: Vec<&str> = Vec::with_capacity(tokens.len());
    let mut terms = Vec::with_capacity(tokens.len());
    for token in tokens {
        let token = token.trim();
        let (column, direction) = match token.strip_prefix('-') {
            Some(column) => (column, "DESC"),
            None => (token, "ASC"),
        };

        let Some(column) = allowed.iter().copied().find(|c| *c == column) else {
            return Err(AppError::Validation {
                field: "order_by".to_string(),
                reason: format!(
                    "Cannot order by '{}'. Allowed columns: {}",
                    token,
                    allowed.join(", ")
                ),
            });
        };
        if seen.contains(&column) {
            return Err(AppError::Validation {
                field: "order_by".to_string(),
                reason: format!("Column '{}' appears more than once", column),
            });
        }
        seen.push(column);
        terms.push(format!("{} {}", column, direction));
    }
    if allowed.contains(&"id") && !seen.contains(&"id") {
        terms.push("id ASC".to_string());
    }

    Ok(format!("ORDER BY {}", terms.join(", ")))
}

/// Splits a comma separated flag value (`"run_at,-id"`) into tokens.
pub fn parse_order_tokens(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
