use std::sync::OnceLock;

use regex::Regex;

/// Parses PostgreSQL constraint violation messages into structured parts.
///
/// Constraint names follow the PostgreSQL defaults used by the migrations:
/// `{table}_pkey`, `{table}_{column}_key`, `{table}_{column}_fkey` and
/// `{table}_{column}_check`. Table names may themselves contain underscores
/// (`task_queue`), so the table is taken from the message whenever possible
/// and stripped from the constraint name as a prefix.
pub struct ConstraintParser;

/// Structured view of a constraint violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintViolation {
    pub entity: String,
    pub field: String,
    pub value: Option<String>,
}

struct RegexPatterns {
    key_value: Regex,
    column_name: Regex,
    table_name: Regex,
}

static REGEX_PATTERNS: OnceLock<RegexPatterns> = OnceLock::new();

const CONSTRAINT_SUFFIXES: &[&str] = &["_pkey", "_fkey", "_key", "_check"];

impl ConstraintParser {
    fn patterns() -> &'static RegexPatterns {
        REGEX_PATTERNS.get_or_init(|| RegexPatterns {
            key_value: Regex::new(r"Key \(([^)]+)\)=\(([^)]*)\)").expect("valid key/value regex"),
            column_name: Regex::new(r#"column "([^"]+)""#).expect("valid column regex"),
            table_name: Regex::new(r#"(?:table|relation) "([^"]+)""#).expect("valid table regex"),
        })
    }

    /// Parses a unique-key violation, e.g. a conflicting queue entry id.
    pub fn parse_unique_violation(
        message: &str,
        constraint_name: Option<&str>,
    ) -> Option<ConstraintViolation> {
        let table = Self::extract_table_from_message(message);
        let (field, value) = match Self::extract_key_value_from_message(message) {
            Some((field, value)) => (field, Some(value)),
            None => (
                constraint_name.and_then(|c| Self::field_from_constraint(c, table.as_deref()))?,
                None,
            ),
        };
        let entity = table
            .or_else(|| constraint_name.and_then(Self::table_from_constraint))
            .unwrap_or_else(|| "resource".to_string());

        Some(ConstraintViolation {
            entity,
            field,
            value,
        })
    }

    /// Parses a foreign-key violation, e.g. a queue entry naming an unknown task.
    pub fn parse_foreign_key_violation(
        message: &str,
        constraint_name: Option<&str>,
    ) -> Option<ConstraintViolation> {
        // The first quoted table is the referencing one.
        let table = Self::extract_table_from_message(message);
        let kv = Self::extract_key_value_from_message(message);
        let field = match &kv {
            Some((field, _)) => field.clone(),
            None => constraint_name.and_then(|c| Self::field_from_constraint(c, table.as_deref()))?,
        };

        Some(ConstraintViolation {
            entity: table.unwrap_or_else(|| "resource".to_string()),
            field,
            value: kv.map(|(_, value)| value),
        })
    }

    /// Parses a not-null violation.
    pub fn parse_not_null_violation(message: &str) -> Option<ConstraintViolation> {
        let field = Self::extract_column_from_message(message)?;
        Some(ConstraintViolation {
            entity: Self::extract_table_from_message(message)
                .unwrap_or_else(|| "resource".to_string()),
            field,
            value: None,
        })
    }

    /// Parses a check violation, e.g. an out-of-range queue state.
    pub fn parse_check_violation(
        message: &str,
        constraint_name: Option<&str>,
    ) -> Option<ConstraintViolation> {
        let table = Self::extract_table_from_message(message);
        let field = match constraint_name {
            Some(c) => Self::field_from_constraint(c, table.as_deref())?,
            None => Self::extract_column_from_message(message)?,
        };

        Some(ConstraintViolation {
            entity: table.unwrap_or_else(|| "resource".to_string()),
            field,
            value: None,
        })
    }

    /// Strips the table prefix and the PostgreSQL suffix from a constraint name.
    ///
    /// `task_queue_state_check` with table `task_queue` yields `state`; a
    /// primary key constraint (`task_queue_pkey`) yields `id`.
    pub fn field_from_constraint(constraint_name: &str, table: Option<&str>) -> Option<String> {
        let suffix = CONSTRAINT_SUFFIXES
            .iter()
            .find(|suffix| constraint_name.ends_with(*suffix))?;
        if *suffix == "_pkey" {
            return Some("id".to_string());
        }

        let stem = &constraint_name[..constraint_name.len() - suffix.len()];
        let field = match table {
            Some(table) => stem.strip_prefix(table)?.strip_prefix('_')?,
            None => stem.split_once('_').map(|(_, rest)| rest)?,
        };

        (!field.is_empty()).then(|| field.to_string())
    }

    fn table_from_constraint(constraint_name: &str) -> Option<String> {
        constraint_name
            .strip_suffix("_pkey")
            .map(|table| table.to_string())
    }

    pub fn extract_column_from_message(message: &str) -> Option<String> {
        Self::patterns()
            .column_name
            .captures(message)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    pub fn extract_table_from_message(message: &str) -> Option<String> {
        Self::patterns()
            .table_name
            .captures(message)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    pub fn extract_key_value_from_message(message: &str) -> Option<(String, String)> {
        Self::patterns().key_value.captures(message).and_then(|caps| {
            let field = caps.get(1)?.as_str().to_string();
            let value = caps.get(2)?.as_str().to_string();
            Some((field, value))
        })
    }
}
