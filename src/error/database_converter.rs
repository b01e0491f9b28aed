use crate::error::{AppError, ConstraintParser};
use diesel::result::{DatabaseErrorKind, Error as DieselError};

/// Converts Diesel errors into structured [`AppError`] variants.
pub struct DatabaseErrorConverter;

impl DatabaseErrorConverter {
    /// Converts a Diesel error to an appropriate AppError variant.
    ///
    /// Constraint violations become `Duplicate` or `Validation`; connection
    /// failures and everything else become `Database`, which callers treat
    /// as transient.
    pub fn convert_diesel_error(error: DieselError, operation: &str) -> AppError {
        match error {
            DieselError::DatabaseError(kind, info) => {
                Self::convert_database_error(kind, info, operation)
            }
            DieselError::NotFound => AppError::NotFound {
                entity: "resource".to_string(),
                field: "id".to_string(),
                value: "unknown".to_string(),
            },
            other => AppError::Database {
                operation: operation.to_string(),
                source: anyhow::Error::from(other),
            },
        }
    }

    fn convert_database_error(
        kind: DatabaseErrorKind,
        info: Box<dyn diesel::result::DatabaseErrorInformation + Send + Sync>,
        operation: &str,
    ) -> AppError {
        let message = info.message();
        let details = info.details().unwrap_or_default();
        let full = if details.is_empty() {
            message.to_string()
        } else {
            format!("{}\nDETAIL: {}", message, details)
        };
        let constraint_name = info.constraint_name();

        let parsed = match kind {
            DatabaseErrorKind::UniqueViolation => {
                ConstraintParser::parse_unique_violation(&full, constraint_name).map(|v| {
                    AppError::Duplicate {
                        entity: v.entity,
                        field: v.field,
                        value: v.value.unwrap_or_else(|| "duplicate_value".to_string()),
                    }
                })
            }
            DatabaseErrorKind::ForeignKeyViolation => {
                ConstraintParser::parse_foreign_key_violation(&full, constraint_name).map(|v| {
                    AppError::Validation {
                        reason: format!(
                            "Invalid reference from {} with value '{}'",
                            v.entity,
                            v.value.as_deref().unwrap_or("unknown")
                        ),
                        field: v.field,
                    }
                })
            }
            DatabaseErrorKind::NotNullViolation => ConstraintParser::parse_not_null_violation(&full)
                .map(|v| AppError::Validation {
                    reason: format!("Field is required for {}", v.entity),
                    field: v.field,
                }),
            DatabaseErrorKind::CheckViolation => {
                ConstraintParser::parse_check_violation(&full, constraint_name).map(|v| {
                    AppError::Validation {
                        reason: format!("Check constraint failed for {} field", v.entity),
                        field: v.field,
                    }
                })
            }
            _ => None,
        };

        parsed.unwrap_or_else(|| AppError::Database {
            operation: operation.to_string(),
            source: anyhow::Error::msg(format!("Database error: {}", message)),
        })
    }
}
