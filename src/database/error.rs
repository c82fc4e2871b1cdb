//! Storage error types shared by the PostgreSQL and in-memory stores

use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    NotFound { entity: String, id: String },
    UniqueViolation { constraint: String },
    /// Serialization or deadlock abort; the whole unit can be retried
    SerializationFailure { message: String },
    ConnectionFailed { message: String },
    Timeout,
    Unknown { message: String },
}

#[derive(Debug, Clone)]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.into(),
            id: id.into(),
        })
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::Unknown {
            message: message.into(),
        })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DatabaseErrorKind::SerializationFailure { .. }
                | DatabaseErrorKind::ConnectionFailed { .. }
                | DatabaseErrorKind::Timeout
        )
    }

    #[cfg(feature = "database")]
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::not_found("row", "unknown"),
            sqlx::Error::PoolTimedOut => Self::new(DatabaseErrorKind::Timeout),
            sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::Tls(_) => {
                Self::new(DatabaseErrorKind::ConnectionFailed {
                    message: err.to_string(),
                })
            }
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                // unique_violation
                Some("23505") => Self::new(DatabaseErrorKind::UniqueViolation {
                    constraint: db_err.constraint().unwrap_or("unknown").to_string(),
                }),
                // serialization_failure, deadlock_detected
                Some("40001") | Some("40P01") => {
                    Self::new(DatabaseErrorKind::SerializationFailure {
                        message: db_err.message().to_string(),
                    })
                }
                _ => Self::unknown(db_err.message().to_string()),
            },
            _ => Self::unknown(err.to_string()),
        }
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DatabaseErrorKind::NotFound { entity, id } => {
                write!(f, "{} not found: {}", entity, id)
            }
            DatabaseErrorKind::UniqueViolation { constraint } => {
                write!(f, "unique constraint violated: {}", constraint)
            }
            DatabaseErrorKind::SerializationFailure { message } => {
                write!(f, "transaction aborted: {}", message)
            }
            DatabaseErrorKind::ConnectionFailed { message } => {
                write!(f, "database connection failed: {}", message)
            }
            DatabaseErrorKind::Timeout => write!(f, "database operation timed out"),
            DatabaseErrorKind::Unknown { message } => write!(f, "database error: {}", message),
        }
    }
}

impl std::error::Error for DatabaseError {}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        match err.kind {
            DatabaseErrorKind::NotFound { entity, id } if entity == "wallet" => {
                AppError::domain(DomainError::WalletNotFound { wallet_id: id })
            }
            DatabaseErrorKind::NotFound { entity, id } if entity == "operation" => {
                AppError::domain(DomainError::OperationNotFound { reference: id })
            }
            _ => {
                let is_retryable = err.is_retryable();
                AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message: err.to_string(),
                    is_retryable,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn serialization_failure_is_retryable_internal() {
        let err = DatabaseError::new(DatabaseErrorKind::SerializationFailure {
            message: "could not serialize access".to_string(),
        });
        assert!(err.is_retryable());

        let app: AppError = err.into();
        assert_eq!(app.error_code(), ErrorCode::Internal);
        assert!(app.is_retryable());
    }

    #[test]
    fn missing_wallet_maps_to_not_found() {
        let app: AppError = DatabaseError::not_found("wallet", "W0000000000").into();
        assert_eq!(app.error_code(), ErrorCode::NotFound);
        assert_eq!(app.status_code(), 404);
    }
}
