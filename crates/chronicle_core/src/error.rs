use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChronicleError {
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("not found: {message}")]
    NotFound { message: String },
    #[error("validation error: {message}")]
    Validation { message: String },
    #[error("optimistic lock conflict: {message}")]
    OptimisticLock { message: String },
    #[error("duplicate key: {message}")]
    DuplicateKey { message: String },
    #[error("transaction rolled back: {message}")]
    TransactionRollback { message: String },
    #[error("retry limit reached after {attempts} attempts: {message}")]
    RetryLimitReached { attempts: u32, message: String },
    #[error("unsupported in schema mode {mode}: {operation}")]
    UnsupportedInSchemaMode { mode: String, operation: String },
    #[error("execution error: {message}")]
    Execution { message: String },
}

impl ChronicleError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn optimistic_lock(message: impl Into<String>) -> Self {
        Self::OptimisticLock {
            message: message.into(),
        }
    }

    pub fn duplicate_key(message: impl Into<String>) -> Self {
        Self::DuplicateKey {
            message: message.into(),
        }
    }

    pub fn rollback(message: impl Into<String>) -> Self {
        Self::TransactionRollback {
            message: message.into(),
        }
    }

    pub fn retry_limit(attempts: u32, message: impl Into<String>) -> Self {
        Self::RetryLimitReached {
            attempts,
            message: message.into(),
        }
    }

    pub fn unsupported(mode: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::UnsupportedInSchemaMode {
            mode: mode.into(),
            operation: operation.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }

    /// Outcomes that are resolved by re-running the whole transaction.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::OptimisticLock { .. } | Self::DuplicateKey { .. } | Self::TransactionRollback { .. }
        )
    }
}

pub type ChronicleResult<T> = Result<T, ChronicleError>;

const ROLLBACK_MARKERS: [&str; 5] = [
    "deadlock",
    "could not serialize",
    "database is locked",
    "database table is locked",
    "lock wait timeout",
];

impl From<DbErr> for ChronicleError {
    fn from(value: DbErr) -> Self {
        if let Some(SqlErr::UniqueConstraintViolation(message)) = value.sql_err() {
            return ChronicleError::duplicate_key(message);
        }
        let message = value.to_string();
        let lowered = message.to_ascii_lowercase();
        if ROLLBACK_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker))
        {
            ChronicleError::rollback(message)
        } else {
            ChronicleError::storage(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ChronicleError;
    use sea_orm::DbErr;

    #[test]
    fn helper_constructors_set_variants() {
        let err = ChronicleError::storage("disk");
        assert!(matches!(err, ChronicleError::Storage { .. }));
        let err = ChronicleError::not_found("missing");
        assert!(matches!(err, ChronicleError::NotFound { .. }));
        let err = ChronicleError::invalid("bad");
        assert!(matches!(err, ChronicleError::Validation { .. }));
        let err = ChronicleError::optimistic_lock("moved");
        assert!(matches!(err, ChronicleError::OptimisticLock { .. }));
        let err = ChronicleError::retry_limit(5, "add");
        assert!(matches!(
            err,
            ChronicleError::RetryLimitReached { attempts: 5, .. }
        ));
        let err = ChronicleError::unsupported("entity_table", "list_versions");
        assert!(matches!(err, ChronicleError::UnsupportedInSchemaMode { .. }));
    }

    #[test]
    fn retry_classification() {
        assert!(ChronicleError::optimistic_lock("x").is_retryable());
        assert!(ChronicleError::duplicate_key("x").is_retryable());
        assert!(ChronicleError::rollback("x").is_retryable());
        assert!(!ChronicleError::invalid("x").is_retryable());
        assert!(!ChronicleError::storage("x").is_retryable());
        assert!(!ChronicleError::retry_limit(3, "x").is_retryable());
    }

    #[test]
    fn busy_database_maps_to_rollback() {
        let err = ChronicleError::from(DbErr::Custom("database is locked".to_string()));
        assert!(matches!(err, ChronicleError::TransactionRollback { .. }));
        let err = ChronicleError::from(DbErr::Custom("no such table".to_string()));
        assert!(matches!(err, ChronicleError::Storage { .. }));
    }
}
