// Persistence error types

use thiserror::Error;

/// Errors that can occur during persistence operations
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Database connection failed
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),
    /// Database query failed
    #[error("Database query failed: {0}")]
    QueryFailed(String),
    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),
    /// Stored value could not be decoded
    #[error("Serialization error: {0}")]
    SerializationError(String),
    /// Group not found
    #[error("Group not found: {0}")]
    GroupNotFound(String),
    /// A group with this name already exists
    #[error("Group already exists: {0}")]
    GroupExists(String),
    /// Database pool exhausted
    #[error("Database connection pool exhausted")]
    PoolExhausted,
    /// No store reachable; the caller should degrade to cached data
    #[error("Database unavailable (continuing without persistence): {0}")]
    DatabaseUnavailable(String),
}

impl PersistenceError {
    /// True when the failure means the store cannot be reached at all
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_) | Self::PoolExhausted | Self::DatabaseUnavailable(_)
        )
    }
}

impl From<sqlx::Error> for PersistenceError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::QueryFailed("Row not found".to_string()),
            sqlx::Error::PoolTimedOut => Self::PoolExhausted,
            sqlx::Error::PoolClosed => Self::DatabaseUnavailable("Pool closed".to_string()),
            sqlx::Error::Io(e) => Self::ConnectionFailed(e.to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::SerializationError(err.to_string())
            }
            _ => Self::QueryFailed(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for PersistenceError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::MigrationFailed(err.to_string())
    }
}

/// Result type for persistence operations
pub type PersistenceResult<T> = Result<T, PersistenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_errors_are_unavailable() {
        let err: PersistenceError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_unavailable());

        let err: PersistenceError = sqlx::Error::PoolClosed.into();
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("continuing without persistence"));
    }

    #[test]
    fn test_query_errors_are_not_unavailable() {
        let err: PersistenceError = sqlx::Error::RowNotFound.into();
        assert!(!err.is_unavailable());
        assert!(!PersistenceError::GroupExists("Alpha".into()).is_unavailable());
    }
}
