//! Error types for ingestion and queries.

use thiserror::Error;

/// Ingestion and query errors.
#[derive(Error, Debug)]
pub enum StatsError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Database locked error (retryable)
    #[error("database is locked (retry {retry_count}/{max_retries}): {message}")]
    DatabaseLocked {
        /// Retry attempt number
        retry_count: u32,
        /// Maximum retries allowed
        max_retries: u32,
        /// Human-readable message
        message: String,
    },

    /// IO error (file reading)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration error
    #[error("migration error: {0}")]
    Migration(String),

    /// Query error
    #[error("query error: {0}")]
    Query(String),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Aggregation window must cover at least one day
    #[error("invalid window: {0} days (must be at least 1)")]
    InvalidWindow(u32),
}

impl StatsError {
    /// Check if this error is retryable (e.g., database locked).
    pub fn is_retryable(&self) -> bool {
        self.is_database_locked()
    }

    /// Check if this error indicates a database lock.
    pub fn is_database_locked(&self) -> bool {
        match self {
            StatsError::DatabaseLocked { .. } => true,
            StatsError::Database(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked
            }
            _ => false,
        }
    }

    /// Create a user-friendly message for this error.
    pub fn friendly_message(&self) -> String {
        match self {
            StatsError::DatabaseLocked {
                retry_count,
                max_retries,
                ..
            } => {
                format!(
                    "Database is busy (attempt {}/{}). Another sync may be running.",
                    retry_count, max_retries
                )
            }
            StatsError::Database(e) => {
                let msg = e.to_string().to_lowercase();
                if msg.contains("locked") || msg.contains("busy") {
                    "Database is temporarily locked. Please try again.".to_string()
                } else {
                    format!("Database error: {e}")
                }
            }
            StatsError::Io(e) => {
                let msg = e.to_string().to_lowercase();
                if msg.contains("permission") {
                    "Permission denied. Check file permissions.".to_string()
                } else if msg.contains("not found") {
                    "File or directory not found.".to_string()
                } else {
                    format!("File system error: {}", e)
                }
            }
            _ => self.to_string(),
        }
    }
}

/// Result type for ingestion and query operations.
pub type Result<T> = std::result::Result<T, StatsError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn busy() -> StatsError {
        StatsError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        ))
    }

    #[test]
    fn test_busy_is_retryable() {
        assert!(busy().is_retryable());
        assert!(busy().is_database_locked());
        assert!(!StatsError::Query("x".into()).is_retryable());
    }

    #[test]
    fn test_friendly_message_for_lock() {
        assert_eq!(
            busy().friendly_message(),
            "Database is temporarily locked. Please try again."
        );
    }

    #[test]
    fn test_friendly_message_fallbacks() {
        let locked = StatsError::DatabaseLocked {
            retry_count: 5,
            max_retries: 5,
            message: "database is locked".into(),
        };
        assert!(locked.is_retryable());
        assert_eq!(
            locked.friendly_message(),
            "Database is busy (attempt 5/5). Another sync may be running."
        );

        let missing = StatsError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "entity not found",
        ));
        assert_eq!(missing.friendly_message(), "File or directory not found.");
        assert_eq!(
            StatsError::InvalidWindow(0).friendly_message(),
            StatsError::InvalidWindow(0).to_string()
        );
    }

    #[test]
    fn test_invalid_window_message() {
        assert_eq!(
            StatsError::InvalidWindow(0).to_string(),
            "invalid window: 0 days (must be at least 1)"
        );
    }
}
