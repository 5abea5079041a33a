//! Error types for CC-Insights setup operations.
//!
//! [`InsightsError`] covers the process-level concerns: data paths and
//! logging setup. Ingestion and query errors live in `cci-stats`.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`InsightsError`].
pub type Result<T> = std::result::Result<T, InsightsError>;

/// Errors raised while preparing the process environment.
#[derive(Debug, Error)]
pub enum InsightsError {
    /// Directory creation failed
    #[error("Failed to create directory: {path}")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No home directory could be determined
    #[error("Home directory not found; set CC_INSIGHTS_DATA_DIR")]
    HomeNotFound,
}

impl InsightsError {
    /// Returns actionable guidance for the user
    pub fn guidance(&self) -> &'static str {
        match self {
            Self::HomeNotFound => "Point CC_INSIGHTS_DATA_DIR at your telemetry directory",
            Self::DirectoryCreation { .. } => "Check permissions on the data directory",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_creation_display() {
        let err = InsightsError::DirectoryCreation {
            path: PathBuf::from("/tmp/locked"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.to_string(), "Failed to create directory: /tmp/locked");
        assert_eq!(err.guidance(), "Check permissions on the data directory");
    }

    #[test]
    fn test_guidance() {
        assert_eq!(
            InsightsError::HomeNotFound.guidance(),
            "Point CC_INSIGHTS_DATA_DIR at your telemetry directory"
        );
    }
}
