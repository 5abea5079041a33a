//! Path configuration.
//!
//! Everything lives under one data directory:
//!
//! ```text
//! <data_dir>/
//!   raw/metrics-YYYY-MM-DD.jsonl   telemetry written by the collector
//!   failed/*.jsonl                 payloads the collector could not forward
//!   metrics.db                     SQLite store
//!   pricing.yaml                   optional pricing overrides
//!   logs/                          cci.log
//! ```

use std::path::{Path, PathBuf};

use crate::error::{InsightsError, Result};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "CC_INSIGHTS_DATA_DIR";

/// Resolved locations of every file the tool touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsightsPaths {
    data_dir: PathBuf,
}

impl InsightsPaths {
    /// Use an explicit data directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Resolve from `CC_INSIGHTS_DATA_DIR`, falling back to `~/.claude/cc-insights`.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(DATA_DIR_ENV) {
            Some(dir) if !dir.is_empty() => Ok(Self::new(dir)),
            _ => Self::default_location(),
        }
    }

    /// `~/.claude/cc-insights`
    pub fn default_location() -> Result<Self> {
        let home = dirs::home_dir().ok_or(InsightsError::HomeNotFound)?;
        Ok(Self::new(home.join(".claude").join("cc-insights")))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.data_dir.join("raw")
    }

    pub fn failed_dir(&self) -> PathBuf {
        self.data_dir.join("failed")
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("metrics.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn pricing_file(&self) -> PathBuf {
        self.data_dir.join("pricing.yaml")
    }

    /// Create the data directory if it does not exist yet.
    pub fn ensure_data_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir).map_err(|e| InsightsError::DirectoryCreation {
            path: self.data_dir.clone(),
            source: e,
        })
    }
}
