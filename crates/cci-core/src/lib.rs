//! # cci-core
//!
//! Shared plumbing for CC-Insights:
//! - [`InsightsError`] - errors raised while preparing the environment
//! - [`logging`] - tracing setup
//! - [`config`] - data directory layout resolved from the environment
//!
//! ## Example
//!
//! ```no_run
//! use cci_core::{InsightsPaths, logging};
//!
//! fn main() -> cci_core::Result<()> {
//!     let paths = InsightsPaths::from_env()?;
//!     let _guard = logging::init_logging(Some(paths.log_dir()), false)?;
//!     tracing::info!(db = %paths.db_path().display(), "ready");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;

pub use config::{DATA_DIR_ENV, InsightsPaths};
pub use error::{InsightsError, Result};
pub use logging::{LogGuard, init_logging};
