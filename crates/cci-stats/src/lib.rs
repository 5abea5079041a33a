//! # cci-stats
//!
//! Ingestion and aggregation of Claude Code OTEL telemetry.
//!
//! This crate provides:
//! - [`OtelParser`] - Extract per-model token records from OTLP/JSON payloads
//! - [`Normalizer`] - Canonical model tags (`claude-opus-4-6-20260101` → `opus-4-6`)
//! - [`MetricsDatabase`] - SQLite storage for records and sync cursors
//! - [`Syncer`] - Incremental, resumable ingestion of `*.jsonl` files
//! - [`StatsQuery`] - Windowed summaries with per-model cost and trends
//! - [`CostModel`] - Per-model pricing with injectable rates
//!
//! ## Example
//!
//! ```no_run
//! use cci_stats::{CostModel, MetricsDatabase, OtelParser, PricingConfig, StatsQuery, Syncer};
//!
//! fn main() -> cci_stats::Result<()> {
//!     let db = MetricsDatabase::open("metrics.db")?;
//!
//!     // Pull in anything the collector appended since the last run
//!     let report = Syncer::new(&db, OtelParser::new(), "raw").run()?;
//!     println!("{} new records", report.records_inserted);
//!
//!     let cost_model = CostModel::new(PricingConfig::load("pricing.yaml")?);
//!     let week = StatsQuery::new(&db, &cost_model).summarize(7, "This Week")?;
//!     println!("${:.2} this week", week.totals.cost_usd);
//!
//!     Ok(())
//! }
//! ```

pub mod cursor;
pub mod db;
pub mod error;
pub mod forwarding;
pub mod models;
pub mod normalize;
pub mod parser;
pub mod pricing;
pub mod query;
pub mod sync;

// Re-export main types
pub use cursor::CursorTracker;
pub use db::MetricsDatabase;
pub use error::{Result, StatsError};
pub use forwarding::{FailedFile, ForwardingStatus, check_failed_forwards};
pub use models::{
    Cursor, DailyUsage, HourlyCount, MetricRecord, ModelBuckets, ModelUsage, StatsSummary,
    TokenCounts, TokenKind, TokenOverflow, Trend, UsageTotals,
};
pub use normalize::Normalizer;
pub use parser::{EmptyReason, LineOutcome, OtelParser, ParseOutcome};
pub use pricing::{CostModel, FamilyPricing, ModelPricing, PricingConfig};
pub use query::StatsQuery;
pub use sync::{SyncReport, Syncer};
