//! Data models for ingestion and aggregation.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The four categories of usage counted per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TokenKind {
    Input,
    Output,
    CacheRead,
    CacheCreation,
}

impl TokenKind {
    /// Parse the `type` attribute of a token-usage data point.
    pub fn from_attribute(value: &str) -> Option<Self> {
        match value {
            "input" => Some(Self::Input),
            "output" => Some(Self::Output),
            "cacheRead" => Some(Self::CacheRead),
            "cacheCreation" => Some(Self::CacheCreation),
            _ => None,
        }
    }
}

/// Token counts for one model bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub input: i64,
    pub output: i64,
    pub cache_read: i64,
    pub cache_creation: i64,
}

impl TokenCounts {
    pub fn new(input: i64, output: i64, cache_read: i64, cache_creation: i64) -> Self {
        Self {
            input,
            output,
            cache_read,
            cache_creation,
        }
    }

    /// Total tokens (input + output + cache), saturating at `i64::MAX`.
    pub fn total(&self) -> i64 {
        self.input
            .saturating_add(self.output)
            .saturating_add(self.cache_read)
            .saturating_add(self.cache_creation)
    }

    /// Total tokens, or `None` if the sum does not fit in an `i64`.
    pub fn checked_total(&self) -> Option<i64> {
        self.input
            .checked_add(self.output)?
            .checked_add(self.cache_read)?
            .checked_add(self.cache_creation)
    }

    /// Add `value` tokens of the given kind, or `None` on overflow.
    pub fn checked_add(mut self, kind: TokenKind, value: i64) -> Option<Self> {
        let slot = match kind {
            TokenKind::Input => &mut self.input,
            TokenKind::Output => &mut self.output,
            TokenKind::CacheRead => &mut self.cache_read,
            TokenKind::CacheCreation => &mut self.cache_creation,
        };
        *slot = slot.checked_add(value)?;
        Some(self)
    }

    /// Component-wise sum, or `None` if any component overflows.
    pub fn checked_merge(self, other: Self) -> Option<Self> {
        Some(Self {
            input: self.input.checked_add(other.input)?,
            output: self.output.checked_add(other.output)?,
            cache_read: self.cache_read.checked_add(other.cache_read)?,
            cache_creation: self.cache_creation.checked_add(other.cache_creation)?,
        })
    }

    /// Component-wise sum for report aggregates, saturating at `i64::MAX`.
    pub fn merge(self, other: Self) -> Self {
        Self {
            input: self.input.saturating_add(other.input),
            output: self.output.saturating_add(other.output),
            cache_read: self.cache_read.saturating_add(other.cache_read),
            cache_creation: self.cache_creation.saturating_add(other.cache_creation),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.total() == 0
    }
}

/// A token count no longer fits in an `i64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("token count overflow")]
pub struct TokenOverflow;

/// Per-model token accumulation for one payload.
///
/// Keyed by canonical model tag; `None` (no model attribute) is a bucket of
/// its own. Ordered so that records come out in a stable order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelBuckets(BTreeMap<Option<String>, TokenCounts>);

impl ModelBuckets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate one data point into the bucket for `model`.
    ///
    /// Fails, leaving the bucket unchanged, if the count would overflow or
    /// the bucket total would no longer fit in an `i64`.
    pub fn record(
        &mut self,
        model: Option<String>,
        kind: TokenKind,
        value: i64,
    ) -> Result<(), TokenOverflow> {
        let entry = self.0.entry(model).or_default();
        let updated = entry.checked_add(kind, value).ok_or(TokenOverflow)?;
        updated.checked_total().ok_or(TokenOverflow)?;
        *entry = updated;
        Ok(())
    }

    /// Union of both bucket sets, summing counts for shared models.
    pub fn merge(mut self, other: Self) -> Result<Self, TokenOverflow> {
        for (model, counts) in other.0 {
            let entry = self.0.entry(model).or_default();
            let merged = entry.checked_merge(counts).ok_or(TokenOverflow)?;
            merged.checked_total().ok_or(TokenOverflow)?;
            *entry = merged;
        }
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, model: Option<&str>) -> Option<&TokenCounts> {
        self.0.get(&model.map(str::to_string))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Option<String>, &TokenCounts)> {
        self.0.iter()
    }
}

impl IntoIterator for ModelBuckets {
    type Item = (Option<String>, TokenCounts);
    type IntoIter = std::collections::btree_map::IntoIter<Option<String>, TokenCounts>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// One ingested row: one model's usage from one telemetry payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Row id, assigned by the store
    pub id: Option<i64>,

    /// Local wall-clock time of the payload
    pub timestamp: NaiveDateTime,

    /// Calendar day of `timestamp`
    pub date: NaiveDate,

    /// Canonical model tag (e.g. "opus-4-6"), if the payload named one
    pub model: Option<String>,

    pub tokens: TokenCounts,

    /// Verbatim source line
    pub raw_payload: String,

    /// File the line was read from
    pub source_file: Option<String>,
}

impl MetricRecord {
    pub fn new(
        timestamp: NaiveDateTime,
        model: Option<String>,
        tokens: TokenCounts,
        raw_payload: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            timestamp,
            date: timestamp.date(),
            model,
            tokens,
            raw_payload: raw_payload.into(),
            source_file: None,
        }
    }

    /// Set the source file.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source_file = Some(source.into());
        self
    }

    pub fn total_tokens(&self) -> i64 {
        self.tokens.total()
    }
}

/// How far a source file has been consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub file_path: String,

    /// Number of lines already ingested
    pub last_line: u64,

    pub synced_at: DateTime<Utc>,
}

/// Request count, token sums, and cost over some set of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub request_count: i64,
    pub tokens: TokenCounts,
    pub cost_usd: f64,
}

impl UsageTotals {
    pub fn total_tokens(&self) -> i64 {
        self.tokens.total()
    }

    /// Fold in one model bucket whose cost was already computed.
    pub fn absorb(&mut self, request_count: i64, tokens: TokenCounts, cost_usd: f64) {
        self.request_count += request_count;
        self.tokens = self.tokens.merge(tokens);
        self.cost_usd += cost_usd;
    }

    /// Share of prompt tokens served from cache, as a percentage.
    pub fn cache_hit_rate(&self) -> Option<f64> {
        let prompt = self.tokens.input + self.tokens.cache_read;
        if prompt > 0 {
            Some(self.tokens.cache_read as f64 / prompt as f64 * 100.0)
        } else {
            None
        }
    }
}

/// Usage attributed to one model within a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub model: Option<String>,
    pub request_count: i64,
    pub tokens: TokenCounts,
    pub cost_usd: f64,
}

/// Records whose timestamp falls in a given hour of the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourlyCount {
    /// 0-23
    pub hour: u32,
    pub request_count: i64,
}

/// One calendar day of usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub totals: UsageTotals,
}

/// Signed period-over-period change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "percent", rename_all = "snake_case")]
pub enum Trend {
    /// Percentage change relative to the previous window
    Change(f64),
    /// The previous window had nothing to compare against
    NoData,
}

impl Trend {
    pub fn between(current: f64, previous: f64) -> Self {
        if previous == 0.0 {
            Trend::NoData
        } else {
            Trend::Change((current - previous) / previous * 100.0)
        }
    }

    pub fn percent(&self) -> Option<f64> {
        match self {
            Trend::Change(p) => Some(*p),
            Trend::NoData => None,
        }
    }
}

/// Result of a windowed stats query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub label: String,
    pub window_days: u32,

    /// First day of the window (inclusive)
    pub start_date: NaiveDate,

    /// Last day of the window (inclusive)
    pub end_date: NaiveDate,

    pub totals: UsageTotals,

    /// Ordered by total tokens, largest first
    pub by_model: Vec<ModelUsage>,

    /// Only hours that have records, ascending
    pub hourly: Vec<HourlyCount>,

    /// Most recent day first
    pub daily: Vec<DailyUsage>,

    /// Same figures for the preceding window of equal length
    pub previous: UsageTotals,
}

impl StatsSummary {
    pub fn cache_hit_rate(&self) -> Option<f64> {
        self.totals.cache_hit_rate()
    }

    pub fn request_trend(&self) -> Trend {
        Trend::between(
            self.totals.request_count as f64,
            self.previous.request_count as f64,
        )
    }

    pub fn token_trend(&self) -> Trend {
        Trend::between(
            self.totals.total_tokens() as f64,
            self.previous.total_tokens() as f64,
        )
    }

    pub fn cost_trend(&self) -> Trend {
        Trend::between(self.totals.cost_usd, self.previous.cost_usd)
    }
}
