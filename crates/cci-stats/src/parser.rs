//! OTEL metrics parser.
//!
//! Each telemetry line is one OTLP/JSON export:
//!
//! ```text
//! resourceMetrics[].scopeMetrics[].metrics[].sum.dataPoints[]
//! ```
//!
//! Token usage arrives as the `claude_code.token.usage` counter, one data
//! point per (model, token type) pair. A payload can mention several models,
//! so one line yields one [`MetricRecord`] per model.

use crate::models::{MetricRecord, ModelBuckets, TokenCounts, TokenKind};
use crate::normalize::Normalizer;
use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};
use tracing::{trace, warn};

/// Name of the counter carrying token usage.
pub const TOKEN_USAGE_METRIC: &str = "claude_code.token.usage";

/// Largest token count a single data point may carry.
pub const MAX_POINT_VALUE: f64 = 1e15;

/// Why a payload produced no records even though nothing was wrong with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyReason {
    /// The JSON value is not an object
    NotAnObject,
    /// No `resourceMetrics` key
    NoMetricsContainer,
    /// `resourceMetrics` present but no metric entries anywhere inside
    NoMetricEntries,
    /// Metrics present, none of them token usage (session count, active time, ...)
    NoTokenUsage,
}

/// Result of parsing one payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// Nothing to record
    Empty(EmptyReason),
    /// Unexpected structure; the payload was dropped
    Anomaly { diagnostic: String },
    /// One record per model
    Records(Vec<MetricRecord>),
}

impl ParseOutcome {
    /// Records produced, empty for the other outcomes.
    pub fn into_records(self) -> Vec<MetricRecord> {
        match self {
            ParseOutcome::Records(records) => records,
            _ => Vec::new(),
        }
    }
}

/// Result of parsing one raw line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// Not valid JSON
    Malformed(String),
    Parsed(ParseOutcome),
}

/// Which clock converts epoch timestamps to wall-clock time.
#[derive(Debug, Clone, Copy)]
enum Zone {
    Local,
    Fixed(FixedOffset),
}

/// Internal failure carried up to [`OtelParser::parse_value`].
struct Anomaly(String);

type Walk<T> = std::result::Result<T, Anomaly>;

/// Everything collected while walking one payload.
#[derive(Default)]
struct Collected {
    metric_entries: usize,
    max_time_nanos: u64,
    buckets: ModelBuckets,
}

/// Parser for OTEL metric payloads.
#[derive(Debug, Clone)]
pub struct OtelParser {
    normalizer: Normalizer,
    zone: Zone,
}

impl OtelParser {
    /// Parser converting timestamps to the system's local time.
    pub fn new() -> Self {
        Self {
            normalizer: Normalizer::new(),
            zone: Zone::Local,
        }
    }

    /// Parser converting timestamps with a fixed UTC offset.
    pub fn with_offset(offset: FixedOffset) -> Self {
        Self {
            normalizer: Normalizer::new(),
            zone: Zone::Fixed(offset),
        }
    }

    /// Replace the model normalizer.
    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Decode and parse one line.
    pub fn parse_line(&self, line: &str, fallback_date: Option<NaiveDate>) -> LineOutcome {
        match serde_json::from_str::<Value>(line.trim()) {
            Ok(value) => LineOutcome::Parsed(self.parse_value(&value, line.trim(), fallback_date)),
            Err(e) => LineOutcome::Malformed(e.to_string()),
        }
    }

    /// Extract per-model token records from one decoded payload.
    ///
    /// `raw` is stored verbatim on every record. `fallback_date` dates the
    /// records when no data point carries a timestamp.
    pub fn parse_value(&self, value: &Value, raw: &str, fallback_date: Option<NaiveDate>) -> ParseOutcome {
        let Some(obj) = value.as_object() else {
            return ParseOutcome::Empty(EmptyReason::NotAnObject);
        };
        let Some(container) = obj.get("resourceMetrics") else {
            return ParseOutcome::Empty(EmptyReason::NoMetricsContainer);
        };

        let collected = match self.collect(container) {
            Ok(collected) => collected,
            Err(Anomaly(diagnostic)) => {
                warn!(diagnostic = %diagnostic, "Skipping malformed metrics payload");
                return ParseOutcome::Anomaly { diagnostic };
            }
        };

        if collected.metric_entries == 0 {
            return ParseOutcome::Empty(EmptyReason::NoMetricEntries);
        }
        if collected.buckets.is_empty() {
            return ParseOutcome::Empty(EmptyReason::NoTokenUsage);
        }

        let timestamp = match self.resolve_timestamp(collected.max_time_nanos, fallback_date) {
            Ok(ts) => ts,
            Err(Anomaly(diagnostic)) => {
                warn!(diagnostic = %diagnostic, "Skipping metrics payload with bad timestamp");
                return ParseOutcome::Anomaly { diagnostic };
            }
        };

        let records = collected
            .buckets
            .into_iter()
            .map(|(model, tokens)| MetricRecord::new(timestamp, model, tokens, raw))
            .collect();

        ParseOutcome::Records(records)
    }

    /// Walk every resource, scope, and metric.
    fn collect(&self, container: &Value) -> Walk<Collected> {
        let mut collected = Collected::default();

        for resource in array_field(container, "resourceMetrics")? {
            for scope in optional_array(resource, "scopeMetrics")? {
                for metric in optional_array(scope, "metrics")? {
                    collected.metric_entries += 1;
                    self.collect_metric(metric, &mut collected)?;
                }
            }
        }

        Ok(collected)
    }

    fn collect_metric(&self, metric: &Value, collected: &mut Collected) -> Walk<()> {
        let name = metric.get("name").and_then(Value::as_str).unwrap_or("");
        let data_points: &[Value] = match metric.get("sum") {
            Some(sum) => optional_array(sum, "dataPoints")?,
            None => &[],
        };

        for point in data_points {
            let nanos = time_nanos(point)?;
            collected.max_time_nanos = collected.max_time_nanos.max(nanos);
        }

        if name != TOKEN_USAGE_METRIC {
            trace!(metric = name, "Ignoring non-token metric");
            return Ok(());
        }

        let mut buckets = ModelBuckets::new();
        for point in data_points {
            let value = point_value(point)?;
            let attrs = optional_array(point, "attributes")?;

            let Some(kind) = string_attribute(attrs, "type").and_then(TokenKind::from_attribute) else {
                continue;
            };
            let model = self.normalizer.normalize(string_attribute(attrs, "model"));
            buckets.record(model.clone(), kind, value).map_err(|_| {
                Anomaly(format!(
                    "token count overflow for model {}",
                    model.as_deref().unwrap_or("(none)")
                ))
            })?;
        }

        collected.buckets = std::mem::take(&mut collected.buckets)
            .merge(buckets)
            .map_err(|_| Anomaly("token count overflow across metrics".to_string()))?;
        Ok(())
    }

    /// Newest data point time, else the fallback day at midnight, else now.
    fn resolve_timestamp(&self, max_nanos: u64, fallback_date: Option<NaiveDate>) -> Walk<NaiveDateTime> {
        if max_nanos > 0 {
            let nanos = i64::try_from(max_nanos)
                .map_err(|_| Anomaly(format!("timeUnixNano out of range: {max_nanos}")))?;
            let utc = DateTime::from_timestamp_nanos(nanos);
            return Ok(match self.zone {
                Zone::Local => utc.with_timezone(&Local).naive_local(),
                Zone::Fixed(offset) => utc.with_timezone(&offset).naive_local(),
            });
        }

        if let Some(midnight) = fallback_date.and_then(|d| d.and_hms_opt(0, 0, 0)) {
            return Ok(midnight);
        }

        Ok(match self.zone {
            Zone::Local => Local::now().naive_local(),
            Zone::Fixed(offset) => chrono::Utc::now().with_timezone(&offset).naive_local(),
        })
    }
}

impl Default for OtelParser {
    fn default() -> Self {
        Self::new()
    }
}

/// `value[key]` which must be an array.
fn array_field<'a>(value: &'a Value, key: &str) -> Walk<&'a [Value]> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(Anomaly(format!("{key} is {}, expected array", kind_of(other)))),
    }
}

/// `obj[key]` as an array; missing or null counts as empty.
fn optional_array<'a>(obj: &'a Value, key: &str) -> Walk<&'a [Value]> {
    let Some(map) = obj.as_object() else {
        return Err(Anomaly(format!(
            "entry holding {key} is {}, expected object",
            kind_of(obj)
        )));
    };
    match map.get(key) {
        None | Some(Value::Null) => Ok(&[]),
        Some(value) => array_field(value, key),
    }
}

/// `timeUnixNano`, encoded as a string (OTLP/JSON) or a number.
fn time_nanos(point: &Value) -> Walk<u64> {
    match point.get("timeUnixNano") {
        None | Some(Value::Null) => Ok(0),
        Some(Value::String(s)) => s
            .parse::<u64>()
            .map_err(|_| Anomaly(format!("unparseable timeUnixNano: {s:?}"))),
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .ok_or_else(|| Anomaly(format!("invalid timeUnixNano: {n}"))),
        Some(other) => Err(Anomaly(format!("timeUnixNano is {}", kind_of(other)))),
    }
}

/// Data point value from `asDouble` or `asInt`, truncated to whole tokens.
fn point_value(point: &Value) -> Walk<i64> {
    let raw = point
        .get("asDouble")
        .filter(|v| !v.is_null())
        .or_else(|| point.get("asInt").filter(|v| !v.is_null()));

    let value = match raw {
        None => 0.0,
        Some(Value::Number(n)) => n
            .as_i64()
            .map(|i| i as f64)
            .or_else(|| n.as_f64())
            .ok_or_else(|| Anomaly(format!("invalid data point value: {n}")))?,
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| Anomaly(format!("unparseable data point value: {s:?}")))?,
        Some(other) => return Err(Anomaly(format!("data point value is {}", kind_of(other)))),
    };

    if !value.is_finite() || !(0.0..=MAX_POINT_VALUE).contains(&value) {
        return Err(Anomaly(format!("data point value out of range: {value}")));
    }
    Ok(value.trunc() as i64)
}

/// String value of attribute `key`, if present and string-typed.
fn string_attribute<'a>(attrs: &'a [Value], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .filter_map(Value::as_object)
        .find(|attr| attr.get("key").and_then(Value::as_str) == Some(key))
        .and_then(|attr: &Map<String, Value>| attr.get("value"))
        .and_then(|v| v.get("stringValue"))
        .and_then(Value::as_str)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
