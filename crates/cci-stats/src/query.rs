//! Windowed usage summaries.

use crate::db::{DATE_FORMAT, MetricsDatabase};
use crate::error::{Result, StatsError};
use crate::models::{DailyUsage, HourlyCount, ModelUsage, StatsSummary, TokenCounts, UsageTotals};
use crate::pricing::CostModel;
use chrono::{Days, Local, NaiveDate};
use rusqlite::params;
use std::collections::BTreeMap;

/// Usage of one model on one day.
struct ModelDay {
    date: NaiveDate,
    model: Option<String>,
    request_count: i64,
    tokens: TokenCounts,
}

/// Query interface for usage statistics.
pub struct StatsQuery<'a> {
    db: &'a MetricsDatabase,
    cost_model: &'a CostModel,
}

impl<'a> StatsQuery<'a> {
    /// Create a new query interface.
    pub fn new(db: &'a MetricsDatabase, cost_model: &'a CostModel) -> Self {
        Self { db, cost_model }
    }

    /// Summary of the last `window_days` days, ending today.
    pub fn summarize(&self, window_days: u32, label: &str) -> Result<StatsSummary> {
        self.summarize_as_of(Local::now().date_naive(), window_days, label)
    }

    /// Summary of the `window_days` days ending on `today` (inclusive),
    /// compared with the equally long window just before it.
    pub fn summarize_as_of(
        &self,
        today: NaiveDate,
        window_days: u32,
        label: &str,
    ) -> Result<StatsSummary> {
        if window_days == 0 {
            return Err(StatsError::InvalidWindow(window_days));
        }

        let span = Days::new(u64::from(window_days) - 1);
        let start = checked_sub(today, span)?;
        let previous_end = checked_sub(start, Days::new(1))?;
        let previous_start = checked_sub(previous_end, span)?;

        let mut totals = UsageTotals::default();
        let mut by_model: BTreeMap<Option<String>, ModelUsage> = BTreeMap::new();
        let mut daily: BTreeMap<NaiveDate, UsageTotals> = BTreeMap::new();

        for row in self.model_days(start, today)? {
            let cost = self.cost_model.cost(row.model.as_deref(), &row.tokens);

            totals.absorb(row.request_count, row.tokens, cost);
            daily
                .entry(row.date)
                .or_default()
                .absorb(row.request_count, row.tokens, cost);

            let usage = by_model.entry(row.model.clone()).or_insert_with(|| ModelUsage {
                model: row.model,
                request_count: 0,
                tokens: TokenCounts::default(),
                cost_usd: 0.0,
            });
            usage.request_count += row.request_count;
            usage.tokens = usage.tokens.merge(row.tokens);
            usage.cost_usd += cost;
        }

        let mut previous = UsageTotals::default();
        for row in self.model_days(previous_start, previous_end)? {
            let cost = self.cost_model.cost(row.model.as_deref(), &row.tokens);
            previous.absorb(row.request_count, row.tokens, cost);
        }

        // BTreeMap order breaks ties by model name
        let mut by_model: Vec<ModelUsage> = by_model.into_values().collect();
        by_model.sort_by(|a, b| b.tokens.total().cmp(&a.tokens.total()));

        Ok(StatsSummary {
            label: label.to_string(),
            window_days,
            start_date: start,
            end_date: today,
            totals,
            by_model,
            hourly: self.hourly(start, today)?,
            daily: daily
                .into_iter()
                .rev()
                .map(|(date, totals)| DailyUsage { date, totals })
                .collect(),
            previous,
        })
    }

    /// Per-day, per-model sums within `[start, end]`.
    fn model_days(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<ModelDay>> {
        let conn = self.db.connection();
        let conn = conn
            .lock()
            .map_err(|e| StatsError::Query(format!("failed to acquire lock: {}", e)))?;

        let mut stmt = conn.prepare(
            "SELECT date,
                    model,
                    COUNT(*),
                    COALESCE(SUM(input_tokens), 0),
                    COALESCE(SUM(output_tokens), 0),
                    COALESCE(SUM(cache_read_tokens), 0),
                    COALESCE(SUM(cache_creation_tokens), 0)
             FROM metrics
             WHERE date BETWEEN ?1 AND ?2
             GROUP BY date, model",
        )?;

        let rows = stmt
            .query_map(
                params![
                    start.format(DATE_FORMAT).to_string(),
                    end.format(DATE_FORMAT).to_string()
                ],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, i64>(2)?,
                        TokenCounts {
                            input: row.get(3)?,
                            output: row.get(4)?,
                            cache_read: row.get(5)?,
                            cache_creation: row.get(6)?,
                        },
                    ))
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(date, model, request_count, tokens)| {
                let date = NaiveDate::parse_from_str(&date, DATE_FORMAT)
                    .map_err(|e| StatsError::Query(format!("invalid date {date:?}: {e}")))?;
                Ok(ModelDay {
                    date,
                    model,
                    request_count,
                    tokens,
                })
            })
            .collect()
    }

    /// Record counts per hour of day within `[start, end]`.
    fn hourly(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<HourlyCount>> {
        let conn = self.db.connection();
        let conn = conn
            .lock()
            .map_err(|e| StatsError::Query(format!("failed to acquire lock: {}", e)))?;

        let mut stmt = conn.prepare(
            "SELECT CAST(strftime('%H', timestamp) AS INTEGER) AS hour, COUNT(*)
             FROM metrics
             WHERE date BETWEEN ?1 AND ?2 AND strftime('%H', timestamp) IS NOT NULL
             GROUP BY hour
             ORDER BY hour",
        )?;

        let hours = stmt
            .query_map(
                params![
                    start.format(DATE_FORMAT).to_string(),
                    end.format(DATE_FORMAT).to_string()
                ],
                |row| {
                    Ok(HourlyCount {
                        hour: row.get(0)?,
                        request_count: row.get(1)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(hours)
    }
}

fn checked_sub(date: NaiveDate, days: Days) -> Result<NaiveDate> {
    date.checked_sub_days(days)
        .ok_or_else(|| StatsError::Query(format!("window before {date} is out of range")))
}
