//! Integration tests for cci-stats against on-disk raw files and databases.

use cci_core::InsightsPaths;
use cci_stats::{
    CostModel, CursorTracker, MetricsDatabase, OtelParser, StatsQuery, Syncer, Trend,
    check_failed_forwards,
};
use chrono::{FixedOffset, NaiveDate};
use serde_json::{Value, json};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tempfile::tempdir;

/// 2026-01-15T10:30:00Z
const T1: &str = "1768473000000000000";

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, d).unwrap()
}

fn utc_parser() -> OtelParser {
    OtelParser::with_offset(FixedOffset::east_opt(0).unwrap())
}

/// One OTLP export line carrying token-usage points of `(type, model, value)`.
fn usage_line(points: &[(&str, &str, i64)]) -> String {
    let data_points: Vec<Value> = points
        .iter()
        .map(|(kind, model, value)| {
            json!({
                "timeUnixNano": T1,
                "asDouble": value,
                "attributes": [
                    {"key": "type", "value": {"stringValue": kind}},
                    {"key": "model", "value": {"stringValue": model}}
                ]
            })
        })
        .collect();

    json!({
        "resourceMetrics": [{
            "resource": {"attributes": []},
            "scopeMetrics": [{
                "scope": {"name": "com.anthropic.claude_code"},
                "metrics": [{
                    "name": "claude_code.token.usage",
                    "sum": {"dataPoints": data_points, "isMonotonic": true}
                }]
            }]
        }]
    })
    .to_string()
}

/// A payload with only a session counter.
fn session_line() -> String {
    json!({
        "resourceMetrics": [{
            "scopeMetrics": [{
                "metrics": [{
                    "name": "claude_code.session.count",
                    "sum": {"dataPoints": [{"timeUnixNano": T1, "asDouble": 1}]}
                }]
            }]
        }]
    })
    .to_string()
}

fn append_lines(path: &Path, lines: &[String]) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    paths: InsightsPaths,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let paths = InsightsPaths::new(dir.path());
        std::fs::create_dir_all(paths.raw_dir()).unwrap();
        Self { _dir: dir, paths }
    }

    fn raw_file(&self, name: &str) -> std::path::PathBuf {
        self.paths.raw_dir().join(name)
    }

    fn open_db(&self) -> MetricsDatabase {
        MetricsDatabase::open(self.paths.db_path()).unwrap()
    }
}

#[test]
fn test_resync_is_idempotent() {
    let fx = Fixture::new();
    append_lines(
        &fx.raw_file("metrics-2026-01-15.jsonl"),
        &[
            usage_line(&[("input", "claude-opus-4-6", 100)]),
            usage_line(&[("output", "claude-sonnet-4-5", 50)]),
        ],
    );

    let db = fx.open_db();
    let syncer = Syncer::new(&db, utc_parser(), fx.paths.raw_dir());
    assert_eq!(syncer.sync().unwrap(), 2);

    let second = syncer.run().unwrap();
    assert_eq!(second.records_inserted, 0);
    assert_eq!(second.lines_read, 0);
    assert_eq!(db.record_count().unwrap(), 2);
}

#[test]
fn test_cursor_survives_reopen() {
    let fx = Fixture::new();
    let file = fx.raw_file("metrics-2026-01-15.jsonl");
    append_lines(&file, &[usage_line(&[("input", "opus", 1)])]);

    {
        let db = fx.open_db();
        Syncer::new(&db, utc_parser(), fx.paths.raw_dir()).sync().unwrap();
    }

    append_lines(&file, &[usage_line(&[("input", "opus", 2)])]);
    let db = fx.open_db();
    assert_eq!(Syncer::new(&db, utc_parser(), fx.paths.raw_dir()).sync().unwrap(), 1);
    assert_eq!(db.record_count().unwrap(), 2);
}

#[test]
fn test_cursor_is_monotonic_on_growing_file() {
    let fx = Fixture::new();
    let file = fx.raw_file("metrics-2026-01-15.jsonl");
    let key = file.display().to_string();

    let db = fx.open_db();
    let syncer = Syncer::new(&db, utc_parser(), fx.paths.raw_dir());
    let tracker = CursorTracker::new(&db);

    let mut last = 0;
    for batch in 1..=4 {
        let lines: Vec<String> = (0..batch)
            .map(|i| usage_line(&[("input", "haiku", i + 1)]))
            .collect();
        append_lines(&file, &lines);
        syncer.run().unwrap();

        let offset = tracker.resume_offset(&key).unwrap();
        assert!(offset >= last);
        last = offset;
    }

    assert_eq!(last, 10);
    assert_eq!(db.record_count().unwrap(), 10);
    assert_eq!(tracker.all().unwrap().len(), 1);
}

#[test]
fn test_total_equals_components() {
    let fx = Fixture::new();
    append_lines(
        &fx.raw_file("metrics-2026-01-15.jsonl"),
        &[usage_line(&[
            ("input", "claude-opus-4-6", 10),
            ("output", "claude-opus-4-6", 20),
            ("cacheRead", "claude-opus-4-6", 30),
            ("cacheCreation", "claude-opus-4-6", 40),
            ("input", "claude-haiku-4-5", 1),
        ])],
    );

    let db = fx.open_db();
    Syncer::new(&db, utc_parser(), fx.paths.raw_dir()).sync().unwrap();

    for record in db.records_for_date_range(day(15), day(15)).unwrap() {
        let t = record.tokens;
        assert_eq!(
            record.total_tokens(),
            t.input + t.output + t.cache_read + t.cache_creation
        );
    }

    let conn = db.connection();
    let conn = conn.lock().unwrap();
    let stored_total: i64 = conn
        .query_row("SELECT SUM(total_tokens) FROM metrics", [], |row| row.get(0))
        .unwrap();
    assert_eq!(stored_total, 101);
}

#[test]
fn test_payload_without_token_usage_is_skipped() {
    let fx = Fixture::new();
    let file = fx.raw_file("metrics-2026-01-15.jsonl");
    append_lines(
        &file,
        &[
            json!({"resourceMetrics": []}).to_string(),
            json!({"resourceMetrics": [{"scopeMetrics": [{"metrics": []}]}]}).to_string(),
            session_line(),
        ],
    );

    let db = fx.open_db();
    let report = Syncer::new(&db, utc_parser(), fx.paths.raw_dir()).run().unwrap();

    assert_eq!(report.records_inserted, 0);
    assert_eq!(report.empty_payloads, 3);
    assert_eq!(db.record_count().unwrap(), 0);
    // consumed even though nothing was stored
    assert_eq!(db.resume_offset(&file.display().to_string()).unwrap(), 3);
}

#[test]
fn test_multi_model_payload_splits() {
    let fx = Fixture::new();
    append_lines(
        &fx.raw_file("metrics-2026-01-15.jsonl"),
        &[usage_line(&[
            ("input", "claude-opus-4-6-20260101", 100),
            ("input", "claude-haiku-4-5-20251001", 7),
            ("output", "claude-opus-4-6-20260101", 40),
        ])],
    );

    let db = fx.open_db();
    Syncer::new(&db, utc_parser(), fx.paths.raw_dir()).sync().unwrap();

    let records = db.records_for_date_range(day(15), day(15)).unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.timestamp == records[0].timestamp));
    assert!(records.iter().all(|r| r.raw_payload == records[0].raw_payload));

    let opus = records
        .iter()
        .find(|r| r.model.as_deref() == Some("opus-4-6"))
        .unwrap();
    assert_eq!((opus.tokens.input, opus.tokens.output), (100, 40));
    let haiku = records
        .iter()
        .find(|r| r.model.as_deref() == Some("haiku-4-5"))
        .unwrap();
    assert_eq!(haiku.tokens.input, 7);
}

#[test]
fn test_cost_is_attributed_per_model() {
    let fx = Fixture::new();
    append_lines(
        &fx.raw_file("metrics-2026-01-15.jsonl"),
        &[usage_line(&[
            ("input", "claude-opus-4-1", 1_000_000),
            ("input", "claude-haiku-4-5", 1_000_000),
        ])],
    );

    let db = fx.open_db();
    Syncer::new(&db, utc_parser(), fx.paths.raw_dir()).sync().unwrap();

    let cost_model = CostModel::default();
    let summary = StatsQuery::new(&db, &cost_model)
        .summarize_as_of(day(15), 1, "Today")
        .unwrap();

    let expected = cost_model.price(Some("opus-4-1")).input_per_million
        + cost_model.price(Some("haiku-4-5")).input_per_million;
    let flat = 2.0 * cost_model.config().default.input_per_million;

    assert!((summary.totals.cost_usd - expected).abs() < 1e-9);
    assert!((summary.totals.cost_usd - flat).abs() > 1.0);
    assert_eq!(summary.by_model.len(), 2);
}

#[test]
fn test_trend_without_previous_window() {
    let fx = Fixture::new();
    append_lines(
        &fx.raw_file("metrics-2026-01-15.jsonl"),
        &[usage_line(&[("input", "sonnet", 500)])],
    );

    let db = fx.open_db();
    Syncer::new(&db, utc_parser(), fx.paths.raw_dir()).sync().unwrap();

    let cost_model = CostModel::default();
    let summary = StatsQuery::new(&db, &cost_model)
        .summarize_as_of(day(15), 7, "This Week")
        .unwrap();

    assert_eq!(summary.totals.request_count, 1);
    assert_eq!(summary.request_trend(), Trend::NoData);
    assert_eq!(summary.token_trend(), Trend::NoData);
    assert_eq!(summary.cost_trend(), Trend::NoData);
}

#[test]
fn test_missing_raw_directory() {
    let dir = tempdir().unwrap();
    let paths = InsightsPaths::new(dir.path());
    let db = MetricsDatabase::open_in_memory().unwrap();

    let report = Syncer::new(&db, utc_parser(), paths.raw_dir()).run().unwrap();
    assert_eq!(report.files_scanned, 0);
    assert_eq!(db.record_count().unwrap(), 0);
}

#[test]
fn test_malformed_lines_are_consumed() {
    let fx = Fixture::new();
    let file = fx.raw_file("metrics-2026-01-15.jsonl");
    append_lines(
        &file,
        &[
            "not json at all".to_string(),
            r#"{"resourceMetrics": "#.to_string(),
            usage_line(&[("input", "opus", 3)]),
            json!({"resourceMetrics": {"oops": true}}).to_string(),
        ],
    );

    let db = fx.open_db();
    let report = Syncer::new(&db, utc_parser(), fx.paths.raw_dir()).run().unwrap();

    assert_eq!(report.malformed_lines, 2);
    assert_eq!(report.anomalies, 1);
    assert_eq!(report.records_inserted, 1);
    assert_eq!(report.lines_read, 4);
    assert_eq!(db.resume_offset(&file.display().to_string()).unwrap(), 4);
}

#[test]
fn test_files_are_synced_in_name_order() {
    let fx = Fixture::new();
    // Created newest first so directory order and name order disagree
    append_lines(
        &fx.raw_file("metrics-2026-01-15.jsonl"),
        &[usage_line(&[("input", "opus", 1)])],
    );
    append_lines(
        &fx.raw_file("metrics-2026-01-14.jsonl"),
        &[usage_line(&[("input", "opus", 1)])],
    );
    std::fs::write(fx.raw_file("ignored.json"), "{}\n").unwrap();

    let db = fx.open_db();
    let report = Syncer::new(&db, utc_parser(), fx.paths.raw_dir()).run().unwrap();
    assert_eq!(report.files_scanned, 2);
    assert_eq!(report.files_updated, 2);

    // Same timestamp on both, so rows come back in insertion (id) order
    let records = db.records_for_date_range(day(15), day(15)).unwrap();
    assert_eq!(records.len(), 2);
    assert!(records[0].id < records[1].id);
    assert_eq!(records[0].source_file.as_deref(), Some("metrics-2026-01-14.jsonl"));
    assert_eq!(records[1].source_file.as_deref(), Some("metrics-2026-01-15.jsonl"));
}

#[test]
fn test_storage_failure_aborts_pass_without_moving_cursor() {
    let fx = Fixture::new();
    let quiet = fx.raw_file("metrics-2026-01-14.jsonl");
    let busy = fx.raw_file("metrics-2026-01-15.jsonl");
    append_lines(&quiet, &[session_line()]);
    append_lines(&busy, &[usage_line(&[("input", "claude-opus-4-6", 100)])]);

    let db = fx.open_db();
    db.connection()
        .lock()
        .unwrap()
        .execute_batch(
            "CREATE TRIGGER reject_metrics BEFORE INSERT ON metrics
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .unwrap();

    let syncer = Syncer::new(&db, utc_parser(), fx.paths.raw_dir());
    let err = syncer.run().unwrap_err();
    assert!(err.to_string().contains("disk full"), "{err}");

    let tracker = CursorTracker::new(&db);
    // The file before the failure had nothing to insert and was committed
    assert_eq!(tracker.resume_offset(&quiet.display().to_string()).unwrap(), 1);
    assert_eq!(tracker.resume_offset(&busy.display().to_string()).unwrap(), 0);
    assert_eq!(db.record_count().unwrap(), 0);

    db.connection()
        .lock()
        .unwrap()
        .execute_batch("DROP TRIGGER reject_metrics;")
        .unwrap();

    let report = syncer.run().unwrap();
    assert_eq!(report.records_inserted, 1);
    assert_eq!(tracker.resume_offset(&busy.display().to_string()).unwrap(), 1);
}

#[cfg(unix)]
#[test]
fn test_unreadable_file_is_skipped() {
    let fx = Fixture::new();
    let good = fx.raw_file("metrics-2026-01-15.jsonl");
    let broken = fx.raw_file("metrics-2026-01-14.jsonl");
    append_lines(&good, &[usage_line(&[("input", "claude-haiku-4-5", 7)])]);
    std::os::unix::fs::symlink(fx.raw_file("gone.jsonl.bak"), &broken).unwrap();

    let db = fx.open_db();
    let report = Syncer::new(&db, utc_parser(), fx.paths.raw_dir()).run().unwrap();
    assert_eq!(report.files_scanned, 2);
    assert_eq!(report.files_failed, 1);
    assert_eq!(report.files_updated, 1);
    assert_eq!(report.records_inserted, 1);

    let tracker = CursorTracker::new(&db);
    assert!(tracker.get(&broken.display().to_string()).unwrap().is_none());
    assert_eq!(tracker.resume_offset(&good.display().to_string()).unwrap(), 1);
}

#[test]
fn test_failed_forwards_check() {
    let fx = Fixture::new();
    assert!(!check_failed_forwards(fx.paths.failed_dir()).unwrap().dir_exists);

    std::fs::create_dir_all(fx.paths.failed_dir()).unwrap();
    append_lines(
        &fx.paths.failed_dir().join("failed-2026-01-15.jsonl"),
        &[session_line(), session_line(), session_line()],
    );

    let status = check_failed_forwards(fx.paths.failed_dir()).unwrap();
    assert!(!status.is_ok());
    assert_eq!(status.total_failed(), 3);
}
