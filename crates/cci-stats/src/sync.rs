//! Incremental ingestion of raw telemetry files.
//!
//! Every `*.jsonl` file in the raw directory is read from its cursor onward.
//! Only complete (newline-terminated) lines are consumed, so a line still
//! being appended by the collector is picked up on a later pass. The records
//! produced from one file and that file's new cursor are committed together.

use crate::cursor::CursorTracker;
use crate::db::MetricsDatabase;
use crate::error::Result;
use crate::models::MetricRecord;
use crate::parser::{LineOutcome, OtelParser, ParseOutcome};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Counters for one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// `*.jsonl` files found
    pub files_scanned: usize,
    /// Files whose cursor moved
    pub files_updated: usize,
    /// Complete lines consumed
    pub lines_read: usize,
    pub records_inserted: usize,
    /// Lines that were not valid UTF-8 JSON
    pub malformed_lines: usize,
    /// Payloads dropped for unexpected structure
    pub anomalies: usize,
    /// Well-formed payloads without token usage
    pub empty_payloads: usize,
    /// Files skipped because they could not be read
    pub files_failed: usize,
}

/// Lines read from one file past its cursor.
struct NewLines {
    lines: Vec<Vec<u8>>,
    /// Complete lines seen before the cursor position
    skipped: u64,
}

/// Drives one pass over the raw directory.
pub struct Syncer<'a> {
    cursors: CursorTracker<'a>,
    parser: OtelParser,
    raw_dir: PathBuf,
}

impl<'a> Syncer<'a> {
    pub fn new(db: &'a MetricsDatabase, parser: OtelParser, raw_dir: impl Into<PathBuf>) -> Self {
        Self {
            cursors: CursorTracker::new(db),
            parser,
            raw_dir: raw_dir.into(),
        }
    }

    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    /// Ingest new lines and return the number of records stored.
    pub fn sync(&self) -> Result<usize> {
        Ok(self.run()?.records_inserted)
    }

    /// Ingest new lines from every source file.
    ///
    /// Unreadable files are skipped with their cursor untouched. A storage
    /// error aborts the pass; files committed before it stay committed.
    pub fn run(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        if !self.raw_dir.is_dir() {
            debug!(dir = %self.raw_dir.display(), "Raw directory not found, nothing to sync");
            return Ok(report);
        }

        for path in list_jsonl(&self.raw_dir)? {
            report.files_scanned += 1;
            self.sync_file(&path, &mut report)?;
        }

        info!(
            files = report.files_scanned,
            updated = report.files_updated,
            lines = report.lines_read,
            records = report.records_inserted,
            malformed = report.malformed_lines,
            anomalies = report.anomalies,
            failed = report.files_failed,
            "Sync complete"
        );

        Ok(report)
    }

    fn sync_file(&self, path: &Path, report: &mut SyncReport) -> Result<()> {
        let key = path.display().to_string();
        let offset = self.cursors.resume_offset(&key)?;

        let new_lines = match read_lines_after(path, offset) {
            Ok(new_lines) => new_lines,
            Err(e) => {
                warn!(file = %key, error = %e, "Failed to read source file, skipping");
                report.files_failed += 1;
                return Ok(());
            }
        };

        if new_lines.skipped < offset {
            warn!(
                file = %key,
                cursor = offset,
                lines = new_lines.skipped,
                "Source file is shorter than its cursor"
            );
        }
        if new_lines.lines.is_empty() {
            debug!(file = %key, offset, "No new lines");
            return Ok(());
        }

        let fallback = fallback_date(path);
        let source = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| key.clone());

        let mut records: Vec<MetricRecord> = Vec::new();
        for (idx, bytes) in new_lines.lines.iter().enumerate() {
            let line_number = offset + idx as u64 + 1;
            let Ok(line) = std::str::from_utf8(bytes) else {
                debug!(file = %key, line = line_number, "Skipping line that is not UTF-8");
                report.malformed_lines += 1;
                continue;
            };
            if line.trim().is_empty() {
                continue;
            }

            match self.parser.parse_line(line, fallback) {
                LineOutcome::Malformed(error) => {
                    debug!(file = %key, line = line_number, error = %error, "Skipping malformed line");
                    report.malformed_lines += 1;
                }
                LineOutcome::Parsed(ParseOutcome::Anomaly { .. }) => report.anomalies += 1,
                LineOutcome::Parsed(ParseOutcome::Empty(reason)) => {
                    debug!(file = %key, line = line_number, ?reason, "No token usage in payload");
                    report.empty_payloads += 1;
                }
                LineOutcome::Parsed(ParseOutcome::Records(parsed)) => {
                    records.extend(parsed.into_iter().map(|r| r.with_source(source.clone())));
                }
            }
        }

        let consumed = new_lines.lines.len();
        let new_offset = offset + consumed as u64;
        let inserted = if records.is_empty() {
            self.cursors.advance(&key, new_offset, Utc::now())?;
            0
        } else {
            self.cursors.commit(&key, &records, new_offset, Utc::now())?
        };

        debug!(file = %key, lines = consumed, records = inserted, new_offset, "Synced file");
        report.files_updated += 1;
        report.lines_read += consumed;
        report.records_inserted += inserted;
        Ok(())
    }
}

/// `*.jsonl` entries directly under `dir` that are not directories, sorted
/// by name. Entries that cannot be opened are listed so they count as failed.
fn list_jsonl(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_dir() && path.extension().is_some_and(|e| e == "jsonl") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Day encoded in a `metrics-YYYY-MM-DD.jsonl` file name.
pub fn fallback_date(path: &Path) -> Option<NaiveDate> {
    let stem = path.file_stem()?.to_str()?;
    let day = stem.strip_prefix("metrics-")?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Complete lines after the first `offset` ones. A trailing fragment without
/// a newline is not returned.
fn read_lines_after(path: &Path, offset: u64) -> io::Result<NewLines> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut buf = Vec::new();
    let mut skipped = 0u64;
    let mut lines = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 || buf.last() != Some(&b'\n') {
            break;
        }
        if skipped < offset {
            skipped += 1;
            continue;
        }
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        lines.push(std::mem::take(&mut buf));
    }

    Ok(NewLines { lines, skipped })
}
