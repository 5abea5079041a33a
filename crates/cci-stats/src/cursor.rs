//! Per-file resume positions.

use crate::db::MetricsDatabase;
use crate::error::Result;
use crate::models::{Cursor, MetricRecord};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Tracks how many lines of each source file have been ingested.
pub struct CursorTracker<'a> {
    db: &'a MetricsDatabase,
}

impl<'a> CursorTracker<'a> {
    pub fn new(db: &'a MetricsDatabase) -> Self {
        Self { db }
    }

    /// Line offset to resume `path` from. Unknown files start at 0.
    pub fn resume_offset(&self, path: &str) -> Result<u64> {
        self.db.resume_offset(path)
    }

    /// Move the cursor for `path` to `new_offset`, replacing any previous one.
    pub fn advance(&self, path: &str, new_offset: u64, when: DateTime<Utc>) -> Result<()> {
        self.db.upsert_cursor(path, new_offset, when)
    }

    /// Store `records` read from `path` and move its cursor to `new_offset`
    /// in one transaction. Returns the number of records stored.
    ///
    /// On error neither the records nor the cursor are kept, so the same
    /// lines are read again on the next pass.
    pub fn commit(
        &self,
        path: &str,
        records: &[MetricRecord],
        new_offset: u64,
        when: DateTime<Utc>,
    ) -> Result<usize> {
        self.db.ingest_file_batch(path, records, new_offset, when)
    }

    pub fn get(&self, path: &str) -> Result<Option<Cursor>> {
        self.db.get_cursor(path)
    }

    /// All cursors keyed by path.
    pub fn all(&self) -> Result<BTreeMap<String, Cursor>> {
        Ok(self
            .db
            .list_cursors()?
            .into_iter()
            .map(|cursor| (cursor.file_path.clone(), cursor))
            .collect())
    }
}
