//! SQLite store for ingested metrics and sync cursors.
//!
//! Two tables:
//!
//! - `metrics`: append-only fact log, one row per model per payload
//! - `sync_state`: one row per source file, how many lines were consumed
//!
//! Schema changes are additive. Columns are added only after checking
//! `PRAGMA table_info`, so migrating a database that already has them (for
//! instance one created by an older release) is a no-op.

use crate::error::{Result, StatsError};
use crate::models::{Cursor, MetricRecord, TokenCounts};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Current schema version for migrations.
const SCHEMA_VERSION: i32 = 2;

/// Maximum retries for database lock errors.
const DB_LOCK_MAX_RETRIES: u32 = 5;

/// Initial delay for database lock retry (in milliseconds).
const DB_LOCK_INITIAL_DELAY_MS: u64 = 50;

/// Maximum delay for database lock retry.
const DB_LOCK_MAX_DELAY: Duration = Duration::from_secs(5);

/// Storage format for record timestamps (local wall clock).
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Storage format for calendar days.
pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

const RECORD_COLUMNS: &str = "id, timestamp, date, model, input_tokens, output_tokens,
     cache_read_tokens, cache_creation_tokens, raw_data, source_file";

/// SQLite database holding metrics and cursors.
pub struct MetricsDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl MetricsDatabase {
    /// Open or create a metrics database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StatsError::Query(format!("failed to acquire lock: {}", e)))
    }

    /// Execute a database operation with automatic retry on lock errors.
    fn with_retry<T, F>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempt = 0;
        let mut delay = Duration::from_millis(DB_LOCK_INITIAL_DELAY_MS);

        loop {
            attempt += 1;

            match f() {
                Ok(result) => {
                    if attempt > 1 {
                        info!(attempt, operation, "Database operation succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(ref e) if e.is_retryable() && attempt <= DB_LOCK_MAX_RETRIES => {
                    warn!(
                        attempt,
                        max_retries = DB_LOCK_MAX_RETRIES,
                        delay_ms = delay.as_millis(),
                        operation,
                        "Database locked, retrying with backoff"
                    );

                    std::thread::sleep(delay);
                    delay = std::cmp::min(delay * 2, DB_LOCK_MAX_DELAY);
                }
                Err(e) if e.is_retryable() => {
                    warn!(attempt, operation, error = %e, "Database still locked after retries");
                    return Err(StatsError::DatabaseLocked {
                        retry_count: attempt - 1,
                        max_retries: DB_LOCK_MAX_RETRIES,
                        message: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run database migrations.
    fn migrate(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StatsError::Migration(format!("failed to acquire lock: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;

        if current_version < SCHEMA_VERSION {
            info!(
                current = current_version,
                target = SCHEMA_VERSION,
                "Running database migrations"
            );
            Self::run_migrations(&conn, current_version)?;
        }

        Ok(())
    }

    fn run_migrations(conn: &Connection, from_version: i32) -> Result<()> {
        if from_version < 1 {
            Self::migration_v1(conn)?;
        }
        if from_version < 2 {
            Self::migration_v2(conn)?;
        }
        Ok(())
    }

    /// Migration to version 1: metrics and cursor tables.
    fn migration_v1(conn: &Connection) -> Result<()> {
        debug!("Running migration v1: initial schema");

        conn.execute(
            "CREATE TABLE IF NOT EXISTS metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                date TEXT NOT NULL,
                model TEXT,
                input_tokens INTEGER DEFAULT 0,
                output_tokens INTEGER DEFAULT 0,
                total_tokens INTEGER DEFAULT 0,
                request_count INTEGER DEFAULT 1,
                raw_data TEXT,
                synced_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_metrics_date ON metrics(date)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS sync_state (
                file_path TEXT PRIMARY KEY,
                last_line INTEGER DEFAULT 0,
                synced_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute("INSERT OR IGNORE INTO schema_version (version) VALUES (1)", [])?;

        info!("Migration v1 completed");
        Ok(())
    }

    /// Migration to version 2: cache token columns, source file, model index.
    fn migration_v2(conn: &Connection) -> Result<()> {
        debug!("Running migration v2: cache tokens and source file");

        ensure_column(conn, "metrics", "cache_read_tokens", "INTEGER DEFAULT 0")?;
        ensure_column(conn, "metrics", "cache_creation_tokens", "INTEGER DEFAULT 0")?;
        ensure_column(conn, "metrics", "source_file", "TEXT")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_metrics_model ON metrics(model)",
            [],
        )?;

        conn.execute("INSERT OR IGNORE INTO schema_version (version) VALUES (2)", [])?;

        info!("Migration v2 completed: cache tokens and source file");
        Ok(())
    }

    /// Insert a batch of records.
    pub fn insert_records(&self, records: &[MetricRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let count = self.with_retry("insert_records", || {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            let count = Self::insert_records_in_tx(&tx, records)?;
            tx.commit()?;
            Ok(count)
        })?;

        debug!(count, "Inserted metric records");
        Ok(count)
    }

    /// Insert the records read from one file and advance its cursor, atomically.
    ///
    /// Either both the records and the new offset are committed or neither is,
    /// so a failed pass retries the same lines next time.
    pub fn ingest_file_batch(
        &self,
        file_path: &str,
        records: &[MetricRecord],
        new_offset: u64,
        when: DateTime<Utc>,
    ) -> Result<usize> {
        self.with_retry("ingest_file_batch", || {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            let count = Self::insert_records_in_tx(&tx, records)?;
            Self::upsert_cursor_in_tx(&tx, file_path, new_offset, when)?;
            tx.commit()?;
            Ok(count)
        })
    }

    fn insert_records_in_tx(tx: &Transaction, records: &[MetricRecord]) -> Result<usize> {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO metrics
             (timestamp, date, model, input_tokens, output_tokens, cache_read_tokens,
              cache_creation_tokens, total_tokens, raw_data, source_file)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;

        let mut count = 0;
        for record in records {
            stmt.execute(params![
                record.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                record.date.format(DATE_FORMAT).to_string(),
                record.model,
                record.tokens.input,
                record.tokens.output,
                record.tokens.cache_read,
                record.tokens.cache_creation,
                record.tokens.total(),
                record.raw_payload,
                record.source_file,
            ])?;
            count += 1;
        }

        Ok(count)
    }

    fn upsert_cursor_in_tx(
        tx: &Transaction,
        file_path: &str,
        last_line: u64,
        when: DateTime<Utc>,
    ) -> Result<()> {
        let last_line = i64::try_from(last_line)
            .map_err(|_| StatsError::Query(format!("line offset too large: {last_line}")))?;
        tx.prepare_cached(
            "INSERT OR REPLACE INTO sync_state (file_path, last_line, synced_at)
             VALUES (?1, ?2, ?3)",
        )?
        .execute(params![file_path, last_line, when.to_rfc3339()])?;
        Ok(())
    }

    /// Lines already consumed from `file_path`; 0 if never synced.
    pub fn resume_offset(&self, file_path: &str) -> Result<u64> {
        Ok(self.get_cursor(file_path)?.map_or(0, |c| c.last_line))
    }

    /// Record that `file_path` has been consumed up to `last_line`.
    pub fn upsert_cursor(&self, file_path: &str, last_line: u64, when: DateTime<Utc>) -> Result<()> {
        self.with_retry("upsert_cursor", || {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            Self::upsert_cursor_in_tx(&tx, file_path, last_line, when)?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Cursor for one file.
    pub fn get_cursor(&self, file_path: &str) -> Result<Option<Cursor>> {
        let conn = self.lock()?;
        let cursor = conn
            .query_row(
                "SELECT file_path, last_line, synced_at FROM sync_state WHERE file_path = ?1",
                params![file_path],
                row_to_cursor,
            )
            .optional()?;
        Ok(cursor)
    }

    /// Every cursor, ordered by path.
    pub fn list_cursors(&self) -> Result<Vec<Cursor>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT file_path, last_line, synced_at FROM sync_state ORDER BY file_path")?;
        let cursors = stmt
            .query_map([], row_to_cursor)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(cursors)
    }

    /// Number of stored records.
    pub fn record_count(&self) -> Result<i64> {
        let conn = self.lock()?;
        let count = conn.query_row("SELECT COUNT(*) FROM metrics", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Records dated within `[start, end]`, oldest first.
    pub fn records_for_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<MetricRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM metrics
             WHERE date BETWEEN ?1 AND ?2
             ORDER BY timestamp, id"
        ))?;
        let records = stmt
            .query_map(
                params![
                    start.format(DATE_FORMAT).to_string(),
                    end.format(DATE_FORMAT).to_string()
                ],
                row_to_record,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Get raw database connection for aggregation queries.
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }
}

/// Whether `table` already has `column`.
pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Add `column` to `table` unless it is already there. Returns true if added.
pub fn ensure_column(conn: &Connection, table: &str, column: &str, decl: &str) -> Result<bool> {
    if table_has_column(conn, table, column)? {
        return Ok(false);
    }
    conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"), [])?;
    debug!(table, column, "Added column");
    Ok(true)
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

/// Accepts RFC 3339 and the naive ISO format older databases hold.
fn parse_synced_at(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| conversion_error(idx, format!("invalid synced_at: {raw}")))
}

fn row_to_cursor(row: &Row) -> rusqlite::Result<Cursor> {
    let last_line: i64 = row.get(1)?;
    let synced_at: String = row.get(2)?;
    Ok(Cursor {
        file_path: row.get(0)?,
        last_line: u64::try_from(last_line).unwrap_or(0),
        synced_at: parse_synced_at(2, &synced_at)?,
    })
}

fn row_to_record(row: &Row) -> rusqlite::Result<MetricRecord> {
    let timestamp: String = row.get(1)?;
    let date: String = row.get(2)?;

    let timestamp = NaiveDateTime::parse_from_str(&timestamp, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|e| conversion_error(1, format!("invalid timestamp {timestamp}: {e}")))?;
    let date = NaiveDate::parse_from_str(&date, DATE_FORMAT)
        .map_err(|e| conversion_error(2, format!("invalid date {date}: {e}")))?;

    Ok(MetricRecord {
        id: row.get(0)?,
        timestamp,
        date,
        model: row.get(3)?,
        tokens: TokenCounts {
            input: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
            output: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
            cache_read: row.get::<_, Option<i64>>(6)?.unwrap_or(0),
            cache_creation: row.get::<_, Option<i64>>(7)?.unwrap_or(0),
        },
        raw_payload: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        source_file: row.get(9)?,
    })
}
