//! SQLite-backed completion journal.
//!
//! One row per window, keyed by `(symbol, granularity, date)`, holding the latest
//! outcome only. Upserts are content-compared inside a single statement, so a
//! re-run that reaches the same outcome writes nothing.
//!
//! Each worker opens its own connection. WAL mode plus a busy timeout lets writers
//! on distinct keys proceed without failing each other.

use super::store::{StoreError, WindowStore};
use crate::domain::{Granularity, WindowId, WindowOutcome, WindowStatus};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("unknown status code {0} in journal")]
    UnknownStatus(i64),

    #[error("unknown granularity '{0}' in journal")]
    UnknownGranularity(String),

    #[error("rebuild failed: {0}")]
    Rebuild(#[from] StoreError),

    #[error("create journal directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Whether an upsert touched the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalWrite {
    Written,
    Unchanged,
}

/// One journal row, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub window: WindowId,
    pub outcome: WindowOutcome,
}

/// Row counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub success: usize,
    pub failed: usize,
    pub empty: usize,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS window_journal (
    symbol                TEXT    NOT NULL,
    granularity           TEXT    NOT NULL,
    date                  TEXT    NOT NULL,
    status                INTEGER NOT NULL,
    last_record_timestamp INTEGER,
    inserted_at           TEXT    NOT NULL,
    updated_at            TEXT,
    PRIMARY KEY (symbol, granularity, date)
);
CREATE INDEX IF NOT EXISTS idx_window_journal_status
    ON window_journal (symbol, granularity, status, date);
";

const UPSERT: &str = "
INSERT INTO window_journal (symbol, granularity, date, status, last_record_timestamp, inserted_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT (symbol, granularity, date) DO UPDATE SET
    status = excluded.status,
    last_record_timestamp = excluded.last_record_timestamp,
    updated_at = excluded.inserted_at
WHERE window_journal.status IS NOT excluded.status
   OR window_journal.last_record_timestamp IS NOT excluded.last_record_timestamp
";

const SELECT_COLUMNS: &str = "symbol, granularity, date, status, last_record_timestamp, \
                              COALESCE(updated_at, inserted_at)";

/// Durable window → outcome store.
pub struct Journal {
    conn: Connection,
}

impl Journal {
    /// Open (or create) the journal database at `path`.
    pub fn open(path: &Path) -> Result<Self, JournalError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| JournalError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(10))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        Self::init(conn)
    }

    /// Private, non-durable journal (tests, dry runs).
    pub fn open_in_memory() -> Result<Self, JournalError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, JournalError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Latest outcome for a window, if it was ever resolved.
    pub fn find(&self, window: &WindowId) -> Result<Option<WindowOutcome>, JournalError> {
        let row = self
            .conn
            .query_row(
                "SELECT status, last_record_timestamp, COALESCE(updated_at, inserted_at)
                 FROM window_journal
                 WHERE symbol = ?1 AND granularity = ?2 AND date = ?3",
                params![window.symbol, window.granularity.code(), window.date],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<i64>>(1)?,
                        row.get::<_, NaiveDateTime>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(code, last_record_timestamp, recorded_at)| {
            Ok(WindowOutcome {
                status: WindowStatus::from_code(code).ok_or(JournalError::UnknownStatus(code))?,
                last_record_timestamp,
                recorded_at,
            })
        })
        .transpose()
    }

    /// Record an outcome, writing only when status or timestamp differ from what is stored.
    pub fn upsert(
        &self,
        window: &WindowId,
        status: WindowStatus,
        last_record_timestamp: Option<i64>,
    ) -> Result<JournalWrite, JournalError> {
        let now = Utc::now().naive_utc();
        let changed = self.conn.execute(
            UPSERT,
            params![
                window.symbol,
                window.granularity.code(),
                window.date,
                status.code(),
                last_record_timestamp,
                now
            ],
        )?;
        Ok(if changed > 0 {
            JournalWrite::Written
        } else {
            JournalWrite::Unchanged
        })
    }

    /// Newest date recorded as `EmptyNotFound` for the series.
    pub fn find_latest_empty_date(
        &self,
        symbol: &str,
        granularity: Granularity,
    ) -> Result<Option<NaiveDate>, JournalError> {
        let date = self.conn.query_row(
            "SELECT MAX(date) FROM window_journal
             WHERE symbol = ?1 AND granularity = ?2 AND status = ?3",
            params![
                symbol,
                granularity.code(),
                WindowStatus::EmptyNotFound.code()
            ],
            |row| row.get::<_, Option<NaiveDate>>(0),
        )?;
        Ok(date)
    }

    pub fn count(&self) -> Result<usize, JournalError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM window_journal", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn status_counts(&self) -> Result<StatusCounts, JournalError> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM window_journal GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let (code, n) = row?;
            match WindowStatus::from_code(code) {
                Some(WindowStatus::Success) => counts.success = n as usize,
                Some(WindowStatus::Failed) => counts.failed = n as usize,
                Some(WindowStatus::EmptyNotFound) => counts.empty = n as usize,
                None => return Err(JournalError::UnknownStatus(code)),
            }
        }
        Ok(counts)
    }

    /// All rows, optionally narrowed to one symbol and/or granularity, in key order.
    pub fn list(
        &self,
        symbol: Option<&str>,
        granularity: Option<Granularity>,
    ) -> Result<Vec<JournalEntry>, JournalError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM window_journal
             WHERE (?1 IS NULL OR symbol = ?1) AND (?2 IS NULL OR granularity = ?2)
             ORDER BY symbol, granularity, date"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![symbol, granularity.map(|g| g.code())], raw_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(decode_entry(row?)?);
        }
        Ok(entries)
    }

    /// Reconstruct `Success` rows from flat storage.
    ///
    /// Every stored window file becomes a `Success` entry whose timestamp is the
    /// `open_time` of its last row. Returns the number of rows written.
    pub fn rebuild_from_store(&self, store: &WindowStore) -> Result<usize, JournalError> {
        let mut written = 0;
        for window in store.list_windows(None, None)? {
            let bars = store.read(&window)?;
            let Some(last) = bars.last() else {
                continue;
            };
            tracing::debug!(window = %window, "rebuilding journal entry");
            if self.upsert(&window, WindowStatus::Success, Some(last.open_time))?
                == JournalWrite::Written
            {
                written += 1;
            }
        }
        Ok(written)
    }
}

type RawEntry = (String, String, NaiveDate, i64, Option<i64>, NaiveDateTime);

fn raw_entry(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decode_entry(raw: RawEntry) -> Result<JournalEntry, JournalError> {
    let (symbol, gran, date, code, last_record_timestamp, recorded_at) = raw;
    let granularity = gran
        .parse::<Granularity>()
        .map_err(|_| JournalError::UnknownGranularity(gran.clone()))?;
    let status = WindowStatus::from_code(code).ok_or(JournalError::UnknownStatus(code))?;
    Ok(JournalEntry {
        window: WindowId::new(symbol, granularity, date),
        outcome: WindowOutcome {
            status,
            last_record_timestamp,
            recorded_at,
        },
    })
}
