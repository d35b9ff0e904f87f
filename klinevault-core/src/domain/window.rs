//! Window identity and outcome: the unit of ingestion work and its recorded result.

use super::granularity::Granularity;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One symbol × granularity × calendar day (UTC).
///
/// Ordering is by (symbol, granularity, date), matching the journal primary key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WindowId {
    pub symbol: String,
    pub granularity: Granularity,
    pub date: NaiveDate,
}

impl WindowId {
    pub fn new(symbol: impl Into<String>, granularity: Granularity, date: NaiveDate) -> Self {
        Self {
            symbol: symbol.into(),
            granularity,
            date,
        }
    }

    /// First millisecond of the window (00:00:00.000 UTC).
    pub fn start_ms(&self) -> i64 {
        self.date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis())
            .unwrap_or_default()
    }

    /// Last millisecond of the window (23:59:59.999 UTC).
    ///
    /// The kline endpoint treats `endTime` inclusively, so ending one millisecond
    /// before midnight keeps the next day's first bar out of this window.
    pub fn end_ms(&self) -> i64 {
        self.start_ms() + Duration::days(1).num_milliseconds() - 1
    }

    /// `SYMBOL-GRAN-YYYY-MM-DD`, used in logs and error reports.
    pub fn key(&self) -> String {
        format!("{}-{}-{}", self.symbol, self.granularity, self.date)
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.symbol, self.granularity, self.date)
    }
}

/// Last known result of resolving a window. Stored as `1`, `2`, `3` in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowStatus {
    Success,
    Failed,
    EmptyNotFound,
}

impl WindowStatus {
    pub fn code(self) -> i64 {
        match self {
            WindowStatus::Success => 1,
            WindowStatus::Failed => 2,
            WindowStatus::EmptyNotFound => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(WindowStatus::Success),
            2 => Some(WindowStatus::Failed),
            3 => Some(WindowStatus::EmptyNotFound),
            _ => None,
        }
    }

    /// Success and confirmed-empty are final; only failures are retried.
    pub fn is_final(self) -> bool {
        self != WindowStatus::Failed
    }
}

impl fmt::Display for WindowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WindowStatus::Success => "success",
            WindowStatus::Failed => "failed",
            WindowStatus::EmptyNotFound => "empty",
        };
        f.write_str(s)
    }
}

/// The journal's record for one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowOutcome {
    pub status: WindowStatus,
    pub last_record_timestamp: Option<i64>,
    pub recorded_at: NaiveDateTime,
}

/// Dates a run covers, newest first.
///
/// With `days` the span is `start .. start + days`; without it the span runs up to
/// `today`. Dates on or after `today` are dropped because that window is not closed
/// yet. Newest-first order lets one confirmed-empty date cover every older date
/// of the same series through the negative cache.
pub fn window_dates(start: NaiveDate, days: Option<u32>, today: NaiveDate) -> Vec<NaiveDate> {
    let end_exclusive = match days {
        Some(n) => start + Duration::days(i64::from(n)),
        None => today,
    };
    let end_exclusive = end_exclusive.min(today);

    let mut dates = Vec::new();
    let mut date = start;
    while date < end_exclusive {
        dates.push(date);
        date += Duration::days(1);
    }
    dates.reverse();
    dates
}
