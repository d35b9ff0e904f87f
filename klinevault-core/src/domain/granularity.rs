//! Granularity: the duration of one bar.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Supported bar durations, named by their exchange interval code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Granularity {
    Minute1,
    Minute3,
    Minute5,
    Minute15,
    Minute30,
    Hour1,
    Hour2,
    Hour4,
    Hour6,
    Hour8,
    Hour12,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown granularity '{0}' (expected one of 1m, 3m, 5m, 15m, 30m, 1h, 2h, 4h, 6h, 8h, 12h)")]
pub struct ParseGranularityError(pub String);

impl Granularity {
    pub const ALL: [Granularity; 11] = [
        Granularity::Minute1,
        Granularity::Minute3,
        Granularity::Minute5,
        Granularity::Minute15,
        Granularity::Minute30,
        Granularity::Hour1,
        Granularity::Hour2,
        Granularity::Hour4,
        Granularity::Hour6,
        Granularity::Hour8,
        Granularity::Hour12,
    ];

    /// Exchange interval code, e.g. `"1h"`.
    pub fn code(self) -> &'static str {
        match self {
            Granularity::Minute1 => "1m",
            Granularity::Minute3 => "3m",
            Granularity::Minute5 => "5m",
            Granularity::Minute15 => "15m",
            Granularity::Minute30 => "30m",
            Granularity::Hour1 => "1h",
            Granularity::Hour2 => "2h",
            Granularity::Hour4 => "4h",
            Granularity::Hour6 => "6h",
            Granularity::Hour8 => "8h",
            Granularity::Hour12 => "12h",
        }
    }

    pub fn minutes(self) -> i64 {
        match self {
            Granularity::Minute1 => 1,
            Granularity::Minute3 => 3,
            Granularity::Minute5 => 5,
            Granularity::Minute15 => 15,
            Granularity::Minute30 => 30,
            Granularity::Hour1 => 60,
            Granularity::Hour2 => 120,
            Granularity::Hour4 => 240,
            Granularity::Hour6 => 360,
            Granularity::Hour8 => 480,
            Granularity::Hour12 => 720,
        }
    }

    pub fn duration(self) -> Duration {
        Duration::minutes(self.minutes())
    }

    /// Bar duration in epoch milliseconds, the spacing of adjacent `open_time`s.
    pub fn duration_ms(self) -> i64 {
        self.minutes() * 60_000
    }

    /// Number of bars in one full calendar day.
    pub fn bars_per_day(self) -> usize {
        (24 * 60 / self.minutes()) as usize
    }

    /// Next bar boundary strictly after `now`, aligned to the granularity in UTC.
    ///
    /// For `1h` this is the top of the next hour; for `15m` the next quarter hour.
    pub fn next_run_time(self, now: DateTime<Utc>) -> DateTime<Utc> {
        let step = self.duration_ms();
        let now_ms = now.timestamp_millis();
        let next_ms = now_ms.div_euclid(step) * step + step;
        Utc.timestamp_millis_opt(next_ms)
            .single()
            .unwrap_or(now + self.duration())
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Granularity {
    type Err = ParseGranularityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        Granularity::ALL
            .into_iter()
            .find(|g| g.code().eq_ignore_ascii_case(code))
            .ok_or_else(|| ParseGranularityError(s.to_string()))
    }
}

impl TryFrom<String> for Granularity {
    type Error = ParseGranularityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Granularity> for String {
    fn from(g: Granularity) -> Self {
        g.code().to_string()
    }
}
