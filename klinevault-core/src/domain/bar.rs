//! Bar: one kline as returned by the exchange.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;

/// OHLCV kline for a single symbol and granularity.
///
/// `open_time` is the natural key: unique within a window, ascending across a series.
/// Decimal fields are serialized as strings so no precision is lost on the way to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub open_time: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub open: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub high: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub low: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub close: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
    pub close_time: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub quote_volume: Decimal,
    pub trade_count: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub taker_buy_volume: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub taker_buy_quote_volume: Decimal,
}

/// Why a raw kline row could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BarDecodeError {
    #[error("kline row has {0} fields, expected at least 11")]
    ShortRow(usize),

    #[error("kline field {index} ({name}) is not a valid {expected}: {raw}")]
    BadField {
        index: usize,
        name: &'static str,
        expected: &'static str,
        raw: String,
    },
}

const FIELD_NAMES: [&str; 11] = [
    "open_time",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "close_time",
    "quote_volume",
    "trade_count",
    "taker_buy_volume",
    "taker_buy_quote_volume",
];

impl Bar {
    /// Decode one kline row: `[open_time, "open", "high", "low", "close", "volume",
    /// close_time, "quote_volume", trade_count, "taker_buy_volume",
    /// "taker_buy_quote_volume", "ignore"]`. The trailing field is dropped.
    pub fn from_row(row: &[Value]) -> Result<Self, BarDecodeError> {
        if row.len() < FIELD_NAMES.len() {
            return Err(BarDecodeError::ShortRow(row.len()));
        }
        Ok(Bar {
            open_time: int_field(row, 0)?,
            open: decimal_field(row, 1)?,
            high: decimal_field(row, 2)?,
            low: decimal_field(row, 3)?,
            close: decimal_field(row, 4)?,
            volume: decimal_field(row, 5)?,
            close_time: int_field(row, 6)?,
            quote_volume: decimal_field(row, 7)?,
            trade_count: int_field(row, 8)?,
            taker_buy_volume: decimal_field(row, 9)?,
            taker_buy_quote_volume: decimal_field(row, 10)?,
        })
    }

    /// Basic sanity check: high bounds open/close/low from above, low from below.
    pub fn is_sane(&self) -> bool {
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.close_time >= self.open_time
    }
}

fn int_field(row: &[Value], index: usize) -> Result<i64, BarDecodeError> {
    let value = &row[index];
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| BarDecodeError::BadField {
        index,
        name: FIELD_NAMES[index],
        expected: "integer",
        raw: value.to_string(),
    })
}

fn decimal_field(row: &[Value], index: usize) -> Result<Decimal, BarDecodeError> {
    let value = &row[index];
    let parsed = match value {
        Value::String(s) => Decimal::from_str(s).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    };
    parsed.ok_or_else(|| BarDecodeError::BadField {
        index,
        name: FIELD_NAMES[index],
        expected: "decimal",
        raw: value.to_string(),
    })
}
