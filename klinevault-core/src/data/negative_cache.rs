//! Process-local frontier of known-empty windows.
//!
//! Maps `(symbol, granularity)` to the newest date known to have no data. An
//! instrument with no bars up to some date (typically because it was not listed
//! yet) has no bars on any earlier date either, so every date at or before the
//! frontier can be skipped without asking the journal or the exchange.
//!
//! Advisory only: never persisted, never shared across processes.

use crate::domain::Granularity;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default)]
pub struct NegativeCache {
    frontiers: Mutex<HashMap<(String, Granularity), NaiveDate>>,
}

impl NegativeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `date` is at or before the known-empty frontier of the series.
    pub fn should_skip(&self, symbol: &str, granularity: Granularity, date: NaiveDate) -> bool {
        self.frontier(symbol, granularity)
            .is_some_and(|frontier| date <= frontier)
    }

    /// Move the frontier to `date` if that is later than the current one.
    ///
    /// Returns true when the frontier moved.
    pub fn advance(&self, symbol: &str, granularity: Granularity, date: NaiveDate) -> bool {
        let mut frontiers = self.frontiers.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (symbol.to_string(), granularity);
        match frontiers.get_mut(&key) {
            Some(current) if date <= *current => false,
            Some(current) => {
                *current = date;
                true
            }
            None => {
                frontiers.insert(key, date);
                true
            }
        }
    }

    pub fn frontier(&self, symbol: &str, granularity: Granularity) -> Option<NaiveDate> {
        let frontiers = self.frontiers.lock().unwrap_or_else(PoisonError::into_inner);
        frontiers.get(&(symbol.to_string(), granularity)).copied()
    }

    pub fn len(&self) -> usize {
        self.frontiers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
