//! Gap-validated, append-only bar series.
//!
//! A [`BarSeries`] only ever grows by exactly one granularity step. Any gap,
//! duplicate or backwards step is an integrity fault and is returned to the
//! caller as [`SeriesError::OutOfOrder`]; nothing here repairs data.

use crate::data::{StoreError, WindowStore};
use crate::domain::{Bar, Granularity, WindowId};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SeriesError {
    #[error("{symbol} {granularity}: expected open_time {expected}, got {actual}")]
    OutOfOrder {
        symbol: String,
        granularity: Granularity,
        expected: i64,
        actual: i64,
    },

    #[error("bar belongs to {actual}, not to series {expected}")]
    Mismatch { expected: String, actual: String },
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Series(#[from] SeriesError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarSeries {
    symbol: String,
    granularity: Granularity,
    bars: Vec<Bar>,
}

impl BarSeries {
    pub fn new(symbol: impl Into<String>, granularity: Granularity) -> Self {
        Self {
            symbol: symbol.into(),
            granularity,
            bars: Vec::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first(&self) -> Option<&Bar> {
        self.bars.first()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    /// `open_time` the next bar must carry, if the series is non-empty.
    pub fn next_open_time(&self) -> Option<i64> {
        self.last()
            .map(|b| b.open_time + self.granularity.duration_ms())
    }

    /// Append one bar. It must sit exactly one step after the current last bar.
    pub fn append(&mut self, bar: Bar) -> Result<(), SeriesError> {
        if let Some(expected) = self.next_open_time() {
            if bar.open_time != expected {
                return Err(SeriesError::OutOfOrder {
                    symbol: self.symbol.clone(),
                    granularity: self.granularity,
                    expected,
                    actual: bar.open_time,
                });
            }
        }
        self.bars.push(bar);
        Ok(())
    }

    /// Sort the batch by `open_time`, then append bar by bar.
    ///
    /// Stops at the first violation; bars appended before it are kept.
    pub fn extend(&mut self, bars: impl IntoIterator<Item = Bar>) -> Result<(), SeriesError> {
        let mut batch: Vec<Bar> = bars.into_iter().collect();
        batch.sort_by_key(|b| b.open_time);
        for bar in batch {
            self.append(bar)?;
        }
        Ok(())
    }

    pub fn into_bars(self) -> Vec<Bar> {
        self.bars
    }
}

/// One series per `(symbol, granularity)`.
#[derive(Debug, Default)]
pub struct SeriesBook {
    series: BTreeMap<(String, Granularity), BarSeries>,
}

impl SeriesBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the series for `(symbol, granularity)`, creating it on first use.
    pub fn add(
        &mut self,
        symbol: &str,
        granularity: Granularity,
        bars: impl IntoIterator<Item = Bar>,
    ) -> Result<(), SeriesError> {
        self.series
            .entry((symbol.to_string(), granularity))
            .or_insert_with(|| BarSeries::new(symbol, granularity))
            .extend(bars)
    }

    /// Insert a fully built series, returning the one it replaces.
    pub fn insert(&mut self, series: BarSeries) -> Option<BarSeries> {
        self.series
            .insert((series.symbol.clone(), series.granularity), series)
    }

    pub fn get(&self, symbol: &str, granularity: Granularity) -> Option<&BarSeries> {
        self.series.get(&(symbol.to_string(), granularity))
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BarSeries> {
        self.series.values()
    }
}

/// Extend `series` with bars read from a stored window, refusing windows of another series.
pub fn extend_from_window(
    series: &mut BarSeries,
    window: &WindowId,
    bars: Vec<Bar>,
) -> Result<(), SeriesError> {
    if window.symbol != series.symbol || window.granularity != series.granularity {
        return Err(SeriesError::Mismatch {
            expected: format!("{}-{}", series.symbol, series.granularity),
            actual: format!("{}-{}", window.symbol, window.granularity),
        });
    }
    series.extend(bars)
}

/// Assemble the persisted windows of a series between `from` and `to` (inclusive).
///
/// Windows are read in date order; a missing day shows up as an `OutOfOrder` fault.
pub fn load_series(
    store: &WindowStore,
    symbol: &str,
    granularity: Granularity,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<BarSeries, LoadError> {
    let mut series = BarSeries::new(symbol, granularity);
    for window in store.list_windows(Some(symbol), Some(granularity))? {
        if window.date < from || window.date > to {
            continue;
        }
        let bars = store.read(&window)?;
        extend_from_window(&mut series, &window, bars)?;
    }
    tracing::debug!(
        symbol,
        granularity = %granularity,
        bars = series.len(),
        "series loaded"
    );
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    const T: i64 = 1_704_067_200_000;
    const HOUR: i64 = 3_600_000;

    fn bar(open_time: i64) -> Bar {
        let px = Decimal::new(42_000, 0);
        Bar {
            open_time,
            open: px,
            high: px,
            low: px,
            close: px,
            volume: Decimal::ONE,
            close_time: open_time + HOUR - 1,
            quote_volume: px,
            trade_count: 1,
            taker_buy_volume: Decimal::ZERO,
            taker_buy_quote_volume: Decimal::ZERO,
        }
    }

    fn series() -> BarSeries {
        BarSeries::new("BTCUSDT", Granularity::Hour1)
    }

    #[test]
    fn contiguous_appends_succeed() {
        let mut s = series();
        for i in 0..3 {
            s.append(bar(T + i * HOUR)).unwrap();
        }
        assert_eq!(s.len(), 3);
        assert_eq!(s.next_open_time(), Some(T + 3 * HOUR));
    }

    #[test]
    fn gap_is_rejected() {
        let mut s = series();
        s.append(bar(T)).unwrap();
        let err = s.append(bar(T + 3 * HOUR)).unwrap_err();
        assert_eq!(
            err,
            SeriesError::OutOfOrder {
                symbol: "BTCUSDT".into(),
                granularity: Granularity::Hour1,
                expected: T + HOUR,
                actual: T + 3 * HOUR,
            }
        );
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn duplicate_is_rejected() {
        let mut s = series();
        s.append(bar(T)).unwrap();
        assert!(matches!(
            s.append(bar(T)),
            Err(SeriesError::OutOfOrder { .. })
        ));
    }

    #[test]
    fn extend_sorts_the_batch() {
        let mut s = series();
        s.extend([bar(T + 2 * HOUR), bar(T), bar(T + HOUR)]).unwrap();
        let times: Vec<i64> = s.bars().iter().map(|b| b.open_time).collect();
        assert_eq!(times, vec![T, T + HOUR, T + 2 * HOUR]);
    }

    #[test]
    fn extend_with_duplicate_in_batch_fails() {
        let mut s = series();
        assert!(s.extend([bar(T), bar(T + HOUR), bar(T)]).is_err());
    }

    #[test]
    fn book_routes_by_key() {
        let mut book = SeriesBook::new();
        book.add("BTCUSDT", Granularity::Hour1, [bar(T), bar(T + HOUR)])
            .unwrap();
        book.add("ETHUSDT", Granularity::Hour1, [bar(T)]).unwrap();
        book.add("BTCUSDT", Granularity::Hour1, [bar(T + 2 * HOUR)])
            .unwrap();

        assert_eq!(book.len(), 2);
        assert_eq!(book.get("BTCUSDT", Granularity::Hour1).unwrap().len(), 3);
        assert!(book.get("BTCUSDT", Granularity::Hour4).is_none());
    }

    #[test]
    fn window_of_another_series_is_a_mismatch() {
        let mut s = series();
        let w = WindowId::new(
            "ETHUSDT",
            Granularity::Hour1,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        );
        assert!(matches!(
            extend_from_window(&mut s, &w, vec![bar(T)]),
            Err(SeriesError::Mismatch { .. })
        ));
    }

    #[test]
    fn load_series_spans_windows() {
        let dir = tempfile::tempdir().unwrap();
        let store = WindowStore::new(dir.path());
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();

        for day in [1, 2] {
            let w = WindowId::new("BTCUSDT", Granularity::Hour1, d(day));
            let bars: Vec<Bar> = (0..24).map(|i| bar(w.start_ms() + i * HOUR)).collect();
            store.write(&w, &bars).unwrap();
        }

        let s = load_series(&store, "BTCUSDT", Granularity::Hour1, d(1), d(2)).unwrap();
        assert_eq!(s.len(), 48);
        let only_second = load_series(&store, "BTCUSDT", Granularity::Hour1, d(2), d(2)).unwrap();
        assert_eq!(only_second.len(), 24);
    }

    #[test]
    fn load_series_surfaces_a_missing_day() {
        let dir = tempfile::tempdir().unwrap();
        let store = WindowStore::new(dir.path());
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();

        for day in [1, 3] {
            let w = WindowId::new("BTCUSDT", Granularity::Hour1, d(day));
            let bars: Vec<Bar> = (0..24).map(|i| bar(w.start_ms() + i * HOUR)).collect();
            store.write(&w, &bars).unwrap();
        }

        assert!(matches!(
            load_series(&store, "BTCUSDT", Granularity::Hour1, d(1), d(3)),
            Err(LoadError::Series(SeriesError::OutOfOrder { .. }))
        ));
    }
}
