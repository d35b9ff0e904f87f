//! Merge stored windows of one series into a single Parquet file.

use super::store::{dedup_by_open_time, StoreError, WindowStore};
use crate::domain::{Bar, Granularity};
use chrono::NaiveDate;
use polars::prelude::*;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("no stored windows for {symbol} {granularity} in {from}..={to}")]
    NoData {
        symbol: String,
        granularity: Granularity,
        from: NaiveDate,
        to: NaiveDate,
    },

    #[error("parquet: {0}")]
    Parquet(String),
}

/// Summary of a finished export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportReport {
    pub windows: usize,
    pub rows: usize,
}

/// Collect the stored bars of a series between `from` and `to` (inclusive),
/// de-duplicated by `open_time` and sorted ascending.
pub fn merge_windows(
    store: &WindowStore,
    symbol: &str,
    granularity: Granularity,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<(usize, Vec<Bar>), StoreError> {
    let windows: Vec<_> = store
        .list_windows(Some(symbol), Some(granularity))?
        .into_iter()
        .filter(|w| w.date >= from && w.date <= to)
        .collect();

    let mut bars = Vec::new();
    for window in &windows {
        bars.extend(store.read(window)?);
    }
    let mut bars = dedup_by_open_time(&bars);
    bars.sort_by_key(|b| b.open_time);
    Ok((windows.len(), bars))
}

pub fn export_parquet(
    store: &WindowStore,
    symbol: &str,
    granularity: Granularity,
    from: NaiveDate,
    to: NaiveDate,
    path: &Path,
) -> Result<ExportReport, ExportError> {
    let (windows, bars) = merge_windows(store, symbol, granularity, from, to)?;
    if bars.is_empty() {
        return Err(ExportError::NoData {
            symbol: symbol.to_string(),
            granularity,
            from,
            to,
        });
    }

    let mut df = bars_to_dataframe(&bars)?;
    write_parquet(&mut df, path)?;

    tracing::info!(
        symbol,
        granularity = %granularity,
        windows,
        rows = bars.len(),
        path = %path.display(),
        "exported series"
    );
    Ok(ExportReport {
        windows,
        rows: bars.len(),
    })
}

fn decimal_column(name: &str, bars: &[Bar], field: impl Fn(&Bar) -> String) -> Column {
    Column::new(name.into(), bars.iter().map(field).collect::<Vec<String>>())
}

fn bars_to_dataframe(bars: &[Bar]) -> Result<DataFrame, ExportError> {
    let open_times: Vec<i64> = bars.iter().map(|b| b.open_time).collect();
    let close_times: Vec<i64> = bars.iter().map(|b| b.close_time).collect();
    let trade_counts: Vec<i64> = bars.iter().map(|b| b.trade_count).collect();

    DataFrame::new(vec![
        Column::new("open_time".into(), open_times),
        decimal_column("open", bars, |b| b.open.to_string()),
        decimal_column("high", bars, |b| b.high.to_string()),
        decimal_column("low", bars, |b| b.low.to_string()),
        decimal_column("close", bars, |b| b.close.to_string()),
        decimal_column("volume", bars, |b| b.volume.to_string()),
        Column::new("close_time".into(), close_times),
        decimal_column("quote_volume", bars, |b| b.quote_volume.to_string()),
        Column::new("trade_count".into(), trade_counts),
        decimal_column("taker_buy_volume", bars, |b| b.taker_buy_volume.to_string()),
        decimal_column("taker_buy_quote_volume", bars, |b| {
            b.taker_buy_quote_volume.to_string()
        }),
    ])
    .map_err(|e| ExportError::Parquet(format!("dataframe creation: {e}")))
}

/// Write through a temp file so a failed export never leaves a truncated file behind.
fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), ExportError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| ExportError::Parquet(format!("create dir: {e}")))?;
        }
    }
    let tmp_path = path.with_extension("parquet.tmp");
    let file = fs::File::create(&tmp_path)
        .map_err(|e| ExportError::Parquet(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(|e| ExportError::Parquet(format!("write parquet: {e}")))?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        ExportError::Parquet(format!("rename: {e}"))
    })
}
