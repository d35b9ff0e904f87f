//! Flat window storage with Hive-style partitioning.
//!
//! Layout: `{data_dir}/symbol={SYMBOL}/granularity={GRAN}/{YYYY-MM-DD}.csv`
//!
//! - One CSV file per window, header plus one row per bar in fetch order
//! - Rows de-duplicated by `open_time` (first occurrence wins)
//! - Atomic writes (write to .tmp, rename into place)
//! - A write whose bytes hash identically to the existing file is skipped

use crate::domain::{Bar, Granularity, WindowId};
use chrono::NaiveDate;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("no bars to store for {0}")]
    Empty(String),

    #[error("window file not found: {0}")]
    NotFound(PathBuf),
}

fn io_err<'a>(
    op: &'static str,
    path: &'a Path,
) -> impl FnOnce(std::io::Error) -> StoreError + 'a {
    move |source| StoreError::Io {
        op,
        path: path.to_path_buf(),
        source,
    }
}

/// Result of a window write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteEffect {
    Written,
    Unchanged,
}

/// CSV-per-window store rooted at a data directory.
#[derive(Debug, Clone)]
pub struct WindowStore {
    data_dir: PathBuf,
}

impl WindowStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Root directory of the store.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory for one series: `{data_dir}/symbol={SYMBOL}/granularity={GRAN}/`
    fn series_dir(&self, symbol: &str, granularity: Granularity) -> PathBuf {
        self.data_dir
            .join(format!("symbol={symbol}"))
            .join(format!("granularity={granularity}"))
    }

    /// Path to the CSV file for a window.
    pub fn window_path(&self, window: &WindowId) -> PathBuf {
        self.series_dir(&window.symbol, window.granularity)
            .join(format!("{}.csv", window.date))
    }

    pub fn exists(&self, window: &WindowId) -> bool {
        self.window_path(window).is_file()
    }

    /// Fully overwrite a window's file with `bars`, de-duplicated by `open_time`.
    pub fn write(&self, window: &WindowId, bars: &[Bar]) -> Result<WriteEffect, StoreError> {
        let rows = dedup_by_open_time(bars);
        if rows.is_empty() {
            return Err(StoreError::Empty(window.key()));
        }

        let bytes = encode_csv(&rows)?;
        let path = self.window_path(window);

        if let Ok(existing) = fs::read(&path) {
            if blake3::hash(&existing) == blake3::hash(&bytes) {
                return Ok(WriteEffect::Unchanged);
            }
        }

        let dir = self.series_dir(&window.symbol, window.granularity);
        fs::create_dir_all(&dir).map_err(io_err("create dir", &dir))?;

        let tmp_path = path.with_extension("csv.tmp");
        fs::write(&tmp_path, &bytes).map_err(io_err("write", &tmp_path))?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            io_err("rename", &path)(e)
        })?;

        Ok(WriteEffect::Written)
    }

    /// Load a window's bars in stored order.
    pub fn read(&self, window: &WindowId) -> Result<Vec<Bar>, StoreError> {
        let path = self.window_path(window);
        if !path.is_file() {
            return Err(StoreError::NotFound(path));
        }
        let mut reader = csv::Reader::from_path(&path)?;
        let mut bars = Vec::new();
        for record in reader.deserialize::<Bar>() {
            bars.push(record?);
        }
        Ok(bars)
    }

    /// Every stored window, optionally narrowed to a symbol and/or granularity, sorted.
    pub fn list_windows(
        &self,
        symbol: Option<&str>,
        granularity: Option<Granularity>,
    ) -> Result<Vec<WindowId>, StoreError> {
        let mut windows = Vec::new();
        if !self.data_dir.is_dir() {
            return Ok(windows);
        }

        for (sym, sym_dir) in partitions(&self.data_dir, "symbol=")? {
            if symbol.is_some_and(|s| s != sym) {
                continue;
            }
            for (gran, gran_dir) in partitions(&sym_dir, "granularity=")? {
                let Ok(gran) = gran.parse::<Granularity>() else {
                    continue;
                };
                if granularity.is_some_and(|g| g != gran) {
                    continue;
                }
                let entries = fs::read_dir(&gran_dir).map_err(io_err("read dir", &gran_dir))?;
                for entry in entries {
                    let path = entry.map_err(io_err("dir entry", &gran_dir))?.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                        continue;
                    }
                    let date = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());
                    if let Some(date) = date {
                        windows.push(WindowId::new(sym.clone(), gran, date));
                    }
                }
            }
        }

        windows.sort();
        Ok(windows)
    }
}

/// Subdirectories named `{prefix}{value}`, as `(value, path)` pairs.
fn partitions(dir: &Path, prefix: &str) -> Result<Vec<(String, PathBuf)>, StoreError> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err("read dir", dir))? {
        let path = entry.map_err(io_err("dir entry", dir))?.path();
        if !path.is_dir() {
            continue;
        }
        let value = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(prefix))
            .map(str::to_string);
        if let Some(value) = value {
            out.push((value, path));
        }
    }
    Ok(out)
}

/// Drop repeated `open_time`s, keeping the first occurrence and the original order.
pub fn dedup_by_open_time(bars: &[Bar]) -> Vec<Bar> {
    let mut seen = HashSet::with_capacity(bars.len());
    bars.iter()
        .filter(|b| seen.insert(b.open_time))
        .cloned()
        .collect()
}

fn encode_csv(bars: &[Bar]) -> Result<Vec<u8>, StoreError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for bar in bars {
        writer.serialize(bar)?;
    }
    writer
        .into_inner()
        .map_err(|e| StoreError::Csv(csv::Error::from(e.into_error())))
}
