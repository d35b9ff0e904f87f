//! Ingestion driver: enumerates windows and spreads symbols over workers.
//!
//! Each symbol's windows are resolved sequentially, newest date first, by one
//! worker. Symbols are independent and run on a private rayon pool when more
//! than one worker is configured. Every worker opens its own journal
//! connection; the fetcher, the store and the negative cache are shared.

use super::pipeline::{WindowPipeline, WindowResolution};
use crate::data::{
    FetchError, Journal, JournalError, KlineFetcher, NegativeCache, RetryPolicy, Sleeper,
    ThreadSleeper, WindowStore, WriteEffect,
};
use crate::domain::{window_dates, Granularity, WindowId};
use chrono::NaiveDate;
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// One ingestion pass over a date span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestRun {
    pub granularity: Granularity,
    pub start: NaiveDate,
    /// Number of days from `start`; `None` runs up to yesterday.
    pub days: Option<u32>,
    pub symbols: Vec<String>,
}

/// Counts per terminal state plus every window that did not resolve.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub total: usize,
    pub persisted: usize,
    /// Persisted windows whose stored file was already identical.
    pub unchanged: usize,
    pub empty: usize,
    pub skipped: usize,
    pub unresolved: usize,
    pub failed: usize,
    /// `(window key, error)` for unresolved and failed windows.
    pub errors: Vec<(String, String)>,
}

impl IngestSummary {
    pub fn all_resolved(&self) -> bool {
        self.unresolved == 0 && self.failed == 0
    }

    pub fn merge(&mut self, other: IngestSummary) {
        self.total += other.total;
        self.persisted += other.persisted;
        self.unchanged += other.unchanged;
        self.empty += other.empty;
        self.skipped += other.skipped;
        self.unresolved += other.unresolved;
        self.failed += other.failed;
        self.errors.extend(other.errors);
    }

    fn record(&mut self, window: &WindowId, result: Result<WindowResolution, String>) {
        self.total += 1;
        match result {
            Ok(WindowResolution::SkippedExisting(_)) => self.skipped += 1,
            Ok(WindowResolution::PersistedData { storage, .. }) => {
                self.persisted += 1;
                if storage == WriteEffect::Unchanged {
                    self.unchanged += 1;
                }
            }
            Ok(WindowResolution::PersistedEmpty { .. }) => self.empty += 1,
            Ok(WindowResolution::Unresolved { last_error, .. }) => {
                self.unresolved += 1;
                self.errors.push((window.key(), last_error));
            }
            Err(e) => {
                self.failed += 1;
                self.errors.push((window.key(), e));
            }
        }
    }
}

/// Shared resources for ingestion runs.
pub struct IngestEngine {
    fetcher: Arc<dyn KlineFetcher>,
    store: WindowStore,
    journal_path: PathBuf,
    negative_cache: Arc<NegativeCache>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    ignore_exists: bool,
    workers: usize,
}

impl IngestEngine {
    pub fn new(
        fetcher: Arc<dyn KlineFetcher>,
        store: WindowStore,
        journal_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            fetcher,
            store,
            journal_path: journal_path.into(),
            negative_cache: Arc::new(NegativeCache::new()),
            retry: RetryPolicy::default(),
            sleeper: Arc::new(ThreadSleeper),
            ignore_exists: true,
            workers: 1,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn ignore_exists(mut self, ignore_exists: bool) -> Self {
        self.ignore_exists = ignore_exists;
        self
    }

    pub fn negative_cache(&self) -> &NegativeCache {
        &self.negative_cache
    }

    /// A pipeline with its own journal connection.
    pub fn pipeline(&self) -> Result<WindowPipeline, JournalError> {
        let journal = Journal::open(&self.journal_path)?;
        Ok(
            WindowPipeline::new(journal, Arc::clone(&self.fetcher), self.store.clone())
                .with_negative_cache(Arc::clone(&self.negative_cache))
                .with_retry(self.retry.clone())
                .with_sleeper(Arc::clone(&self.sleeper))
                .ignore_exists(self.ignore_exists),
        )
    }

    /// Resolve every window of the run. Window failures are counted, never returned.
    pub fn run(&self, run: &IngestRun, today: NaiveDate) -> Result<IngestSummary, RunError> {
        let needed = run.granularity.bars_per_day();
        let page_limit = self.fetcher.page_limit();
        if needed > page_limit {
            return Err(FetchError::PageOverflow {
                granularity: run.granularity,
                needed,
                page_limit,
            }
            .into());
        }

        let dates = window_dates(run.start, run.days, today);
        tracing::info!(
            fetcher = self.fetcher.name(),
            granularity = %run.granularity,
            symbols = run.symbols.len(),
            days = dates.len(),
            workers = self.workers,
            "starting ingestion run"
        );

        let reports: Vec<IngestSummary> = if self.workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.workers)
                .build()?;
            pool.install(|| {
                run.symbols
                    .par_iter()
                    .map_init(
                        || self.pipeline(),
                        |pipeline, symbol| {
                            self.run_symbol(pipeline.as_ref(), symbol, run.granularity, &dates)
                        },
                    )
                    .collect()
            })
        } else {
            let pipeline = self.pipeline();
            run.symbols
                .iter()
                .map(|symbol| self.run_symbol(pipeline.as_ref(), symbol, run.granularity, &dates))
                .collect()
        };

        let mut summary = IngestSummary::default();
        for report in reports {
            summary.merge(report);
        }

        tracing::info!(
            total = summary.total,
            persisted = summary.persisted,
            empty = summary.empty,
            skipped = summary.skipped,
            unresolved = summary.unresolved,
            failed = summary.failed,
            "ingestion run finished"
        );
        Ok(summary)
    }

    fn run_symbol(
        &self,
        pipeline: Result<&WindowPipeline, &JournalError>,
        symbol: &str,
        granularity: Granularity,
        dates: &[NaiveDate],
    ) -> IngestSummary {
        let mut summary = IngestSummary::default();
        let windows = dates
            .iter()
            .map(|&date| WindowId::new(symbol, granularity, date));

        let pipeline = match pipeline {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(symbol, error = %e, "cannot open journal for worker");
                for window in windows {
                    summary.record(&window, Err(format!("journal: {e}")));
                }
                return summary;
            }
        };

        let mut windows = windows;
        while let Some(window) = windows.next() {
            if !pipeline.is_fetcher_available() {
                tracing::warn!(symbol, "exchange unavailable, stopping symbol queue");
                let stopped = std::iter::once(window).chain(windows.by_ref());
                for window in stopped {
                    summary.record(
                        &window,
                        Ok(WindowResolution::Unresolved {
                            attempts: 0,
                            last_error: FetchError::CircuitOpen.to_string(),
                        }),
                    );
                }
                break;
            }

            let result = pipeline.resolve(&window).map_err(|e| e.to_string());
            if let Err(e) = &result {
                tracing::error!(window = %window, error = %e, "window failed");
            }
            summary.record(&window, result);
        }
        summary
    }
}
