//! Window acquisition pipeline.
//!
//! Resolves one window at a time:
//!
//! 1. Skip check: negative cache, then journal outcome, then journal empty frontier.
//! 2. Fetch with the bounded retry schedule. Transient failures are logged and
//!    retried; exhaustion leaves the window unresolved with nothing written.
//! 3. Persist: an empty result is recorded as `EmptyNotFound`; rows are written
//!    to flat storage first, then recorded as `Success`.
//!
//! Storage is written before the journal, so a crash between the two leaves a
//! window that is re-fetched and rewritten identically on the next run.

use crate::data::{
    dedup_by_open_time, FetchError, Journal, JournalError, JournalWrite, KlineFetcher,
    NegativeCache, RetryPolicy, Sleeper, StoreError, ThreadSleeper, WindowStore, WriteEffect,
};
use crate::domain::{Bar, WindowId, WindowStatus};
use chrono::NaiveDate;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("fetch: {0}")]
    Fetch(#[from] FetchError),

    #[error("journal: {0}")]
    Journal(#[from] JournalError),

    #[error("store: {0}")]
    Store(#[from] StoreError),
}

/// Why a window was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// At or before the cached known-empty frontier.
    NegativeCache(NaiveDate),
    /// The journal holds a final outcome.
    Journal(WindowStatus),
    /// At or before the newest journaled empty date of the series.
    EmptyFrontier(NaiveDate),
}

/// Terminal state of one resolution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowResolution {
    SkippedExisting(SkipReason),
    PersistedData {
        rows: usize,
        last_record_timestamp: i64,
        storage: WriteEffect,
        journal: JournalWrite,
    },
    PersistedEmpty {
        journal: JournalWrite,
    },
    /// Transient failures outlasted the retry schedule (or the breaker opened).
    Unresolved { attempts: usize, last_error: String },
}

impl WindowResolution {
    pub fn is_persisted(&self) -> bool {
        matches!(
            self,
            WindowResolution::PersistedData { .. } | WindowResolution::PersistedEmpty { .. }
        )
    }
}

enum FetchFailure {
    Exhausted { attempts: usize, last: FetchError },
    Fatal(FetchError),
}

pub struct WindowPipeline {
    journal: Journal,
    fetcher: Arc<dyn KlineFetcher>,
    store: WindowStore,
    negative_cache: Arc<NegativeCache>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    ignore_exists: bool,
}

impl WindowPipeline {
    /// Pipeline with the default retry schedule, a private negative cache and real sleeps.
    pub fn new(journal: Journal, fetcher: Arc<dyn KlineFetcher>, store: WindowStore) -> Self {
        Self {
            journal,
            fetcher,
            store,
            negative_cache: Arc::new(NegativeCache::new()),
            retry: RetryPolicy::default(),
            sleeper: Arc::new(ThreadSleeper),
            ignore_exists: true,
        }
    }

    pub fn with_negative_cache(mut self, cache: Arc<NegativeCache>) -> Self {
        self.negative_cache = cache;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// When false, every window is fetched and persisted again regardless of prior outcomes.
    pub fn ignore_exists(mut self, ignore_exists: bool) -> Self {
        self.ignore_exists = ignore_exists;
        self
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn store(&self) -> &WindowStore {
        &self.store
    }

    pub fn negative_cache(&self) -> &NegativeCache {
        &self.negative_cache
    }

    pub fn is_fetcher_available(&self) -> bool {
        self.fetcher.is_available()
    }

    /// Decide whether a window can be skipped without contacting the exchange.
    pub fn should_skip(&self, window: &WindowId) -> Result<Option<SkipReason>, JournalError> {
        let (symbol, granularity, date) = (&window.symbol, window.granularity, window.date);

        if self.negative_cache.should_skip(symbol, granularity, date) {
            let frontier = self.negative_cache.frontier(symbol, granularity).unwrap_or(date);
            return Ok(Some(SkipReason::NegativeCache(frontier)));
        }

        if let Some(outcome) = self.journal.find(window)? {
            if outcome.status.is_final() {
                return Ok(Some(SkipReason::Journal(outcome.status)));
            }
        }

        if let Some(latest) = self.journal.find_latest_empty_date(symbol, granularity)? {
            if latest >= date {
                self.negative_cache.advance(symbol, granularity, latest);
                return Ok(Some(SkipReason::EmptyFrontier(latest)));
            }
        }

        Ok(None)
    }

    /// Drive one window to a terminal state.
    ///
    /// Errors are journal/storage failures and non-retryable fetch errors; the
    /// window stays retryable on the next run in every error case.
    pub fn resolve(&self, window: &WindowId) -> Result<WindowResolution, IngestError> {
        if self.ignore_exists {
            if let Some(reason) = self.should_skip(window)? {
                tracing::debug!(window = %window, ?reason, "skipping window");
                return Ok(WindowResolution::SkippedExisting(reason));
            }
        }

        let needed = window.granularity.bars_per_day();
        let page_limit = self.fetcher.page_limit();
        if needed > page_limit {
            return Err(FetchError::PageOverflow {
                granularity: window.granularity,
                needed,
                page_limit,
            }
            .into());
        }

        match self.fetch_with_retry(window) {
            Ok(bars) => self.persist(window, bars),
            Err(FetchFailure::Exhausted { attempts, last }) => {
                Ok(WindowResolution::Unresolved {
                    attempts,
                    last_error: last.to_string(),
                })
            }
            Err(FetchFailure::Fatal(e)) => {
                tracing::error!(window = %window, error = %e, "fetch rejected, recording failure");
                self.journal.upsert(window, WindowStatus::Failed, None)?;
                Err(e.into())
            }
        }
    }

    fn fetch_with_retry(&self, window: &WindowId) -> Result<Vec<Bar>, FetchFailure> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.fetcher.fetch(
                &window.symbol,
                window.granularity,
                window.start_ms(),
                window.end_ms(),
            ) {
                Ok(bars) => return Ok(bars),
                Err(e) if !e.is_transient() => return Err(FetchFailure::Fatal(e)),
                Err(e) => e,
            };

            if matches!(err, FetchError::CircuitOpen) {
                tracing::warn!(
                    window = %window,
                    attempt,
                    "exchange circuit open, leaving window unresolved"
                );
                return Err(FetchFailure::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            match self.retry.delay_after(attempt) {
                Some(delay) => {
                    // The schedule is fixed; the server's hint is only reported.
                    let retry_after_secs = match err {
                        FetchError::RateLimited { retry_after_secs } => Some(retry_after_secs),
                        _ => None,
                    };
                    tracing::warn!(
                        window = %window,
                        attempt,
                        delay_secs = delay.as_secs_f64(),
                        ?retry_after_secs,
                        error = %err,
                        "transient fetch failure, retrying"
                    );
                    self.sleeper.sleep(delay);
                }
                None => {
                    tracing::error!(
                        window = %window,
                        attempts = attempt,
                        error = %err,
                        "retries exhausted, window unresolved"
                    );
                    return Err(FetchFailure::Exhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
            }
        }
    }

    fn persist(&self, window: &WindowId, bars: Vec<Bar>) -> Result<WindowResolution, IngestError> {
        let Some(last) = bars.last() else {
            let journal = self
                .journal
                .upsert(window, WindowStatus::EmptyNotFound, None)?;
            self.negative_cache
                .advance(&window.symbol, window.granularity, window.date);
            tracing::info!(window = %window, "no data, recorded empty");
            return Ok(WindowResolution::PersistedEmpty { journal });
        };
        let last_record_timestamp = last.open_time;

        let rows = dedup_by_open_time(&bars);
        let insane = rows.iter().filter(|b| !b.is_sane()).count();
        if insane > 0 {
            tracing::warn!(window = %window, insane, "bars fail the OHLC sanity check, storing as received");
        }
        let storage = self.store.write(window, &rows)?;
        let journal = self.journal.upsert(
            window,
            WindowStatus::Success,
            Some(last_record_timestamp),
        )?;

        tracing::info!(
            window = %window,
            rows = rows.len(),
            duplicates = bars.len() - rows.len(),
            ?storage,
            "window persisted"
        );
        Ok(WindowResolution::PersistedData {
            rows: rows.len(),
            last_record_timestamp,
            storage,
            journal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Granularity;

    struct FixedFetcher(usize);

    impl KlineFetcher for FixedFetcher {
        fn name(&self) -> &str {
            "fixed"
        }
        fn page_limit(&self) -> usize {
            self.0
        }
        fn fetch(&self, _: &str, _: Granularity, _: i64, _: i64) -> Result<Vec<Bar>, FetchError> {
            Ok(Vec::new())
        }
    }

    fn pipeline(page_limit: usize) -> (tempfile::TempDir, WindowPipeline) {
        let dir = tempfile::tempdir().unwrap();
        let p = WindowPipeline::new(
            Journal::open_in_memory().unwrap(),
            Arc::new(FixedFetcher(page_limit)),
            WindowStore::new(dir.path()),
        );
        (dir, p)
    }

    fn window(g: Granularity, day: u32) -> WindowId {
        WindowId::new("NEWUSDT", g, NaiveDate::from_ymd_opt(2024, 1, day).unwrap())
    }

    #[test]
    fn page_overflow_is_refused_without_journal_write() {
        let (_dir, p) = pipeline(1000);
        let err = p.resolve(&window(Granularity::Minute1, 1)).unwrap_err();
        assert!(matches!(
            err,
            IngestError::Fetch(FetchError::PageOverflow { needed: 1440, .. })
        ));
        assert_eq!(p.journal().count().unwrap(), 0);
    }

    #[test]
    fn empty_result_advances_the_negative_cache() {
        let (_dir, p) = pipeline(1000);
        let res = p.resolve(&window(Granularity::Hour1, 10)).unwrap();
        assert_eq!(
            res,
            WindowResolution::PersistedEmpty {
                journal: JournalWrite::Written
            }
        );
        assert_eq!(
            p.should_skip(&window(Granularity::Hour1, 9)).unwrap(),
            Some(SkipReason::NegativeCache(
                NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()
            ))
        );
        assert_eq!(p.should_skip(&window(Granularity::Hour1, 11)).unwrap(), None);
    }

    #[test]
    fn journal_frontier_seeds_the_cache() {
        let (_dir, p) = pipeline(1000);
        p.journal()
            .upsert(&window(Granularity::Hour1, 10), WindowStatus::EmptyNotFound, None)
            .unwrap();
        assert!(p.negative_cache().is_empty());

        assert_eq!(
            p.should_skip(&window(Granularity::Hour1, 3)).unwrap(),
            Some(SkipReason::EmptyFrontier(
                NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()
            ))
        );
        assert_eq!(p.negative_cache().len(), 1);
    }

    #[test]
    fn failed_outcome_is_not_skipped() {
        let (_dir, p) = pipeline(1000);
        p.journal()
            .upsert(&window(Granularity::Hour1, 5), WindowStatus::Failed, None)
            .unwrap();
        assert_eq!(p.should_skip(&window(Granularity::Hour1, 5)).unwrap(), None);
    }
}
