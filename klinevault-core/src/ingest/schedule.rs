//! Polling variant: one ingestion cycle per granularity boundary.
//!
//! The wait until the next boundary is turned into a monotonic deadline and
//! slept off in short increments, so the process can be stopped between any two
//! increments without leaving a half-written window.

use super::driver::{IngestEngine, IngestRun, IngestSummary, RunError};
use crate::data::{Sleeper, ThreadSleeper};
use crate::domain::Granularity;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of wall-clock time.
pub trait WallClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub struct Poller {
    granularity: Granularity,
    poll_interval: Duration,
    lookback_days: u32,
    max_cycles: Option<usize>,
    clock: Arc<dyn WallClock>,
    sleeper: Arc<dyn Sleeper>,
}

impl Poller {
    pub fn new(granularity: Granularity, poll_interval: Duration, lookback_days: u32) -> Self {
        Self {
            granularity,
            poll_interval,
            lookback_days,
            max_cycles: None,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    /// Stop after `cycles` ingestion cycles instead of running forever.
    pub fn with_max_cycles(mut self, cycles: usize) -> Self {
        self.max_cycles = Some(cycles);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn WallClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Monotonic deadline for the next granularity boundary after `now`.
    pub fn next_deadline(&self, now: DateTime<Utc>) -> (DateTime<Utc>, Instant) {
        let next = self.granularity.next_run_time(now);
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        (next, Instant::now() + wait)
    }

    /// Block until `deadline`, re-checking the monotonic clock after every increment.
    pub fn wait_until(&self, deadline: Instant) {
        loop {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            let step = self.poll_interval.min(deadline - now);
            self.sleeper.sleep(step);
        }
    }

    /// Run cycles until `max_cycles` is reached (forever when unset).
    ///
    /// `on_cycle` receives the 1-based cycle number and that cycle's summary.
    /// Returns the number of completed cycles.
    pub fn run(
        &self,
        engine: &IngestEngine,
        symbols: &[String],
        mut on_cycle: impl FnMut(usize, &IngestSummary),
    ) -> Result<usize, RunError> {
        let mut cycles = 0;
        while self.max_cycles.map_or(true, |max| cycles < max) {
            let (next, deadline) = self.next_deadline(self.clock.now());
            tracing::info!(next_run = %next, granularity = %self.granularity, "waiting for next run");
            self.wait_until(deadline);

            let today = self.clock.now().date_naive();
            let run = IngestRun {
                granularity: self.granularity,
                start: today - ChronoDuration::days(i64::from(self.lookback_days)),
                days: None,
                symbols: symbols.to_vec(),
            };
            let summary = engine.run(&run, today)?;
            cycles += 1;
            on_cycle(cycles, &summary);
        }
        Ok(cycles)
    }
}
