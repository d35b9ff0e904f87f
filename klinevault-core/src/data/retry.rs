//! Bounded retry schedule and the sleeper that waits it out.

use std::time::Duration;

/// Fixed list of delays between attempts: `n` delays allow `n + 1` attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn from_secs(secs: &[u64]) -> Self {
        Self::new(secs.iter().copied().map(Duration::from_secs).collect())
    }

    /// 2s, 4s, 8s, 16s: five attempts in total.
    pub fn fixed_backoff() -> Self {
        Self::from_secs(&[2, 4, 8, 16])
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Delay to wait after the given failed attempt (1-based), or `None` when exhausted.
    pub fn delay_after(&self, attempt: usize) -> Option<Duration> {
        attempt
            .checked_sub(1)
            .and_then(|i| self.delays.get(i))
            .copied()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed_backoff()
    }
}

/// Blocks the calling worker. Retries never run on background timers.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
