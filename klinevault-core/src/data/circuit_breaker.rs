//! Circuit breaker for exchange bans.
//!
//! The exchange answers HTTP 418/403 once an IP is banned. A ban trips the
//! breaker at once; while open, every fetch is refused until the cooldown
//! elapses, and all workers share the same breaker. Server errors and rate
//! limiting never trip it: they are transient and run the full retry schedule.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// State of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Requests are allowed.
    Closed,
    /// All requests are refused until the cooldown expires.
    Open { tripped_at: Instant },
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(BreakerState::Closed),
            cooldown,
        }
    }

    /// 30-minute cooldown after a ban.
    pub fn default_exchange() -> Self {
        Self::new(Duration::from_secs(30 * 60))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> BreakerState {
        *self.lock()
    }

    /// Check if requests are currently allowed, closing the breaker once the cooldown is over.
    pub fn is_allowed(&self) -> bool {
        let mut state = self.lock();
        match *state {
            BreakerState::Closed => true,
            BreakerState::Open { tripped_at } if tripped_at.elapsed() >= self.cooldown => {
                *state = BreakerState::Closed;
                tracing::info!("circuit breaker cooldown elapsed, closing");
                true
            }
            BreakerState::Open { .. } => false,
        }
    }

    /// Immediately trip the breaker (IP ban).
    pub fn trip(&self) {
        tracing::warn!(
            cooldown_secs = self.cooldown.as_secs(),
            "circuit breaker tripped by ban response"
        );
        *self.lock() = BreakerState::Open {
            tripped_at: Instant::now(),
        };
    }

    /// Remaining cooldown time (zero if not tripped).
    pub fn remaining_cooldown(&self) -> Duration {
        match *self.lock() {
            BreakerState::Closed => Duration::ZERO,
            BreakerState::Open { tripped_at } => {
                self.cooldown.saturating_sub(tripped_at.elapsed())
            }
        }
    }
}
