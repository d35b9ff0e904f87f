//! Remote fetcher trait and its error taxonomy.
//!
//! The KlineFetcher trait abstracts over the exchange so the acquisition
//! pipeline can be driven by a scripted fetcher in tests. The journal and the
//! window store sit above this trait; fetchers know nothing about them.

use crate::domain::{Bar, BarDecodeError, Granularity};
use thiserror::Error;

/// Failure of one fetch call.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network unreachable: {0}")]
    Network(String),

    #[error("rate limited by exchange (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("circuit breaker open: exchange has blocked requests")]
    CircuitOpen,

    #[error("request rejected with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("{granularity} needs {needed} bars per window but one page holds {page_limit}")]
    PageOverflow {
        granularity: Granularity,
        needed: usize,
        page_limit: usize,
    },
}

impl FetchError {
    /// Transient failures are retried; everything else is a programmer or config error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Network(_)
                | FetchError::RateLimited { .. }
                | FetchError::MalformedResponse(_)
                | FetchError::CircuitOpen
        )
    }
}

impl From<BarDecodeError> for FetchError {
    fn from(e: BarDecodeError) -> Self {
        FetchError::MalformedResponse(e.to_string())
    }
}

/// One bounded-range kline fetch against the exchange.
pub trait KlineFetcher: Send + Sync {
    /// Human-readable name of this fetcher.
    fn name(&self) -> &str;

    /// Maximum rows the endpoint returns per call; longer ranges are silently truncated.
    fn page_limit(&self) -> usize;

    /// Fetch bars with `start_ms <= open_time <= end_ms`, in exchange order.
    ///
    /// Exactly one remote call per invocation. An empty vector means the exchange
    /// has no data for the range.
    fn fetch(
        &self,
        symbol: &str,
        granularity: Granularity,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Bar>, FetchError>;

    /// Check if the exchange is currently reachable (not banned, not cooling down).
    fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(FetchError::Network("reset".into()).is_transient());
        assert!(FetchError::RateLimited {
            retry_after_secs: 1
        }
        .is_transient());
        assert!(FetchError::MalformedResponse("x".into()).is_transient());
        assert!(FetchError::CircuitOpen.is_transient());
        assert!(!FetchError::Rejected {
            status: 400,
            message: "Invalid symbol.".into()
        }
        .is_transient());
        assert!(!FetchError::PageOverflow {
            granularity: Granularity::Minute1,
            needed: 1440,
            page_limit: 1000
        }
        .is_transient());
    }

    #[test]
    fn decode_errors_become_malformed_responses() {
        let err: FetchError = BarDecodeError::ShortRow(3).into();
        assert!(matches!(err, FetchError::MalformedResponse(_)));
        assert!(err.is_transient());
    }
}
