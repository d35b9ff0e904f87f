//! KlineVault Core: resumable kline ingestion.
//!
//! This crate contains:
//! - Domain types (granularities, bars, window identities and outcomes)
//! - The completion journal, the negative cache and flat window storage
//! - The remote fetcher trait and the Binance spot implementation
//! - The window acquisition pipeline, the multi-worker driver and the poller
//! - The gap-validated series assembler and Parquet export

pub mod config;
pub mod data;
pub mod domain;
pub mod ingest;
pub mod series;

pub use config::{ConfigError, IngestConfig};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything shared across worker threads is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();
        require_send::<domain::WindowId>();
        require_sync::<domain::WindowId>();
        require_send::<domain::WindowOutcome>();
        require_sync::<domain::WindowOutcome>();

        // Shared resources
        require_send::<data::NegativeCache>();
        require_sync::<data::NegativeCache>();
        require_send::<data::CircuitBreaker>();
        require_sync::<data::CircuitBreaker>();
        require_send::<data::WindowStore>();
        require_sync::<data::WindowStore>();
        require_send::<data::BinanceFetcher>();
        require_sync::<data::BinanceFetcher>();
        require_send::<ingest::IngestEngine>();
        require_sync::<ingest::IngestEngine>();

        // A journal connection moves to its worker but is never shared.
        require_send::<data::Journal>();
        require_send::<ingest::WindowPipeline>();

        require_send::<series::BarSeries>();
        require_sync::<series::BarSeries>();
    }

    /// The fetcher is used behind `Arc<dyn KlineFetcher>` across workers.
    #[test]
    fn fetcher_trait_is_object_safe() {
        fn _check(fetcher: &dyn data::KlineFetcher) -> usize {
            fetcher.page_limit()
        }
    }
}
