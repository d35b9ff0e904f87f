//! Remote fetching, durable bookkeeping and flat storage

pub mod binance;
pub mod circuit_breaker;
pub mod export;
pub mod fetcher;
pub mod journal;
pub mod negative_cache;
pub mod retry;
pub mod store;
pub mod universe;

pub use binance::BinanceFetcher;
pub use circuit_breaker::CircuitBreaker;
pub use export::{export_parquet, merge_windows, ExportError, ExportReport};
pub use fetcher::{FetchError, KlineFetcher};
pub use journal::{Journal, JournalEntry, JournalError, JournalWrite, StatusCounts};
pub use negative_cache::NegativeCache;
pub use retry::{RetryPolicy, Sleeper, ThreadSleeper};
pub use store::{dedup_by_open_time, StoreError, WindowStore, WriteEffect};
pub use universe::{Instrument, Universe, UniverseError};
