//! KlineVault CLI: download, watch, journal and export commands.
//!
//! Commands:
//! - `download`: resolve every daily window of a date span for a set of symbols
//! - `watch`: re-run ingestion at every granularity boundary
//! - `journal status`: report completion counts
//! - `journal rebuild`: reconstruct journal entries from stored windows
//! - `universe refresh`: save the exchange's instrument listing
//! - `export`: merge stored windows of one series into a Parquet file

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use klinevault_core::data::{
    export_parquet, BinanceFetcher, CircuitBreaker, Journal, Universe, WindowStore,
};
use klinevault_core::domain::Granularity;
use klinevault_core::ingest::{IngestEngine, IngestRun, IngestSummary, Poller};
use klinevault_core::IngestConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "klinevault",
    about = "KlineVault CLI: resumable exchange kline ingestion"
)]
struct Cli {
    /// TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download daily windows for a date span.
    Download {
        /// Bar granularity (3m, 5m, 1h, 4h, ...). 1m is refused: one day does not fit in a page.
        #[arg(long)]
        granularity: Granularity,

        /// First day (YYYY-MM-DD).
        #[arg(long)]
        start: NaiveDate,

        /// Number of days from start. Defaults to every closed day up to yesterday.
        #[arg(long)]
        days: Option<u32>,

        /// Symbols to download. Defaults to the configured list or the universe.
        #[arg(long, num_args = 1..)]
        symbols: Vec<String>,

        /// Quote asset used to pick symbols from the universe.
        #[arg(long)]
        quote: Option<String>,

        /// Parallel symbol workers.
        #[arg(long)]
        workers: Option<usize>,

        /// Fetch again even when a window already has a final outcome.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Poll forever, ingesting recently closed days at every granularity boundary.
    Watch {
        #[arg(long)]
        granularity: Granularity,

        /// Closed days re-checked on every cycle.
        #[arg(long)]
        lookback_days: Option<u32>,

        #[arg(long, num_args = 1..)]
        symbols: Vec<String>,

        /// Stop after this many cycles.
        #[arg(long)]
        max_cycles: Option<usize>,
    },
    /// Completion journal commands.
    Journal {
        #[command(subcommand)]
        action: JournalAction,
    },
    /// Instrument universe commands.
    Universe {
        #[command(subcommand)]
        action: UniverseAction,
    },
    /// Export one stored series to Parquet.
    Export {
        #[arg(long)]
        symbol: String,

        #[arg(long)]
        granularity: Granularity,

        /// First day, inclusive (YYYY-MM-DD).
        #[arg(long)]
        start: NaiveDate,

        /// Last day, inclusive (YYYY-MM-DD).
        #[arg(long)]
        end: NaiveDate,

        /// Output Parquet file.
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum JournalAction {
    /// Report window counts per status.
    Status {
        /// Narrow the listing to one symbol.
        #[arg(long)]
        symbol: Option<String>,
    },
    /// Record every stored window as a success.
    Rebuild,
}

#[derive(Subcommand)]
enum UniverseAction {
    /// Download the instrument listing and save it.
    Refresh {
        /// Output file. Defaults to `ingest.exchange_info` or `exchange_info.json`.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Download {
            granularity,
            start,
            days,
            symbols,
            quote,
            workers,
            force,
        } => run_download(config, granularity, start, days, symbols, quote, workers, force),
        Commands::Watch {
            granularity,
            lookback_days,
            symbols,
            max_cycles,
        } => run_watch(config, granularity, lookback_days, symbols, max_cycles),
        Commands::Journal { action } => match action {
            JournalAction::Status { symbol } => run_journal_status(&config, symbol.as_deref()),
            JournalAction::Rebuild => run_journal_rebuild(&config),
        },
        Commands::Universe { action } => match action {
            UniverseAction::Refresh { out } => run_universe_refresh(&config, out),
        },
        Commands::Export {
            symbol,
            granularity,
            start,
            end,
            out,
        } => run_export(&config, &symbol, granularity, start, end, &out),
    }
}

fn load_config(path: Option<&Path>) -> Result<IngestConfig> {
    match path {
        Some(path) => IngestConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(IngestConfig::default()),
    }
}

fn fetcher(config: &IngestConfig) -> Result<Arc<BinanceFetcher>> {
    let circuit_breaker = Arc::new(CircuitBreaker::default_exchange());
    let fetcher = BinanceFetcher::new(&config.api, circuit_breaker)
        .context("building HTTP client")?;
    Ok(Arc::new(fetcher))
}

/// CLI symbols, then configured symbols, then the universe filtered by quote asset.
fn resolve_symbols(
    config: &IngestConfig,
    fetcher: &BinanceFetcher,
    cli_symbols: Vec<String>,
) -> Result<Vec<String>> {
    if !cli_symbols.is_empty() {
        return Ok(cli_symbols);
    }
    if let Some(symbols) = &config.ingest.symbols {
        return Ok(symbols.clone());
    }

    let universe = match &config.ingest.exchange_info {
        Some(path) => Universe::from_file(path)?,
        None => Universe::from_json(&fetcher.fetch_exchange_info()?)?,
    };
    let symbols = universe.symbols_with_quote(&config.ingest.quote_asset);
    if symbols.is_empty() {
        bail!(
            "no symbols quoted in {} in the universe",
            config.ingest.quote_asset
        );
    }
    tracing::info!(
        count = symbols.len(),
        quote = %config.ingest.quote_asset,
        "symbols selected from universe"
    );
    Ok(symbols)
}

fn engine(config: &IngestConfig, fetcher: Arc<BinanceFetcher>) -> IngestEngine {
    IngestEngine::new(
        fetcher,
        WindowStore::new(&config.storage.data_dir),
        &config.storage.journal_path,
    )
    .with_retry(config.ingest.retry_policy())
    .with_workers(config.ingest.workers)
    .ignore_exists(config.ingest.ignore_exists)
}

fn report(summary: &IngestSummary) {
    println!(
        "{} windows: {} persisted ({} unchanged), {} empty, {} skipped, {} unresolved, {} failed",
        summary.total,
        summary.persisted,
        summary.unchanged,
        summary.empty,
        summary.skipped,
        summary.unresolved,
        summary.failed,
    );
    for (window, err) in &summary.errors {
        tracing::warn!(window = %window, error = %err, "window left for the next run");
    }
}

#[allow(clippy::too_many_arguments)]
fn run_download(
    mut config: IngestConfig,
    granularity: Granularity,
    start: NaiveDate,
    days: Option<u32>,
    symbols: Vec<String>,
    quote: Option<String>,
    workers: Option<usize>,
    force: bool,
) -> Result<()> {
    if let Some(quote) = quote {
        config.ingest.quote_asset = quote;
    }
    if let Some(workers) = workers {
        config.ingest.workers = workers;
    }
    if force {
        config.ingest.ignore_exists = false;
    }
    config.validate()?;

    let today = Utc::now().date_naive();
    if start >= today {
        bail!("--start must be before today ({today}); the current day is not closed yet");
    }

    let fetcher = fetcher(&config)?;
    let symbols = resolve_symbols(&config, &fetcher, symbols)?;
    let run = IngestRun {
        granularity,
        start,
        days,
        symbols,
    };

    let summary = engine(&config, fetcher).run(&run, today)?;
    report(&summary);
    Ok(())
}

fn run_watch(
    mut config: IngestConfig,
    granularity: Granularity,
    lookback_days: Option<u32>,
    symbols: Vec<String>,
    max_cycles: Option<usize>,
) -> Result<()> {
    if let Some(days) = lookback_days {
        config.watch.lookback_days = days;
    }
    if config.watch.lookback_days == 0 {
        bail!("--lookback-days must be at least 1");
    }

    let fetcher = fetcher(&config)?;
    let symbols = resolve_symbols(&config, &fetcher, symbols)?;
    let engine = engine(&config, fetcher);

    let mut poller = Poller::new(
        granularity,
        Duration::from_secs(config.watch.poll_interval_secs),
        config.watch.lookback_days,
    );
    if let Some(cycles) = max_cycles {
        poller = poller.with_max_cycles(cycles);
    }

    poller.run(&engine, &symbols, |cycle, summary| {
        println!("cycle {cycle}:");
        report(summary);
    })?;
    Ok(())
}

fn run_journal_status(config: &IngestConfig, symbol: Option<&str>) -> Result<()> {
    let path = &config.storage.journal_path;
    if !path.exists() {
        println!("No journal at {}", path.display());
        return Ok(());
    }
    let journal = Journal::open(path)?;

    match symbol {
        None => {
            let counts = journal.status_counts()?;
            println!("Journal: {}", path.display());
            println!("Windows: {}", journal.count()?);
            println!("  success: {}", counts.success);
            println!("  empty:   {}", counts.empty);
            println!("  failed:  {}", counts.failed);
        }
        Some(symbol) => {
            let entries = journal.list(Some(symbol), None)?;
            if entries.is_empty() {
                println!("No windows recorded for {symbol}");
            }
            for entry in entries {
                let last = entry
                    .outcome
                    .last_record_timestamp
                    .map(|ts| ts.to_string())
                    .unwrap_or_else(|| "-".into());
                println!(
                    "  {:<28} {:<8} {:>14}  {}",
                    entry.window.key(),
                    entry.outcome.status,
                    last,
                    entry.outcome.recorded_at
                );
            }
        }
    }
    Ok(())
}

fn run_journal_rebuild(config: &IngestConfig) -> Result<()> {
    let store = WindowStore::new(&config.storage.data_dir);
    let journal = Journal::open(&config.storage.journal_path)?;
    let written = journal.rebuild_from_store(&store)?;
    println!(
        "Rebuilt {written} journal entries from {}",
        store.data_dir().display()
    );
    Ok(())
}

fn run_universe_refresh(config: &IngestConfig, out: Option<PathBuf>) -> Result<()> {
    let out = out
        .or_else(|| config.ingest.exchange_info.clone())
        .unwrap_or_else(|| PathBuf::from("exchange_info.json"));

    let fetcher = fetcher(config)?;
    let universe = Universe::from_json(&fetcher.fetch_exchange_info()?)?;
    universe.save(&out)?;
    println!(
        "Saved {} instruments ({} quoted in {}) to {}",
        universe.len(),
        universe.symbols_with_quote(&config.ingest.quote_asset).len(),
        config.ingest.quote_asset,
        out.display()
    );
    Ok(())
}

fn run_export(
    config: &IngestConfig,
    symbol: &str,
    granularity: Granularity,
    start: NaiveDate,
    end: NaiveDate,
    out: &Path,
) -> Result<()> {
    if start > end {
        bail!("--start must not be after --end");
    }
    let store = WindowStore::new(&config.storage.data_dir);
    let report = export_parquet(&store, symbol, granularity, start, end, out)?;
    println!(
        "Exported {} rows from {} windows to {}",
        report.rows,
        report.windows,
        out.display()
    );
    Ok(())
}
