//! Criterion benchmarks for ingestion hot paths.
//!
//! Benchmarks:
//! 1. Series assembly (in-order appends and unsorted batch extends)
//! 2. Journal upserts (first writes and no-op rewrites)
//! 3. Window persistence (CSV encode + hash compare)

use chrono::{Duration, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use klinevault_core::data::{dedup_by_open_time, Journal, WindowStore};
use klinevault_core::domain::{Bar, Granularity, WindowId, WindowStatus};
use klinevault_core::series::BarSeries;
use rust_decimal::Decimal;

// ── Helpers ──────────────────────────────────────────────────────────

fn make_bars(n: usize, granularity: Granularity) -> Vec<Bar> {
    let t0 = 1_704_067_200_000_i64;
    let step = granularity.duration_ms();
    (0..n as i64)
        .map(|i| {
            let close = Decimal::new(42_000_00 + (i % 97) * 13, 2);
            Bar {
                open_time: t0 + i * step,
                open: close,
                high: close + Decimal::ONE,
                low: close - Decimal::ONE,
                close,
                volume: Decimal::new(12_345, 3),
                close_time: t0 + (i + 1) * step - 1,
                quote_volume: Decimal::new(518_490_000, 2),
                trade_count: 100 + i,
                taker_buy_volume: Decimal::new(6_172, 3),
                taker_buy_quote_volume: Decimal::new(259_245_000, 2),
            }
        })
        .collect()
}

// ── 1. Series assembly ───────────────────────────────────────────────

fn bench_series(c: &mut Criterion) {
    let mut group = c.benchmark_group("series");
    for n in [24_usize, 720, 8_760] {
        let bars = make_bars(n, Granularity::Hour1);
        let mut reversed = bars.clone();
        reversed.reverse();

        group.bench_with_input(BenchmarkId::new("append", n), &bars, |b, bars| {
            b.iter(|| {
                let mut series = BarSeries::new("BTCUSDT", Granularity::Hour1);
                for bar in bars {
                    series.append(bar.clone()).unwrap();
                }
                black_box(series.len())
            })
        });

        group.bench_with_input(BenchmarkId::new("extend_unsorted", n), &reversed, |b, bars| {
            b.iter(|| {
                let mut series = BarSeries::new("BTCUSDT", Granularity::Hour1);
                series.extend(bars.iter().cloned()).unwrap();
                black_box(series.len())
            })
        });
    }
    group.finish();
}

// ── 2. Journal upserts ───────────────────────────────────────────────

fn bench_journal(c: &mut Criterion) {
    let base = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
    let windows: Vec<WindowId> = (0..365)
        .map(|i| WindowId::new("BTCUSDT", Granularity::Hour1, base + Duration::days(i)))
        .collect();

    c.bench_function("journal/upsert_year", |b| {
        b.iter(|| {
            let journal = Journal::open_in_memory().unwrap();
            for (i, w) in windows.iter().enumerate() {
                journal
                    .upsert(w, WindowStatus::Success, Some(i as i64))
                    .unwrap();
            }
            black_box(journal.count().unwrap())
        })
    });

    let journal = Journal::open_in_memory().unwrap();
    for (i, w) in windows.iter().enumerate() {
        journal.upsert(w, WindowStatus::Success, Some(i as i64)).unwrap();
    }
    c.bench_function("journal/noop_upsert_year", |b| {
        b.iter(|| {
            for (i, w) in windows.iter().enumerate() {
                black_box(
                    journal
                        .upsert(w, WindowStatus::Success, Some(i as i64))
                        .unwrap(),
                );
            }
        })
    });

    c.bench_function("journal/find_latest_empty", |b| {
        b.iter(|| {
            black_box(
                journal
                    .find_latest_empty_date("BTCUSDT", Granularity::Hour1)
                    .unwrap(),
            )
        })
    });
}

// ── 3. Window persistence ────────────────────────────────────────────

fn bench_store(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = WindowStore::new(dir.path());
    let window = WindowId::new(
        "BTCUSDT",
        Granularity::Minute5,
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
    );
    let bars = make_bars(288, Granularity::Minute5);
    store.write(&window, &bars).unwrap();

    c.bench_function("store/unchanged_rewrite_288", |b| {
        b.iter(|| black_box(store.write(&window, &bars).unwrap()))
    });

    let mut overlapping = bars.clone();
    overlapping.extend_from_slice(&bars[100..150]);
    c.bench_function("store/dedup_338", |b| {
        b.iter(|| black_box(dedup_by_open_time(&overlapping).len()))
    });
}

criterion_group!(benches, bench_series, bench_journal, bench_store);
criterion_main!(benches);
