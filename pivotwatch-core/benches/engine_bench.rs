//! Criterion benchmarks for pivotwatch hot paths.
//!
//! Benchmarks:
//! 1. Pivot computation
//! 2. Engine ingest over a day of one-minute samples

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rust_decimal::Decimal;

use pivotwatch_core::domain::{PriceSample, SessionKind, SessionOhlc};
use pivotwatch_core::{pivot, Engine, EngineConfig};

// ── Helpers ──────────────────────────────────────────────────────────

fn ohlc() -> SessionOhlc {
    SessionOhlc::new(Decimal::new(2050, 0), Decimal::new(2020, 0), Decimal::new(2040, 0))
}

fn day_of_samples() -> Vec<PriceSample> {
    let start = Utc.with_ymd_and_hms(2024, 3, 6, 0, 0, 0).unwrap();
    (0..1440)
        .map(|i| {
            let wave = Decimal::from((i * 13) % 41) - Decimal::from(20);
            PriceSample::new(start + Duration::minutes(i), Decimal::new(2045, 0) + wave)
        })
        .collect()
}

fn bench_pivot(c: &mut Criterion) {
    let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
    let at = Utc.with_ymd_and_hms(2024, 3, 5, 23, 3, 0).unwrap();
    c.bench_function("pivot_compute", |b| {
        b.iter(|| pivot::compute(SessionKind::Classic, date, black_box(&ohlc()), at))
    });
}

fn bench_ingest(c: &mut Criterion) {
    let samples = day_of_samples();
    let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
    c.bench_function("engine_ingest_day", |b| {
        b.iter(|| {
            let mut engine = Engine::new(EngineConfig::default());
            let now = samples[0].timestamp;
            let _ = engine.seed_classic(date, &ohlc(), now);
            let mut events = 0usize;
            for sample in &samples {
                events += engine.ingest(black_box(sample)).len();
            }
            events
        })
    });
}

criterion_group!(benches, bench_pivot, bench_ingest);
criterion_main!(benches);
