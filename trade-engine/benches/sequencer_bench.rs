//! Candle sequencer throughput

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use trade_engine::data::Candle;
use trade_engine::sequencer::CandleSequencer;

const PAIRS: [&str; 4] = ["BTCUSDT", "ETHUSDT", "BNBUSDT", "SOLUSDT"];

/// Interleaved per-pair series, as several feeds would push them
fn candles(per_pair: usize) -> Vec<Candle> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut candles = Vec::with_capacity(per_pair * PAIRS.len());
    for (p, pair) in PAIRS.iter().enumerate() {
        for i in 0..per_pair {
            let price = 100.0 + (i % 17) as f64 + p as f64;
            let time = start + Duration::minutes(i as i64 * 5 + p as i64);
            candles.push(Candle::new(*pair, "5m", time, price, price + 1.0, price - 1.0, price, 1.0));
        }
    }
    candles
}

fn bench_sequencer(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequencer");
    let input = candles(2_500);

    group.bench_function("push_10k", |b| {
        b.iter_batched(
            || input.clone(),
            |candles| {
                let sequencer = CandleSequencer::new();
                for candle in candles {
                    sequencer.push(candle);
                }
                black_box(sequencer.len())
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("push_pop_10k", |b| {
        b.iter_batched(
            || input.clone(),
            |candles| {
                let sequencer = CandleSequencer::new();
                for candle in candles {
                    sequencer.push(candle);
                }
                while let Some(candle) = sequencer.pop() {
                    black_box(candle);
                }
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_sequencer);
criterion_main!(benches);
