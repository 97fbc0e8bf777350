//! Example: EMA crossover backtest over synthetic candles

use anyhow::Context;
use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;
use trade_engine::prelude::*;

fn create_test_candles(pair: &str, count: usize, base_price: f64) -> Vec<Candle> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut previous = base_price;
    (0..count)
        .map(|i| {
            // Slow wave plus a short ripple, so crossovers happen in both directions
            let x = i as f64;
            let close = base_price * (1.0 + 0.08 * (x / 40.0).sin() + 0.01 * (x / 3.0).sin());
            let open = previous;
            previous = close;
            Candle::new(
                pair,
                "1h",
                start + Duration::hours(i as i64),
                open,
                open.max(close) * 1.002,
                open.min(close) * 0.998,
                close,
                1000.0,
            )
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(false);

    println!("=== Trade-Engine Backtest Example ===\n");
    let feed = Arc::new(HistoricalFeed::new());
    feed.add_candles(create_test_candles("BTCUSDT", 500, 40_000.0));
    feed.add_candles(create_test_candles("ETHUSDT", 500, 2_500.0));
    println!("Loaded {} candles", feed.len());

    let wallet = Arc::new(PaperWallet::new("USDT", 10_000.0, feed));
    let config = EngineConfig::new(vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]);
    let engine = Engine::builder(config, wallet.clone(), StrategyKind::standard(EmaCross::default()))
        .with_paper_wallet(wallet)
        .with_notifier(Arc::new(LogNotifier))
        .backtest(true)
        .build()
        .context("failed to build engine")?;

    engine.run().await.context("backtest failed")?;
    println!("{}", engine.report().await);
    Ok(())
}
