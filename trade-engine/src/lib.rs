//! Trade-Engine: event ordering and order lifecycle for candle-driven strategies
//!
//! This crate merges per-pair candle streams into one deterministic,
//! time-ordered sequence, feeds it to a pluggable strategy, and tracks every
//! order the strategy places, behaving the same live and in backtests.
//!
//! # Features
//!
//! - **Candle Sequencer**: time-ordered queue with bulk and blocking drains
//! - **Market Data Multiplexer**: per (pair, timeframe) candle fan-out
//! - **Strategy Dispatch**: rolling windows, warm-up, partial candles
//! - **Order Lifecycle**: creation, reconciliation, positions, trade statistics
//! - **Paper Wallet**: simulated exchange for backtests
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use trade_engine::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> trade_engine::Result<()> {
//!     let feed = Arc::new(HistoricalFeed::new());
//!     let wallet = Arc::new(PaperWallet::new("USDT", 10_000.0, feed));
//!     let engine = Engine::builder(
//!         EngineConfig::new(vec!["BTCUSDT".to_string()]),
//!         wallet.clone(),
//!         StrategyKind::standard(EmaCross::default()),
//!     )
//!     .with_paper_wallet(wallet)
//!     .backtest(true)
//!     .build()?;
//!     engine.run().await?;
//!     println!("{}", engine.report().await);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod notification;
pub mod order;
pub mod sequencer;
pub mod storage;
pub mod strategy;
pub mod telemetry;

// Re-export commonly used types
pub mod prelude {
    pub use crate::config::*;
    pub use crate::data::*;
    pub use crate::engine::*;
    pub use crate::error::{EngineError, Result};
    pub use crate::exchange::*;
    pub use crate::notification::*;
    pub use crate::order::*;
    pub use crate::sequencer::*;
    pub use crate::storage::*;
    pub use crate::strategy::*;
    pub use crate::telemetry::*;
}

pub use error::{EngineError, Result};
