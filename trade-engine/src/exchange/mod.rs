//! Exchange integration module
//!
//! Collaborator contracts the engine consumes from an exchange connector,
//! plus the order/account model and a simulated exchange for backtests.

pub mod account;
pub mod order;
pub mod paper;

pub use account::*;
pub use order::*;
pub use paper::*;

use crate::data::Candle;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

/// One live (or replayed) candle stream for a (pair, timeframe) key
///
/// The stream ends when `candles` closes. Errors are non fatal.
pub struct CandleStream {
    pub candles: mpsc::Receiver<Candle>,
    pub errors: mpsc::Receiver<EngineError>,
}

/// Market data side of an exchange
#[async_trait]
pub trait Feeder: Send + Sync {
    fn assets_info(&self, pair: &str) -> Result<AssetInfo>;

    async fn last_quote(&self, pair: &str) -> Result<f64>;

    async fn candles_by_period(
        &self,
        pair: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;

    /// Newest `limit` complete candles, oldest first
    async fn candles_by_limit(&self, pair: &str, timeframe: &str, limit: usize)
        -> Result<Vec<Candle>>;

    async fn candles_subscription(&self, pair: &str, timeframe: &str) -> Result<CandleStream>;
}

/// Order side of an exchange; also the contract strategies trade through
#[async_trait]
pub trait Broker: Send + Sync {
    async fn account(&self) -> Result<Account>;

    /// Free + locked (asset, quote) balances for a pair
    async fn position(&self, pair: &str) -> Result<(f64, f64)>;

    async fn order(&self, pair: &str, exchange_id: &str) -> Result<Order>;

    /// Take-profit limit leg at `price` plus a stop-limit leg triggered at
    /// `stop` with limit `stop_limit`, linked by a group id
    async fn create_order_oco(
        &self,
        side: OrderSide,
        pair: &str,
        size: f64,
        price: f64,
        stop: f64,
        stop_limit: f64,
    ) -> Result<Vec<Order>>;

    async fn create_order_limit(
        &self,
        side: OrderSide,
        pair: &str,
        size: f64,
        limit: f64,
    ) -> Result<Order>;

    async fn create_order_market(&self, side: OrderSide, pair: &str, size: f64) -> Result<Order>;

    /// Market order sized in quote currency
    async fn create_order_market_quote(
        &self,
        side: OrderSide,
        pair: &str,
        quote: f64,
    ) -> Result<Order>;

    async fn create_order_stop(
        &self,
        side: OrderSide,
        pair: &str,
        size: f64,
        stop: f64,
    ) -> Result<Order>;

    async fn cancel(&self, order: &Order) -> Result<()>;
}

/// A complete exchange connector
pub trait Exchange: Broker + Feeder {}

impl<T: Broker + Feeder + ?Sized> Exchange for T {}
