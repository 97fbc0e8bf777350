//! In-memory historical candle store, usable as a replay [`Feeder`]

use crate::data::Candle;
use crate::error::{EngineError, Result};
use crate::exchange::{split_pair, AssetInfo, CandleStream, Feeder};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

/// Candles stored by pair and timeframe, oldest first
///
/// As a [`Feeder`], every subscription replays the stored candles for its
/// key and then ends, which is what a backtest run expects.
#[derive(Debug, Default)]
pub struct HistoricalFeed {
    candles: RwLock<HashMap<String, Vec<Candle>>>,
}

impl HistoricalFeed {
    /// Create new storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Get storage key from pair and timeframe
    fn key(pair: &str, timeframe: &str) -> String {
        format!("{}:{}", pair, timeframe)
    }

    /// Add a candle, keeping each series sorted by time
    pub fn add_candle(&self, candle: Candle) {
        let key = Self::key(&candle.pair, &candle.timeframe);
        let mut candles = self.candles.write().unwrap_or_else(|p| p.into_inner());
        let series = candles.entry(key).or_default();
        let index = series.partition_point(|c| c.time <= candle.time);
        series.insert(index, candle);
    }

    /// Add multiple candles
    pub fn add_candles(&self, candles: Vec<Candle>) {
        for candle in candles {
            self.add_candle(candle);
        }
    }

    /// Get candles for pair and timeframe
    pub fn get_candles(&self, pair: &str, timeframe: &str) -> Vec<Candle> {
        self.candles
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&Self::key(pair, timeframe))
            .cloned()
            .unwrap_or_default()
    }

    /// Get number of stored candles
    pub fn len(&self) -> usize {
        self.candles
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn latest_close(&self, pair: &str) -> Option<f64> {
        let candles = self.candles.read().unwrap_or_else(|p| p.into_inner());
        candles
            .values()
            .filter_map(|series| series.last())
            .filter(|c| c.pair == pair)
            .max_by_key(|c| c.time)
            .map(|c| c.close)
    }
}

#[async_trait]
impl Feeder for HistoricalFeed {
    fn assets_info(&self, pair: &str) -> Result<AssetInfo> {
        let (base, quote) = split_pair(pair)?;
        Ok(AssetInfo::unrestricted(base, quote))
    }

    async fn last_quote(&self, pair: &str) -> Result<f64> {
        self.latest_close(pair)
            .ok_or_else(|| EngineError::Exchange(format!("no candles stored for {}", pair)))
    }

    async fn candles_by_period(
        &self,
        pair: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        Ok(self
            .get_candles(pair, timeframe)
            .into_iter()
            .filter(|c| c.time >= start && c.time <= end)
            .collect())
    }

    async fn candles_by_limit(
        &self,
        pair: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let complete: Vec<Candle> = self
            .get_candles(pair, timeframe)
            .into_iter()
            .filter(|c| c.complete)
            .collect();
        let start = complete.len().saturating_sub(limit);
        Ok(complete[start..].to_vec())
    }

    async fn candles_subscription(&self, pair: &str, timeframe: &str) -> Result<CandleStream> {
        let candles = self.get_candles(pair, timeframe);
        let (candle_tx, candle_rx) = mpsc::channel(1000);
        let (_error_tx, error_rx) = mpsc::channel(1);

        let key = Self::key(pair, timeframe);
        tokio::spawn(async move {
            let total = candles.len();
            for candle in candles {
                if candle_tx.send(candle).await.is_err() {
                    break;
                }
            }
            debug!("replayed {} candles for {}", total, key);
        });

        Ok(CandleStream {
            candles: candle_rx,
            errors: error_rx,
        })
    }
}
