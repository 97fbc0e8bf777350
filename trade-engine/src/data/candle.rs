//! OHLCV candle data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// OHLCV candle data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Pair (e.g., "BTCUSDT")
    pub pair: String,
    /// Timeframe (e.g., "5m", "1h", "1d")
    pub timeframe: String,
    /// Opening price
    pub open: f64,
    /// High price
    pub high: f64,
    /// Low price
    pub low: f64,
    /// Closing price
    pub close: f64,
    /// Volume
    pub volume: f64,
    /// Period open time
    pub time: DateTime<Utc>,
    /// Time of the last revision of this candle
    pub updated_at: DateTime<Utc>,
    /// True once the period has closed
    pub complete: bool,
    /// Auxiliary numeric fields supplied by the data source
    #[serde(default)]
    pub metadata: HashMap<String, f64>,
}

impl Candle {
    /// Create a new complete candle with `updated_at` equal to `time`
    ///
    /// A complete revision of a candle that was streamed in progress must
    /// carry its own update time (see [`completed_at`](Self::completed_at)),
    /// otherwise it orders before its partial revisions.
    pub fn new(
        pair: impl Into<String>,
        timeframe: impl Into<String>,
        time: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            pair: pair.into(),
            timeframe: timeframe.into(),
            open,
            high,
            low,
            close,
            volume,
            time,
            updated_at: time,
            complete: true,
            metadata: HashMap::new(),
        }
    }

    /// Mark the candle as an in-progress revision updated at `updated_at`
    pub fn partial(mut self, updated_at: DateTime<Utc>) -> Self {
        self.complete = false;
        self.updated_at = updated_at;
        self
    }

    /// Mark the candle as the closing revision updated at `updated_at`
    pub fn completed_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.complete = true;
        self.updated_at = updated_at;
        self
    }

    /// Attach an auxiliary field
    pub fn with_metadata(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Get typical price (HLC/3)
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// Get median price (HL/2)
    pub fn median_price(&self) -> f64 {
        (self.high + self.low) / 2.0
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// Get body size (absolute difference between open and close)
    pub fn body_size(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    /// Get total range (high - low)
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Columnar rolling window of candles for one pair
///
/// All columns, including every metadata series, always have the same
/// length. Metadata keys missing from a row are padded with `NaN`.
#[derive(Debug, Clone, Default)]
pub struct Dataframe {
    pub pair: String,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
    pub time: Vec<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, Vec<f64>>,
}

impl Dataframe {
    /// Create new empty dataframe
    pub fn new(pair: impl Into<String>) -> Self {
        Self {
            pair: pair.into(),
            ..Default::default()
        }
    }

    /// Get number of rows
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Time of the newest row
    pub fn last_time(&self) -> Option<DateTime<Utc>> {
        self.time.last().copied()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.close.last().copied()
    }

    /// Latest value of a metadata series
    pub fn last_metadata(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(|s| s.last().copied())
    }

    /// Append a candle as a new row
    pub fn push(&mut self, candle: &Candle) {
        let row = self.len();
        self.open.push(candle.open);
        self.high.push(candle.high);
        self.low.push(candle.low);
        self.close.push(candle.close);
        self.volume.push(candle.volume);
        self.time.push(candle.time);
        self.last_update = Some(candle.updated_at);

        for (key, series) in self.metadata.iter_mut() {
            series.push(candle.metadata.get(key).copied().unwrap_or(f64::NAN));
        }
        for (key, value) in &candle.metadata {
            if !self.metadata.contains_key(key) {
                let mut series = vec![f64::NAN; row];
                series.push(*value);
                self.metadata.insert(key.clone(), series);
            }
        }
    }

    /// Overwrite the newest row with a revision of the same period
    ///
    /// Returns false (and changes nothing) when the dataframe is empty.
    pub fn replace_last(&mut self, candle: &Candle) -> bool {
        let Some(last) = self.len().checked_sub(1) else {
            return false;
        };
        self.open[last] = candle.open;
        self.high[last] = candle.high;
        self.low[last] = candle.low;
        self.close[last] = candle.close;
        self.volume[last] = candle.volume;
        self.time[last] = candle.time;
        self.last_update = Some(candle.updated_at);

        for (key, value) in &candle.metadata {
            match self.metadata.get_mut(key) {
                Some(series) => series[last] = *value,
                None => {
                    let mut series = vec![f64::NAN; last];
                    series.push(*value);
                    self.metadata.insert(key.clone(), series);
                }
            }
        }
        true
    }

    /// Drop the oldest rows so that at most `max` remain
    pub fn truncate_front(&mut self, max: usize) {
        let excess = self.len().saturating_sub(max);
        if excess == 0 {
            return;
        }
        self.open.drain(..excess);
        self.high.drain(..excess);
        self.low.drain(..excess);
        self.close.drain(..excess);
        self.volume.drain(..excess);
        self.time.drain(..excess);
        for series in self.metadata.values_mut() {
            series.drain(..excess);
        }
    }

    /// Copy of the trailing `n` rows (all rows when fewer exist)
    pub fn sample(&self, n: usize) -> Dataframe {
        let start = self.len().saturating_sub(n);
        Dataframe {
            pair: self.pair.clone(),
            open: self.open[start..].to_vec(),
            high: self.high[start..].to_vec(),
            low: self.low[start..].to_vec(),
            close: self.close[start..].to_vec(),
            volume: self.volume[start..].to_vec(),
            time: self.time[start..].to_vec(),
            last_update: self.last_update,
            metadata: self
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), v[start..].to_vec()))
                .collect(),
        }
    }
}
