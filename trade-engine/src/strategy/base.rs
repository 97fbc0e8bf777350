//! Strategy contract

use crate::data::Dataframe;
use crate::exchange::Broker;
use async_trait::async_trait;
use std::sync::Arc;

/// Base trait for all trading strategies
///
/// Strategies receive a trailing window of at least `warmup_period` rows.
/// Errors inside callbacks are the strategy's own concern.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Get strategy name
    fn name(&self) -> &str;

    /// Candle timeframe the strategy trades, e.g. "1h"
    fn timeframe(&self) -> &str;

    /// Rows required before the strategy is invoked
    fn warmup_period(&self) -> usize;

    /// Receive the whole retained window instead of the warm-up tail
    fn full_history(&self) -> bool {
        false
    }

    /// Compute indicator series into `df.metadata`
    fn indicators(&self, df: &mut Dataframe);

    /// Decide on a complete candle
    async fn on_candle(&self, df: &Dataframe, broker: &dyn Broker);
}

/// Strategy that also reacts to in-progress candles
#[async_trait]
pub trait HighFrequencyStrategy: Strategy {
    async fn on_partial_candle(&self, df: &Dataframe, broker: &dyn Broker);
}

/// A strategy tagged with its capabilities at registration
#[derive(Clone)]
pub enum StrategyKind {
    Standard(Arc<dyn Strategy>),
    HighFrequency(Arc<dyn HighFrequencyStrategy>),
}

impl StrategyKind {
    pub fn standard(strategy: impl Strategy + 'static) -> Self {
        Self::Standard(Arc::new(strategy))
    }

    pub fn high_frequency(strategy: impl HighFrequencyStrategy + 'static) -> Self {
        Self::HighFrequency(Arc::new(strategy))
    }

    pub fn supports_partial(&self) -> bool {
        matches!(self, Self::HighFrequency(_))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Standard(s) => s.name(),
            Self::HighFrequency(s) => s.name(),
        }
    }

    pub fn timeframe(&self) -> &str {
        match self {
            Self::Standard(s) => s.timeframe(),
            Self::HighFrequency(s) => s.timeframe(),
        }
    }

    pub fn warmup_period(&self) -> usize {
        match self {
            Self::Standard(s) => s.warmup_period(),
            Self::HighFrequency(s) => s.warmup_period(),
        }
    }

    pub fn full_history(&self) -> bool {
        match self {
            Self::Standard(s) => s.full_history(),
            Self::HighFrequency(s) => s.full_history(),
        }
    }

    pub fn indicators(&self, df: &mut Dataframe) {
        match self {
            Self::Standard(s) => s.indicators(df),
            Self::HighFrequency(s) => s.indicators(df),
        }
    }

    pub async fn on_candle(&self, df: &Dataframe, broker: &dyn Broker) {
        match self {
            Self::Standard(s) => s.on_candle(df, broker).await,
            Self::HighFrequency(s) => s.on_candle(df, broker).await,
        }
    }

    /// Partial-candle callback; no-op for standard strategies
    pub async fn on_partial_candle(&self, df: &Dataframe, broker: &dyn Broker) {
        if let Self::HighFrequency(s) = self {
            s.on_partial_candle(df, broker).await;
        }
    }
}
