//! EMA crossover strategy

use crate::data::Dataframe;
use crate::exchange::{Broker, OrderSide};
use crate::strategy::Strategy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ta::indicators::ExponentialMovingAverage;
use ta::Next;
use tracing::{debug, info, warn};

/// EMA crossover configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmaCrossConfig {
    pub timeframe: String,
    pub fast_period: usize,
    pub slow_period: usize,
    /// Quote amount spent on each entry
    pub order_quote: f64,
}

impl Default for EmaCrossConfig {
    fn default() -> Self {
        Self {
            timeframe: "1h".to_string(),
            fast_period: 8,
            slow_period: 21,
            order_quote: 100.0,
        }
    }
}

/// Buys when the fast EMA crosses above the slow one, sells the whole
/// position when it crosses back below
pub struct EmaCross {
    config: EmaCrossConfig,
}

pub const EMA_FAST: &str = "ema_fast";
pub const EMA_SLOW: &str = "ema_slow";

fn ema(values: &[f64], period: usize) -> Vec<f64> {
    match ExponentialMovingAverage::new(period) {
        Ok(mut indicator) => values.iter().map(|v| indicator.next(*v)).collect(),
        Err(_) => vec![f64::NAN; values.len()],
    }
}

impl EmaCross {
    pub fn new(config: EmaCrossConfig) -> Self {
        Self { config }
    }

    fn crossed(df: &Dataframe) -> Option<OrderSide> {
        let fast = df.metadata.get(EMA_FAST)?;
        let slow = df.metadata.get(EMA_SLOW)?;
        let n = fast.len();
        if n < 2 {
            return None;
        }
        let (prev_fast, prev_slow) = (fast[n - 2], slow[n - 2]);
        let (last_fast, last_slow) = (fast[n - 1], slow[n - 1]);
        if prev_fast <= prev_slow && last_fast > last_slow {
            Some(OrderSide::Buy)
        } else if prev_fast >= prev_slow && last_fast < last_slow {
            Some(OrderSide::Sell)
        } else {
            None
        }
    }
}

impl Default for EmaCross {
    fn default() -> Self {
        Self::new(EmaCrossConfig::default())
    }
}

#[async_trait]
impl Strategy for EmaCross {
    fn name(&self) -> &str {
        "EMA Cross"
    }

    fn timeframe(&self) -> &str {
        &self.config.timeframe
    }

    fn warmup_period(&self) -> usize {
        self.config.slow_period + 1
    }

    fn indicators(&self, df: &mut Dataframe) {
        let fast = ema(&df.close, self.config.fast_period);
        let slow = ema(&df.close, self.config.slow_period);
        df.metadata.insert(EMA_FAST.to_string(), fast);
        df.metadata.insert(EMA_SLOW.to_string(), slow);
    }

    async fn on_candle(&self, df: &Dataframe, broker: &dyn Broker) {
        let Some(side) = Self::crossed(df) else {
            return;
        };
        let (asset, quote) = match broker.position(&df.pair).await {
            Ok(balances) => balances,
            Err(e) => {
                warn!(pair = %df.pair, "position lookup failed: {}", e);
                return;
            }
        };
        let price = df.last_close().unwrap_or_default();
        debug!(pair = %df.pair, ?side, asset, quote, price, "ema cross");

        let result = match side {
            OrderSide::Buy if quote >= self.config.order_quote && asset * price < 1.0 => {
                info!("[{}] {} fast EMA crossed above slow, buying", self.name(), df.pair);
                broker
                    .create_order_market_quote(OrderSide::Buy, &df.pair, self.config.order_quote)
                    .await
            }
            OrderSide::Sell if asset > 0.0 => {
                info!("[{}] {} fast EMA crossed below slow, selling", self.name(), df.pair);
                broker.create_order_market(OrderSide::Sell, &df.pair, asset).await
            }
            _ => return,
        };
        if let Err(e) = result {
            warn!(pair = %df.pair, "order rejected: {}", e);
        }
    }
}
