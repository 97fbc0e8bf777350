//! Account balances and asset metadata

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Balance of a single asset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    /// Available for new orders
    pub free: f64,
    /// Reserved by open orders
    pub lock: f64,
}

impl Balance {
    pub fn new(asset: impl Into<String>, free: f64) -> Self {
        Self {
            asset: asset.into(),
            free,
            lock: 0.0,
        }
    }

    pub fn total(&self) -> f64 {
        self.free + self.lock
    }

    /// Check if can afford amount
    pub fn can_afford(&self, amount: f64) -> bool {
        self.free >= amount
    }
}

/// Exchange account snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Account {
    pub balances: Vec<Balance>,
}

impl Account {
    pub fn new(balances: Vec<Balance>) -> Self {
        Self { balances }
    }

    /// Balances of the two assets of a pair; missing assets are zero
    pub fn balance(&self, base: &str, quote: &str) -> (Balance, Balance) {
        let find = |asset: &str| {
            self.balances
                .iter()
                .find(|b| b.asset.eq_ignore_ascii_case(asset))
                .cloned()
                .unwrap_or_else(|| Balance::new(asset, 0.0))
        };
        (find(base), find(quote))
    }

    /// Account value in `quote`, pricing every other asset with `prices`
    /// keyed by asset name. Unpriced assets are ignored.
    pub fn equity(&self, quote: &str, prices: &HashMap<String, f64>) -> f64 {
        self.balances
            .iter()
            .map(|b| {
                if b.asset.eq_ignore_ascii_case(quote) {
                    b.total()
                } else {
                    prices.get(&b.asset).map(|p| p * b.total()).unwrap_or(0.0)
                }
            })
            .sum()
    }
}

/// Trading rules for a pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub base_asset: String,
    pub quote_asset: String,
    pub min_quantity: f64,
    pub max_quantity: f64,
    pub step_size: f64,
    pub tick_size: f64,
}

impl AssetInfo {
    /// Permissive rules for simulated markets
    pub fn unrestricted(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base_asset: base.into(),
            quote_asset: quote.into(),
            min_quantity: 0.0,
            max_quantity: f64::MAX,
            step_size: 0.0,
            tick_size: 0.0,
        }
    }
}

const KNOWN_QUOTES: [&str; 8] = ["USDT", "BUSD", "USDC", "BTC", "ETH", "BNB", "EUR", "USD"];

/// Split a pair into (base, quote), e.g. "BTCUSDT" or "BTC/USDT" -> ("BTC", "USDT")
pub fn split_pair(pair: &str) -> Result<(String, String)> {
    let upper = pair.trim().to_uppercase();

    if let Some((base, quote)) = upper.split_once('/') {
        if !base.is_empty() && !quote.is_empty() && !quote.contains('/') {
            return Ok((base.to_string(), quote.to_string()));
        }
        return Err(EngineError::InvalidPair(pair.to_string()));
    }

    KNOWN_QUOTES
        .iter()
        .find(|quote| upper.len() > quote.len() && upper.ends_with(*quote))
        .map(|quote| {
            let base = &upper[..upper.len() - quote.len()];
            (base.to_string(), quote.to_string())
        })
        .ok_or_else(|| EngineError::InvalidPair(pair.to_string()))
}
