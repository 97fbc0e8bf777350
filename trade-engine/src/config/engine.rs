//! Engine configuration

use crate::error::{EngineError, Result};
use crate::exchange::split_pair;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Who cancels the remaining leg of an OCO pair once one leg fills
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcoPolicy {
    /// The exchange cancels the sibling; reconciliation observes it
    #[default]
    ExchangeManaged,
    /// The order controller requests cancellation of open siblings
    CancelSiblings,
}

impl FromStr for OcoPolicy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "exchange_managed" | "exchange" => Ok(Self::ExchangeManaged),
            "cancel_siblings" | "cancel" => Ok(Self::CancelSiblings),
            other => Err(EngineError::Config(format!("unknown oco policy: {}", other))),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Traded pairs, e.g. "BTCUSDT"
    pub pairs: Vec<String>,
    /// Order reconciliation period in live mode
    pub reconcile_interval_ms: u64,
    /// Order events buffered per pair before publishes drop
    pub order_feed_buffer: usize,
    /// Rows kept in each rolling dataframe
    pub max_window: usize,
    /// Order storage backend name
    pub storage: String,
    pub oco_policy: OcoPolicy,
    /// Emit logs as JSON
    pub log_json: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pairs: Vec::new(),
            reconcile_interval_ms: 1000,
            order_feed_buffer: 100,
            max_window: 1000,
            storage: "memory".to_string(),
            oco_policy: OcoPolicy::default(),
            log_json: false,
        }
    }
}

fn env_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| EngineError::Config(format!("invalid value for {}: {}", name, value))),
        Err(_) => Ok(default),
    }
}

impl EngineConfig {
    pub fn new(pairs: Vec<String>) -> Self {
        Self {
            pairs,
            ..Self::default()
        }
    }

    /// Load from `ENGINE_*` environment variables, reading `.env` first
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        let pairs = std::env::var("ENGINE_PAIRS")
            .map(|list| {
                list.split(',')
                    .map(|p| p.trim().to_uppercase())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let oco_policy = match std::env::var("ENGINE_OCO_POLICY") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.oco_policy,
        };

        Ok(Self {
            pairs,
            reconcile_interval_ms: env_var(
                "ENGINE_RECONCILE_INTERVAL_MS",
                defaults.reconcile_interval_ms,
            )?,
            order_feed_buffer: env_var("ENGINE_ORDER_FEED_BUFFER", defaults.order_feed_buffer)?,
            max_window: env_var("ENGINE_MAX_WINDOW", defaults.max_window)?,
            storage: env_var("ENGINE_STORAGE", defaults.storage)?,
            oco_policy,
            log_json: env_var("ENGINE_LOG_JSON", defaults.log_json)?,
        })
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Startup checks
    pub fn validate(&self) -> Result<()> {
        if self.pairs.is_empty() {
            return Err(EngineError::Config("no pairs configured".to_string()));
        }
        for pair in &self.pairs {
            split_pair(pair)?;
        }
        if self.reconcile_interval_ms == 0 {
            return Err(EngineError::Config(
                "reconcile_interval_ms must be positive".to_string(),
            ));
        }
        if self.order_feed_buffer == 0 {
            return Err(EngineError::Config("order_feed_buffer must be positive".to_string()));
        }
        crate::storage::from_backend(&self.storage)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(matches!(
            EngineConfig::default().validate(),
            Err(EngineError::Config(_))
        ));

        let config = EngineConfig::new(vec!["BTCUSDT".to_string(), "ETH/BTC".to_string()]);
        assert!(config.validate().is_ok());

        let bad_pair = EngineConfig::new(vec!["NOPE".to_string()]);
        assert!(matches!(bad_pair.validate(), Err(EngineError::InvalidPair(_))));

        let bad_storage = EngineConfig {
            storage: "mongodb".to_string(),
            ..EngineConfig::new(vec!["BTCUSDT".to_string()])
        };
        assert!(matches!(bad_storage.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_json_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"pairs": ["BTCUSDT"], "oco_policy": "cancel_siblings"}"#)
                .unwrap();
        assert_eq!(config.pairs, vec!["BTCUSDT"]);
        assert_eq!(config.oco_policy, OcoPolicy::CancelSiblings);
        assert_eq!(config.reconcile_interval_ms, 1000);
        assert_eq!(config.storage, "memory");
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("ENGINE_PAIRS", "btcusdt, ethusdt");
        std::env::set_var("ENGINE_MAX_WINDOW", "250");
        std::env::set_var("ENGINE_OCO_POLICY", "cancel");
        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.pairs, vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(config.max_window, 250);
        assert_eq!(config.oco_policy, OcoPolicy::CancelSiblings);

        std::env::set_var("ENGINE_MAX_WINDOW", "lots");
        assert!(EngineConfig::from_env().is_err());

        for name in ["ENGINE_PAIRS", "ENGINE_MAX_WINDOW", "ENGINE_OCO_POLICY"] {
            std::env::remove_var(name);
        }
    }
}
