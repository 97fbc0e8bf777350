//! Realized trade results and per-pair performance statistics

use crate::order::PositionSide;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Realized outcome of closing (part of) a position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeResult {
    pub pair: String,
    /// Side of the position that was closed
    pub side: PositionSide,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub profit_value: f64,
    /// Profit relative to the entry value of the closed quantity (0.10 is 10%)
    pub profit_percent: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

impl TradeResult {
    pub fn duration(&self) -> Duration {
        self.closed_at - self.opened_at
    }
}

/// Win/loss ledger of one pair
///
/// Results with a non-negative profit count as wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeSummary {
    pub pair: String,
    pub win_long: Vec<f64>,
    pub win_long_percent: Vec<f64>,
    pub win_short: Vec<f64>,
    pub win_short_percent: Vec<f64>,
    pub lose_long: Vec<f64>,
    pub lose_long_percent: Vec<f64>,
    pub lose_short: Vec<f64>,
    pub lose_short_percent: Vec<f64>,
    /// Traded notional, summed over every fill
    pub volume: f64,
}

fn sum(values: &[f64]) -> f64 {
    values.iter().sum()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    sum(values) / values.len() as f64
}

impl TradeSummary {
    pub fn new(pair: impl Into<String>) -> Self {
        Self {
            pair: pair.into(),
            ..Self::default()
        }
    }

    /// Record a realized result
    pub fn add(&mut self, result: &TradeResult) {
        let (values, percents) = match (result.profit_value >= 0.0, result.side) {
            (true, PositionSide::Long) => (&mut self.win_long, &mut self.win_long_percent),
            (true, PositionSide::Short) => (&mut self.win_short, &mut self.win_short_percent),
            (false, PositionSide::Long) => (&mut self.lose_long, &mut self.lose_long_percent),
            (false, PositionSide::Short) => (&mut self.lose_short, &mut self.lose_short_percent),
        };
        values.push(result.profit_value);
        percents.push(result.profit_percent);
    }

    /// Add the notional of a fill
    pub fn add_volume(&mut self, price: f64, quantity: f64) {
        self.volume += price * quantity;
    }

    /// Winning profit values, longs first
    pub fn win(&self) -> Vec<f64> {
        [self.win_long.as_slice(), self.win_short.as_slice()].concat()
    }

    /// Losing profit values, longs first
    pub fn lose(&self) -> Vec<f64> {
        [self.lose_long.as_slice(), self.lose_short.as_slice()].concat()
    }

    pub fn trades(&self) -> usize {
        self.win_long.len() + self.win_short.len() + self.lose_long.len() + self.lose_short.len()
    }

    /// Net realized profit
    pub fn profit(&self) -> f64 {
        sum(&self.win()) + sum(&self.lose())
    }

    /// Share of winning trades, in percent
    pub fn win_percentage(&self) -> f64 {
        let trades = self.trades();
        if trades == 0 {
            return 0.0;
        }
        self.win().len() as f64 / trades as f64 * 100.0
    }

    /// Average win over average loss
    pub fn payoff_ratio(&self) -> f64 {
        let avg_loss = mean(&self.lose()).abs();
        if avg_loss == 0.0 {
            return 0.0;
        }
        mean(&self.win()) / avg_loss
    }

    /// Gross profit over gross loss
    pub fn profit_factor(&self) -> f64 {
        let gross_loss = sum(&self.lose()).abs();
        if gross_loss == 0.0 {
            return 0.0;
        }
        sum(&self.win()) / gross_loss
    }

    /// System quality number: sqrt(n) * mean / stddev of trade profits
    pub fn sqn(&self) -> f64 {
        let profits = [self.win(), self.lose()].concat();
        if profits.len() < 2 {
            return 0.0;
        }
        let avg = mean(&profits);
        let variance =
            profits.iter().map(|p| (p - avg).powi(2)).sum::<f64>() / (profits.len() - 1) as f64;
        let stddev = variance.sqrt();
        if stddev == 0.0 {
            return 0.0;
        }
        (profits.len() as f64).sqrt() * avg / stddev
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(side: PositionSide, profit_value: f64) -> TradeResult {
        let now = Utc::now();
        TradeResult {
            pair: "BTCUSDT".to_string(),
            side,
            quantity: 1.0,
            entry_price: 100.0,
            exit_price: 100.0 + profit_value,
            profit_value,
            profit_percent: profit_value / 100.0,
            opened_at: now - Duration::hours(2),
            closed_at: now,
        }
    }

    #[test]
    fn test_results_land_in_side_buckets() {
        let mut summary = TradeSummary::new("BTCUSDT");
        summary.add(&result(PositionSide::Long, 10.0));
        summary.add(&result(PositionSide::Short, 4.0));
        summary.add(&result(PositionSide::Long, -5.0));
        summary.add(&result(PositionSide::Short, -1.0));

        assert_eq!(summary.win_long, vec![10.0]);
        assert_eq!(summary.win_short_percent, vec![0.04]);
        assert_eq!(summary.lose_long, vec![-5.0]);
        assert_eq!(summary.lose_short, vec![-1.0]);
        assert_eq!(summary.trades(), 4);
        assert!((summary.profit() - 8.0).abs() < 1e-9);
        assert!((summary.win_percentage() - 50.0).abs() < 1e-9);
        assert!((summary.payoff_ratio() - 7.0 / 3.0).abs() < 1e-9);
        assert!((summary.profit_factor() - 14.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_summary_statistics() {
        let summary = TradeSummary::new("ETHUSDT");
        assert_eq!(summary.profit(), 0.0);
        assert_eq!(summary.win_percentage(), 0.0);
        assert_eq!(summary.payoff_ratio(), 0.0);
        assert_eq!(summary.profit_factor(), 0.0);
        assert_eq!(summary.sqn(), 0.0);
    }

    #[test]
    fn test_sqn_sign_follows_expectancy() {
        let mut summary = TradeSummary::new("BTCUSDT");
        for profit in [10.0, 12.0, -4.0, 8.0] {
            summary.add(&result(PositionSide::Long, profit));
        }
        assert!(summary.sqn() > 0.0);
        assert_eq!(result(PositionSide::Long, 1.0).duration(), Duration::hours(2));
    }
}
