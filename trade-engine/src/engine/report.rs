//! Run report generation

use crate::order::TradeSummary;
use serde::Serialize;
use std::fmt;

/// Wallet figures of a paper-traded run
#[derive(Debug, Clone, Serialize)]
pub struct WalletReport {
    pub quote_asset: String,
    pub initial_equity: f64,
    pub final_equity: f64,
    /// Fraction of peak equity
    pub max_drawdown: f64,
}

impl WalletReport {
    pub fn total_return(&self) -> f64 {
        self.final_equity - self.initial_equity
    }

    pub fn total_return_percent(&self) -> f64 {
        if self.initial_equity == 0.0 {
            return 0.0;
        }
        self.total_return() / self.initial_equity * 100.0
    }
}

/// Per-pair trade statistics plus optional wallet figures
#[derive(Debug, Clone, Serialize)]
pub struct EngineReport {
    summaries: Vec<TradeSummary>,
    wallet: Option<WalletReport>,
}

impl EngineReport {
    pub fn new(summaries: Vec<TradeSummary>, wallet: Option<WalletReport>) -> Self {
        Self { summaries, wallet }
    }

    pub fn summaries(&self) -> &[TradeSummary] {
        &self.summaries
    }

    pub fn wallet(&self) -> Option<&WalletReport> {
        self.wallet.as_ref()
    }

    pub fn trades(&self) -> usize {
        self.summaries.iter().map(TradeSummary::trades).sum()
    }

    pub fn profit(&self) -> f64 {
        self.summaries.iter().map(TradeSummary::profit).sum()
    }

    /// Format report as string
    pub fn format(&self) -> String {
        let mut out = String::from(
            "\nTrade Summary\n=============\n\
             PAIR          TRADES   WIN   LOSS   WIN%     PAYOFF   PROFIT FACTOR   SQN      PROFIT        VOLUME\n",
        );
        for s in &self.summaries {
            out.push_str(&format!(
                "{:<12}  {:>6}  {:>4}  {:>5}  {:>6.1}%  {:>7.3}  {:>14.3}  {:>6.2}  {:>12.4}  {:>12.2}\n",
                s.pair,
                s.trades(),
                s.win().len(),
                s.lose().len(),
                s.win_percentage(),
                s.payoff_ratio(),
                s.profit_factor(),
                s.sqn(),
                s.profit(),
                s.volume,
            ));
        }
        out.push_str(&format!(
            "TOTAL         {:>6}  {:>74.4}\n",
            self.trades(),
            self.profit()
        ));

        if let Some(wallet) = &self.wallet {
            out.push_str(&format!(
                r#"
Wallet
======
Starting Balance: {:.2} {}
Ending Balance: {:.2} {}
Total Return: {:.2} ({:.2}%)
Maximum Drawdown: {:.2}%
"#,
                wallet.initial_equity,
                wallet.quote_asset,
                wallet.final_equity,
                wallet.quote_asset,
                wallet.total_return(),
                wallet.total_return_percent(),
                wallet.max_drawdown * 100.0,
            ));
        }
        out
    }
}

impl fmt::Display for EngineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_totals() {
        let mut btc = TradeSummary::new("BTCUSDT");
        btc.win_long.push(10.0);
        btc.lose_short.push(-4.0);
        let mut eth = TradeSummary::new("ETHUSDT");
        eth.win_short.push(1.5);

        let report = EngineReport::new(
            vec![btc, eth],
            Some(WalletReport {
                quote_asset: "USDT".to_string(),
                initial_equity: 1000.0,
                final_equity: 1007.5,
                max_drawdown: 0.02,
            }),
        );
        assert_eq!(report.trades(), 3);
        assert!((report.profit() - 7.5).abs() < 1e-9);

        let text = report.to_string();
        assert!(text.contains("BTCUSDT"));
        assert!(text.contains("Total Return: 7.50 (0.75%)"));
        assert!(text.contains("Maximum Drawdown: 2.00%"));
    }
}
