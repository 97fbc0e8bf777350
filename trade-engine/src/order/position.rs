//! Position tracking

use crate::exchange::OrderSide;
use crate::order::TradeResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Quantities closer than this are considered equal
pub const QUANTITY_EPSILON: f64 = 1e-9;

/// Position side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    /// Long position
    Long,
    /// Short position
    Short,
}

impl From<OrderSide> for PositionSide {
    fn from(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => Self::Long,
            OrderSide::Sell => Self::Short,
        }
    }
}

/// An executed quantity of an order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fill {
    pub side: OrderSide,
    pub price: f64,
    pub quantity: f64,
    pub time: DateTime<Utc>,
}

/// Effect of applying a fill to an open position
#[derive(Debug, Clone, PartialEq)]
pub struct FillOutcome {
    /// Realized result, present for closing fills
    pub result: Option<TradeResult>,
    /// True when the position is now flat
    pub closed: bool,
}

/// Running exposure for one pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub pair: String,
    pub side: PositionSide,
    pub quantity: f64,
    /// Volume-weighted average entry price
    pub avg_price: f64,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Open a position from its first fill
    pub fn open(pair: impl Into<String>, fill: &Fill) -> Self {
        Self {
            pair: pair.into(),
            side: fill.side.into(),
            quantity: fill.quantity,
            avg_price: fill.price,
            opened_at: fill.time,
        }
    }

    /// Apply a fill of the same pair
    ///
    /// Same-direction fills grow the position at a volume-weighted average
    /// price. Opposite fills realize a [`TradeResult`] for the closed
    /// quantity; any excess flips the position at the fill price.
    pub fn apply(&mut self, fill: &Fill) -> FillOutcome {
        if PositionSide::from(fill.side) == self.side {
            let total = self.quantity + fill.quantity;
            self.avg_price = (self.avg_price * self.quantity + fill.price * fill.quantity) / total;
            self.quantity = total;
            return FillOutcome {
                result: None,
                closed: false,
            };
        }

        let closed_quantity = self.quantity.min(fill.quantity);
        let profit_value = self.profit_per_unit(fill.price) * closed_quantity;
        let result = TradeResult {
            pair: self.pair.clone(),
            side: self.side,
            quantity: closed_quantity,
            entry_price: self.avg_price,
            exit_price: fill.price,
            profit_value,
            profit_percent: profit_value / (self.avg_price * closed_quantity),
            opened_at: self.opened_at,
            closed_at: fill.time,
        };

        let remaining = self.quantity - fill.quantity;
        let closed = if remaining.abs() <= QUANTITY_EPSILON {
            self.quantity = 0.0;
            true
        } else if remaining > 0.0 {
            self.quantity = remaining;
            false
        } else {
            self.side = fill.side.into();
            self.quantity = -remaining;
            self.avg_price = fill.price;
            self.opened_at = fill.time;
            false
        };

        FillOutcome {
            result: Some(result),
            closed,
        }
    }

    fn profit_per_unit(&self, price: f64) -> f64 {
        match self.side {
            PositionSide::Long => price - self.avg_price,
            PositionSide::Short => self.avg_price - price,
        }
    }

    /// Quantity with sign (+ long, - short)
    pub fn signed_quantity(&self) -> f64 {
        match self.side {
            PositionSide::Long => self.quantity,
            PositionSide::Short => -self.quantity,
        }
    }

    /// Get entry value
    pub fn entry_value(&self) -> f64 {
        self.avg_price * self.quantity
    }

    /// Unrealized P&L at `price`
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.profit_per_unit(price) * self.quantity
    }

    /// Unrealized P&L at `price` relative to entry value
    pub fn unrealized_pnl_percent(&self, price: f64) -> f64 {
        if self.avg_price == 0.0 {
            return 0.0;
        }
        self.profit_per_unit(price) / self.avg_price
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(side: OrderSide, price: f64, quantity: f64) -> Fill {
        Fill {
            side,
            price,
            quantity,
            time: Utc::now(),
        }
    }

    #[test]
    fn test_round_trip_long() {
        let mut position = Position::open("BTCUSDT", &fill(OrderSide::Buy, 100.0, 1.0));
        let outcome = position.apply(&fill(OrderSide::Sell, 110.0, 1.0));

        assert!(outcome.closed);
        let result = outcome.result.unwrap();
        assert_eq!(result.side, PositionSide::Long);
        assert!((result.profit_value - 10.0).abs() < 1e-9);
        assert!((result.profit_percent - 0.10).abs() < 1e-9);
    }

    #[test]
    fn test_average_price_only_from_same_direction() {
        let mut position = Position::open("BTCUSDT", &fill(OrderSide::Buy, 100.0, 1.0));
        position.apply(&fill(OrderSide::Buy, 130.0, 2.0));
        assert!((position.avg_price - 120.0).abs() < 1e-9);
        assert!((position.quantity - 3.0).abs() < 1e-9);

        let outcome = position.apply(&fill(OrderSide::Sell, 90.0, 1.0));
        assert!(!outcome.closed);
        assert!((position.avg_price - 120.0).abs() < 1e-9);
        assert!((position.quantity - 2.0).abs() < 1e-9);
        assert!((outcome.result.unwrap().profit_value + 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_profit_sign() {
        let mut position = Position::open("ETHUSDT", &fill(OrderSide::Sell, 200.0, 2.0));
        assert_eq!(position.signed_quantity(), -2.0);
        assert!((position.unrealized_pnl(190.0) - 20.0).abs() < 1e-9);

        let result = position.apply(&fill(OrderSide::Buy, 180.0, 2.0)).result.unwrap();
        assert_eq!(result.side, PositionSide::Short);
        assert!((result.profit_value - 40.0).abs() < 1e-9);
        assert!((result.profit_percent - 0.10).abs() < 1e-9);
    }

    #[test]
    fn test_over_close_flips_side() {
        let mut position = Position::open("BTCUSDT", &fill(OrderSide::Buy, 100.0, 1.0));
        let outcome = position.apply(&fill(OrderSide::Sell, 105.0, 3.0));

        assert!(!outcome.closed);
        let result = outcome.result.unwrap();
        assert!((result.quantity - 1.0).abs() < 1e-9);
        assert!((result.profit_value - 5.0).abs() < 1e-9);
        assert_eq!(position.side, PositionSide::Short);
        assert!((position.quantity - 2.0).abs() < 1e-9);
        assert_eq!(position.avg_price, 105.0);
    }
}
