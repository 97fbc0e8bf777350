//! Order model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    /// Market order
    Market,
    /// Limit order
    Limit,
    /// Post-only limit order (OCO take-profit leg)
    LimitMaker,
    /// Stop order triggered at the stop price
    StopLoss,
    /// Stop order placing a limit at the stop price (OCO stop leg)
    StopLossLimit,
}

impl OrderType {
    /// Stop-triggered types fill at their stop price
    pub fn is_stop(&self) -> bool {
        matches!(self, Self::StopLoss | Self::StopLossLimit)
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    /// Buy
    Buy,
    /// Sell
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order status as reported by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    PendingCancel,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// Statuses polled by reconciliation
    pub const OPEN: [OrderStatus; 3] = [Self::New, Self::PartiallyFilled, Self::PendingCancel];

    /// Check if this is a terminal status (order is done)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Canceled | Self::Rejected | Self::Expired
        )
    }

    /// Whether moving from `self` to `next` respects the order state machine
    ///
    /// Terminal statuses never change; nothing returns to `New`; a pending
    /// cancel can only resolve (or report the fills that raced it).
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        if *self == next || self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Self::New) => false,
            (Self::PendingCancel, Self::PartiallyFilled) => true,
            (Self::PendingCancel, next) => next.is_terminal(),
            _ => true,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "NEW",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Canceled => "CANCELED",
            Self::PendingCancel => "PENDING_CANCEL",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

/// Order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Storage id (0 until persisted)
    pub id: u64,
    /// Exchange-assigned id
    pub exchange_id: String,
    pub pair: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub status: OrderStatus,
    /// Limit price, or average fill price for market orders
    pub price: f64,
    pub quantity: f64,
    /// Quantity filled so far
    pub executed_quantity: f64,
    /// Trigger price for stop orders
    pub stop: Option<f64>,
    /// Shared by the legs of an OCO pair
    pub group_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Create new order with status NEW
    pub fn new(
        exchange_id: impl Into<String>,
        pair: impl Into<String>,
        side: OrderSide,
        order_type: OrderType,
        price: f64,
        quantity: f64,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            exchange_id: exchange_id.into(),
            pair: pair.into(),
            side,
            order_type,
            status: OrderStatus::New,
            price,
            quantity,
            executed_quantity: 0.0,
            stop: None,
            group_id: None,
            created_at: time,
            updated_at: time,
        }
    }

    pub fn with_stop(mut self, stop: f64) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Mark the order completely filled at `price`
    pub fn filled(mut self, price: f64) -> Self {
        self.status = OrderStatus::Filled;
        self.price = price;
        self.executed_quantity = self.quantity;
        self
    }

    /// Check if order is filled
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }

    /// Check if order is still awaiting a terminal status
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Quantity considered executed for position accounting
    ///
    /// A FILLED report without an executed quantity counts as fully filled.
    pub fn filled_quantity(&self) -> f64 {
        if self.status == OrderStatus::Filled && self.executed_quantity <= 0.0 {
            self.quantity
        } else {
            self.executed_quantity
        }
    }

    /// Price at which fills are booked
    pub fn fill_price(&self) -> f64 {
        match (self.order_type.is_stop(), self.stop) {
            (true, Some(stop)) => stop,
            _ => self.price,
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} | ID: {}, Type: {:?}, {} x ${:.4} (~${:.2})",
            self.status,
            self.side,
            self.pair,
            self.exchange_id,
            self.order_type,
            self.quantity,
            self.price,
            self.quantity * self.price
        )
    }
}
