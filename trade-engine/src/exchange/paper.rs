//! Simulated spot exchange for backtests and paper trading
//!
//! Market orders fill at the last close. Resting orders (limit, stop, OCO
//! legs) fill when a candle's range crosses their price, and the wallet
//! cancels the remaining OCO leg itself. Funds for resting orders move from
//! `free` to `lock` until the order fills or is canceled.

use crate::data::Candle;
use crate::error::{EngineError, Result};
use crate::exchange::{
    split_pair, Account, AssetInfo, Balance, Broker, CandleStream, Feeder, Order, OrderSide,
    OrderStatus, OrderType,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct Reservation {
    asset: String,
    amount: f64,
}

#[derive(Default)]
struct WalletState {
    balances: HashMap<String, Balance>,
    orders: Vec<Order>,
    /// Keyed by group id for OCO legs, exchange id otherwise
    reservations: HashMap<String, Reservation>,
    last_candle: HashMap<String, Candle>,
    next_id: u64,
    peak_equity: f64,
    max_drawdown: f64,
}

impl WalletState {
    fn balance(&mut self, asset: &str) -> &mut Balance {
        self.balances
            .entry(asset.to_string())
            .or_insert_with(|| Balance::new(asset, 0.0))
    }

    fn next_exchange_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    fn reserve(&mut self, key: String, asset: &str, amount: f64) -> Result<()> {
        let balance = self.balance(asset);
        if !balance.can_afford(amount) {
            return Err(EngineError::InsufficientFunds {
                asset: asset.to_string(),
                required: amount,
                available: balance.free,
            });
        }
        balance.free -= amount;
        balance.lock += amount;
        self.reservations.insert(
            key,
            Reservation {
                asset: asset.to_string(),
                amount,
            },
        );
        Ok(())
    }

    /// Return a reservation's funds to the free balance
    fn release(&mut self, key: &str) {
        if let Some(reservation) = self.reservations.remove(key) {
            let balance = self.balance(&reservation.asset);
            balance.lock -= reservation.amount;
            balance.free += reservation.amount;
        }
    }
}

fn reservation_key(order: &Order) -> String {
    order
        .group_id
        .clone()
        .unwrap_or_else(|| order.exchange_id.clone())
}

/// Simulated exchange holding balances in memory
pub struct PaperWallet {
    quote_asset: String,
    initial_equity: f64,
    feeder: Arc<dyn Feeder>,
    state: Mutex<WalletState>,
}

impl PaperWallet {
    /// Wallet funded with `amount` of the `quote_asset`, reading market data
    /// from `feeder`
    pub fn new(quote_asset: &str, amount: f64, feeder: Arc<dyn Feeder>) -> Self {
        let mut state = WalletState::default();
        *state.balance(&quote_asset.to_uppercase()) = Balance::new(quote_asset.to_uppercase(), amount);
        state.peak_equity = amount;
        Self {
            quote_asset: quote_asset.to_uppercase(),
            initial_equity: amount,
            feeder,
            state: Mutex::new(state),
        }
    }

    /// Add a starting balance of another asset
    pub fn with_balance(self, asset: &str, amount: f64) -> Self {
        {
            let mut state = self.state();
            state.balance(&asset.to_uppercase()).free += amount;
        }
        self
    }

    fn state(&self) -> MutexGuard<'_, WalletState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn quote_asset(&self) -> &str {
        &self.quote_asset
    }

    pub fn initial_equity(&self) -> f64 {
        self.initial_equity
    }

    /// Account value in the quote asset at the last seen closes
    pub fn equity(&self) -> f64 {
        Self::equity_of(&self.state(), &self.quote_asset)
    }

    /// Largest peak-to-trough equity drop, as a fraction of the peak
    pub fn max_drawdown(&self) -> f64 {
        self.state().max_drawdown
    }

    fn equity_of(state: &WalletState, quote: &str) -> f64 {
        let prices: HashMap<String, f64> = state
            .last_candle
            .values()
            .filter_map(|candle| {
                let (base, pair_quote) = split_pair(&candle.pair).ok()?;
                (pair_quote == quote).then_some((base, candle.close))
            })
            .collect();
        let balances: Vec<Balance> = state.balances.values().cloned().collect();
        Account::new(balances).equity(quote, &prices)
    }

    /// Match resting orders of the candle's pair against its range
    pub fn on_candle(&self, candle: &Candle) {
        let mut state = self.state();
        state.last_candle.insert(candle.pair.clone(), candle.clone());

        let triggered: Vec<usize> = state
            .orders
            .iter()
            .enumerate()
            .filter(|(_, o)| o.pair == candle.pair && o.status == OrderStatus::New)
            .filter(|(_, o)| Self::crosses(o, candle))
            .map(|(i, _)| i)
            .collect();

        for index in triggered {
            // An earlier fill in this pass may have canceled this OCO leg.
            if state.orders[index].status != OrderStatus::New {
                continue;
            }
            let order = state.orders[index].clone();
            Self::settle(&mut state, &order, order.fill_price());
            let time = candle.updated_at.max(candle.time);
            let filled = &mut state.orders[index];
            filled.status = OrderStatus::Filled;
            filled.executed_quantity = filled.quantity;
            filled.price = order.fill_price();
            filled.updated_at = time;
            info!("[PAPER] filled {}", filled);

            if let Some(group) = &order.group_id {
                for sibling in state
                    .orders
                    .iter_mut()
                    .filter(|o| o.group_id.as_ref() == Some(group) && o.status == OrderStatus::New)
                {
                    sibling.status = OrderStatus::Canceled;
                    sibling.updated_at = time;
                    debug!(id = %sibling.exchange_id, "oco sibling canceled");
                }
            }
        }

        if candle.complete {
            let equity = Self::equity_of(&state, &self.quote_asset);
            if equity > state.peak_equity {
                state.peak_equity = equity;
            } else if state.peak_equity > 0.0 {
                let drawdown = (state.peak_equity - equity) / state.peak_equity;
                state.max_drawdown = state.max_drawdown.max(drawdown);
            }
        }
    }

    fn crosses(order: &Order, candle: &Candle) -> bool {
        let trigger = order.fill_price();
        match (order.order_type.is_stop(), order.side) {
            (false, OrderSide::Buy) => candle.low <= trigger,
            (false, OrderSide::Sell) => candle.high >= trigger,
            (true, OrderSide::Buy) => candle.high >= trigger,
            (true, OrderSide::Sell) => candle.low <= trigger,
        }
    }

    /// Move funds for a resting order filling at `price`
    fn settle(state: &mut WalletState, order: &Order, price: f64) {
        let Ok((base, quote)) = split_pair(&order.pair) else {
            return;
        };
        let key = reservation_key(order);
        let reserved = state.reservations.remove(&key).map(|r| r.amount).unwrap_or(0.0);
        let notional = price * order.quantity;
        match order.side {
            OrderSide::Buy => {
                let quote_balance = state.balance(&quote);
                quote_balance.lock -= reserved;
                quote_balance.free += reserved - notional;
                state.balance(&base).free += order.quantity;
            }
            OrderSide::Sell => {
                state.balance(&base).lock -= reserved;
                state.balance(&quote).free += notional;
            }
        }
    }

    async fn market_price(&self, pair: &str) -> Result<f64> {
        let last = self.state().last_candle.get(pair).map(|c| c.close);
        match last {
            Some(price) => Ok(price),
            None => self.feeder.last_quote(pair).await,
        }
    }

    fn now(state: &WalletState, pair: &str) -> DateTime<Utc> {
        state
            .last_candle
            .get(pair)
            .map(|c| c.updated_at.max(c.time))
            .unwrap_or_else(Utc::now)
    }

    fn validate_size(pair: &str, size: f64) -> Result<()> {
        if size > 0.0 && size.is_finite() {
            Ok(())
        } else {
            Err(EngineError::Exchange(format!("invalid order size {} for {}", size, pair)))
        }
    }

    fn create_resting(
        &self,
        side: OrderSide,
        pair: &str,
        order_type: OrderType,
        size: f64,
        price: f64,
        stop: Option<f64>,
    ) -> Result<Order> {
        Self::validate_size(pair, size)?;
        let (base, quote) = split_pair(pair)?;
        let mut state = self.state();
        let id = state.next_exchange_id();
        let mut order = Order::new(id.clone(), pair, side, order_type, price, size, Self::now(&state, pair));
        if let Some(stop) = stop {
            order = order.with_stop(stop);
        }
        match side {
            OrderSide::Buy => state.reserve(id, &quote, order.fill_price() * size)?,
            OrderSide::Sell => state.reserve(id, &base, size)?,
        }
        state.orders.push(order.clone());
        Ok(order)
    }
}

#[async_trait]
impl Feeder for PaperWallet {
    fn assets_info(&self, pair: &str) -> Result<AssetInfo> {
        self.feeder.assets_info(pair)
    }

    async fn last_quote(&self, pair: &str) -> Result<f64> {
        self.market_price(pair).await
    }

    async fn candles_by_period(
        &self,
        pair: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        self.feeder.candles_by_period(pair, timeframe, start, end).await
    }

    async fn candles_by_limit(
        &self,
        pair: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        self.feeder.candles_by_limit(pair, timeframe, limit).await
    }

    async fn candles_subscription(&self, pair: &str, timeframe: &str) -> Result<CandleStream> {
        self.feeder.candles_subscription(pair, timeframe).await
    }
}

#[async_trait]
impl Broker for PaperWallet {
    async fn account(&self) -> Result<Account> {
        let mut balances: Vec<Balance> = self.state().balances.values().cloned().collect();
        balances.sort_by(|a, b| a.asset.cmp(&b.asset));
        Ok(Account::new(balances))
    }

    async fn position(&self, pair: &str) -> Result<(f64, f64)> {
        let (base, quote) = split_pair(pair)?;
        let mut state = self.state();
        let asset = state.balance(&base).total();
        let quote = state.balance(&quote).total();
        Ok((asset, quote))
    }

    async fn order(&self, pair: &str, exchange_id: &str) -> Result<Order> {
        self.state()
            .orders
            .iter()
            .find(|o| o.pair == pair && o.exchange_id == exchange_id)
            .cloned()
            .ok_or_else(|| EngineError::OrderNotFound {
                pair: pair.to_string(),
                id: exchange_id.to_string(),
            })
    }

    async fn create_order_oco(
        &self,
        side: OrderSide,
        pair: &str,
        size: f64,
        price: f64,
        stop: f64,
        stop_limit: f64,
    ) -> Result<Vec<Order>> {
        Self::validate_size(pair, size)?;
        let (base, quote) = split_pair(pair)?;
        let mut state = self.state();
        let group = format!("oco-{}", state.next_exchange_id());
        let time = Self::now(&state, pair);

        match side {
            OrderSide::Buy => {
                state.reserve(group.clone(), &quote, price.max(stop).max(stop_limit) * size)?
            }
            OrderSide::Sell => state.reserve(group.clone(), &base, size)?,
        }

        let limit_id = state.next_exchange_id();
        let stop_id = state.next_exchange_id();
        let legs = vec![
            Order::new(limit_id, pair, side, OrderType::LimitMaker, price, size, time)
                .with_group(group.clone()),
            Order::new(stop_id, pair, side, OrderType::StopLossLimit, stop_limit, size, time)
                .with_stop(stop)
                .with_group(group),
        ];
        state.orders.extend(legs.iter().cloned());
        Ok(legs)
    }

    async fn create_order_limit(
        &self,
        side: OrderSide,
        pair: &str,
        size: f64,
        limit: f64,
    ) -> Result<Order> {
        self.create_resting(side, pair, OrderType::Limit, size, limit, None)
    }

    async fn create_order_market(&self, side: OrderSide, pair: &str, size: f64) -> Result<Order> {
        Self::validate_size(pair, size)?;
        let (base, quote) = split_pair(pair)?;
        let price = self.market_price(pair).await?;

        let mut state = self.state();
        let notional = price * size;
        match side {
            OrderSide::Buy => {
                let quote_balance = state.balance(&quote);
                if !quote_balance.can_afford(notional) {
                    return Err(EngineError::InsufficientFunds {
                        asset: quote,
                        required: notional,
                        available: quote_balance.free,
                    });
                }
                quote_balance.free -= notional;
                state.balance(&base).free += size;
            }
            OrderSide::Sell => {
                let base_balance = state.balance(&base);
                if !base_balance.can_afford(size) {
                    return Err(EngineError::InsufficientFunds {
                        asset: base,
                        required: size,
                        available: base_balance.free,
                    });
                }
                base_balance.free -= size;
                state.balance(&quote).free += notional;
            }
        }

        let id = state.next_exchange_id();
        let order = Order::new(id, pair, side, OrderType::Market, price, size, Self::now(&state, pair))
            .filled(price);
        state.orders.push(order.clone());
        Ok(order)
    }

    async fn create_order_market_quote(
        &self,
        side: OrderSide,
        pair: &str,
        quote: f64,
    ) -> Result<Order> {
        let price = self.market_price(pair).await?;
        self.create_order_market(side, pair, quote / price).await
    }

    async fn create_order_stop(
        &self,
        side: OrderSide,
        pair: &str,
        size: f64,
        stop: f64,
    ) -> Result<Order> {
        self.create_resting(side, pair, OrderType::StopLoss, size, stop, Some(stop))
    }

    async fn cancel(&self, order: &Order) -> Result<()> {
        let mut state = self.state();
        let Some(current) = state
            .orders
            .iter()
            .find(|o| o.pair == order.pair && o.exchange_id == order.exchange_id)
            .cloned()
        else {
            return Err(EngineError::OrderNotFound {
                pair: order.pair.clone(),
                id: order.exchange_id.clone(),
            });
        };
        if current.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                id: current.exchange_id,
                from: current.status,
                to: OrderStatus::Canceled,
            });
        }

        let key = reservation_key(&current);
        let time = Self::now(&state, &current.pair);
        for o in state.orders.iter_mut().filter(|o| {
            o.status == OrderStatus::New
                && (o.exchange_id == current.exchange_id
                    || (current.group_id.is_some() && o.group_id == current.group_id))
        }) {
            o.status = OrderStatus::Canceled;
            o.updated_at = time;
        }
        state.release(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::HistoricalFeed;
    use chrono::TimeZone;

    fn candle(minute: i64, low: f64, high: f64, close: f64) -> Candle {
        let time = Utc.timestamp_opt(1_700_000_000 + minute * 60, 0).unwrap();
        Candle::new("BTCUSDT", "1m", time, close, high, low, close, 1.0)
    }

    fn wallet() -> PaperWallet {
        let wallet = PaperWallet::new("USDT", 1000.0, Arc::new(HistoricalFeed::new()));
        wallet.on_candle(&candle(0, 99.0, 101.0, 100.0));
        wallet
    }

    #[tokio::test]
    async fn test_market_orders_move_balances() {
        let wallet = wallet();
        let order = wallet.create_order_market(OrderSide::Buy, "BTCUSDT", 2.0).await.unwrap();
        assert!(order.is_filled());
        assert_eq!(order.price, 100.0);
        assert_eq!(wallet.position("BTCUSDT").await.unwrap(), (2.0, 800.0));

        let err = wallet
            .create_order_market(OrderSide::Sell, "BTCUSDT", 3.0)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));

        let order = wallet
            .create_order_market_quote(OrderSide::Buy, "BTCUSDT", 100.0)
            .await
            .unwrap();
        assert!((order.quantity - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_limit_fills_on_cross_and_cancel_releases() {
        let wallet = wallet();
        let limit = wallet
            .create_order_limit(OrderSide::Buy, "BTCUSDT", 1.0, 95.0)
            .await
            .unwrap();
        let (_, quote) = wallet.account().await.unwrap().balance("BTC", "USDT");
        assert_eq!((quote.free, quote.lock), (905.0, 95.0));

        wallet.on_candle(&candle(1, 96.0, 100.0, 97.0));
        assert_eq!(wallet.order("BTCUSDT", &limit.exchange_id).await.unwrap().status, OrderStatus::New);

        wallet.on_candle(&candle(2, 94.0, 98.0, 96.0));
        let filled = wallet.order("BTCUSDT", &limit.exchange_id).await.unwrap();
        assert!(filled.is_filled());
        assert_eq!(wallet.position("BTCUSDT").await.unwrap(), (1.0, 905.0));

        let resting = wallet
            .create_order_limit(OrderSide::Sell, "BTCUSDT", 1.0, 200.0)
            .await
            .unwrap();
        wallet.cancel(&resting).await.unwrap();
        let (base, _) = wallet.account().await.unwrap().balance("BTC", "USDT");
        assert_eq!((base.free, base.lock), (1.0, 0.0));
        assert!(wallet.cancel(&resting).await.is_err());
    }

    #[tokio::test]
    async fn test_oco_fill_cancels_sibling() {
        let wallet = wallet().with_balance("BTC", 1.0);
        let legs = wallet
            .create_order_oco(OrderSide::Sell, "BTCUSDT", 1.0, 110.0, 90.0, 89.0)
            .await
            .unwrap();
        assert_eq!(legs.len(), 2);
        assert_eq!(legs[0].group_id, legs[1].group_id);

        wallet.on_candle(&candle(1, 88.0, 100.0, 89.5));
        let take_profit = wallet.order("BTCUSDT", &legs[0].exchange_id).await.unwrap();
        let stop = wallet.order("BTCUSDT", &legs[1].exchange_id).await.unwrap();
        assert_eq!(take_profit.status, OrderStatus::Canceled);
        assert!(stop.is_filled());
        assert_eq!(stop.price, 90.0);
        assert_eq!(wallet.position("BTCUSDT").await.unwrap(), (0.0, 1090.0));
        assert!(wallet.max_drawdown() >= 0.0);
    }
}
