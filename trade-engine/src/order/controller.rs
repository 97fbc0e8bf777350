//! Order lifecycle manager
//!
//! Every order the engine places goes through the [`OrderController`]: it is
//! sent to the exchange, persisted, published on the [`OrderFeed`], and then
//! polled by [`OrderController::reconcile`] until it reaches a terminal
//! status. Fills drive the per-pair [`Position`] and [`TradeSummary`].

use crate::config::OcoPolicy;
use crate::data::Candle;
use crate::error::{EngineError, Result};
use crate::exchange::{Account, Broker, Exchange, Order, OrderSide, OrderStatus};
use crate::notification::Notifier;
use crate::order::{Fill, OrderFeed, Position, TradeSummary, QUANTITY_EPSILON};
use crate::storage::{OrderFilter, OrderStorage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Controller run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerStatus {
    Running,
    Stopped,
    /// Last reconciliation could not read the order storage
    Error,
}

impl fmt::Display for ControllerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Default)]
struct Ledger {
    positions: HashMap<String, Position>,
    summaries: HashMap<String, TradeSummary>,
}

#[derive(Default)]
struct MarketState {
    last_price: HashMap<String, f64>,
    last_time: Option<DateTime<Utc>>,
}

pub struct OrderController {
    exchange: Arc<dyn Exchange>,
    storage: Arc<dyn OrderStorage>,
    feed: Arc<OrderFeed>,
    notifier: Option<Arc<dyn Notifier>>,
    oco_policy: OcoPolicy,
    reconcile_interval: Duration,
    /// Held across every exchange call, persistence write and position update
    ledger: Mutex<Ledger>,
    market: StdMutex<MarketState>,
    status: StdMutex<ControllerStatus>,
    ticker: StdMutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl OrderController {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        storage: Arc<dyn OrderStorage>,
        feed: Arc<OrderFeed>,
    ) -> Self {
        Self {
            exchange,
            storage,
            feed,
            notifier: None,
            oco_policy: OcoPolicy::default(),
            reconcile_interval: Duration::from_secs(1),
            ledger: Mutex::new(Ledger::default()),
            market: StdMutex::new(MarketState::default()),
            status: StdMutex::new(ControllerStatus::Stopped),
            ticker: StdMutex::new(None),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_oco_policy(mut self, policy: OcoPolicy) -> Self {
        self.oco_policy = policy;
        self
    }

    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    pub fn status(&self) -> ControllerStatus {
        *lock(&self.status)
    }

    fn set_status(&self, status: ControllerStatus) {
        *lock(&self.status) = status;
    }

    /// Track the latest price and time of a pair
    pub fn on_candle(&self, candle: &Candle) {
        let mut market = lock(&self.market);
        market.last_price.insert(candle.pair.clone(), candle.close);
        let time = candle.updated_at.max(candle.time);
        if market.last_time.map_or(true, |last| time > last) {
            market.last_time = Some(time);
        }
    }

    pub fn last_price(&self, pair: &str) -> Option<f64> {
        lock(&self.market).last_price.get(pair).copied()
    }

    /// Market time once candles arrive, wall-clock before that
    fn now(&self) -> DateTime<Utc> {
        lock(&self.market).last_time.unwrap_or_else(Utc::now)
    }

    /// Open position of a pair, if any
    pub async fn open_position(&self, pair: &str) -> Option<Position> {
        self.ledger.lock().await.positions.get(pair).cloned()
    }

    /// Open positions, sorted by pair
    pub async fn positions(&self) -> Vec<Position> {
        let ledger = self.ledger.lock().await;
        let mut positions: Vec<Position> = ledger.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.pair.cmp(&b.pair));
        positions
    }

    pub async fn summary(&self, pair: &str) -> Option<TradeSummary> {
        self.ledger.lock().await.summaries.get(pair).cloned()
    }

    /// Trade summaries of every traded pair, sorted by pair
    pub async fn summaries(&self) -> Vec<TradeSummary> {
        let ledger = self.ledger.lock().await;
        let mut summaries: Vec<TradeSummary> = ledger.summaries.values().cloned().collect();
        summaries.sort_by(|a, b| a.pair.cmp(&b.pair));
        summaries
    }

    /// Start periodic reconciliation
    pub fn start(self: &Arc<Self>) {
        let mut ticker = lock(&self.ticker);
        if ticker.is_some() {
            return;
        }
        self.set_status(ControllerStatus::Running);
        info!(
            "[SETUP] order controller started, reconciling every {:?}",
            self.reconcile_interval
        );

        let controller = Arc::clone(self);
        *ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(controller.reconcile_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await;
            loop {
                interval.tick().await;
                controller.reconcile().await;
            }
        }));
    }

    /// Mark running without a ticker; the caller drives [`reconcile`](Self::reconcile)
    pub fn start_manual(&self) {
        self.set_status(ControllerStatus::Running);
        info!("[SETUP] order controller started in manual reconciliation mode");
    }

    /// Stop the ticker, then run one final reconciliation
    pub async fn stop(&self) {
        let ticker = lock(&self.ticker).take();
        if let Some(ticker) = ticker {
            ticker.abort();
        }
        self.reconcile().await;
        self.set_status(ControllerStatus::Stopped);
        info!("[SETUP] order controller stopped");
    }

    fn notify(&self, text: &str) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(text);
        }
    }

    fn fail<T>(&self, err: EngineError) -> Result<T> {
        error!("order controller: {}", err);
        if let Some(notifier) = &self.notifier {
            notifier.on_error(&err);
        }
        Err(err)
    }

    /// Persist a freshly created order, book any execution, publish it
    async fn register(&self, ledger: &mut Ledger, mut order: Order) -> Result<Order> {
        if let Err(e) = self.storage.create_order(&mut order).await {
            return self.fail(e);
        }
        self.announce(ledger, &order);
        Ok(order)
    }

    /// Book and publish an order that is already persisted
    fn announce(&self, ledger: &mut Ledger, order: &Order) {
        self.apply_execution(ledger, order, 0.0);
        info!("[ORDER CREATED] {}", order);
        self.feed.publish(order.clone(), true);
    }

    /// Withdraw an OCO group whose legs could not all be persisted.
    /// Every leg is cancelled at the exchange; stored legs end CANCELED.
    async fn abandon_group(&self, legs: &[Order], stored: &[Order]) {
        for leg in legs {
            if let Err(e) = self.exchange.cancel(leg).await {
                warn!("order controller: cancel of OCO leg {} failed: {}", leg.exchange_id, e);
            }
        }
        for leg in stored {
            let mut canceled = leg.clone();
            canceled.status = OrderStatus::Canceled;
            canceled.updated_at = self.now();
            if let Err(e) = self.storage.update_order(&canceled).await {
                warn!("order controller: could not retire OCO leg {}: {}", leg.exchange_id, e);
            }
        }
    }

    /// Feed the increase of executed quantity into the pair's position
    fn apply_execution(&self, ledger: &mut Ledger, order: &Order, previously_filled: f64) {
        let quantity = order.filled_quantity() - previously_filled;
        if quantity <= QUANTITY_EPSILON {
            return;
        }
        let fill = Fill {
            side: order.side,
            price: order.fill_price(),
            quantity,
            time: order.updated_at,
        };

        let summary = ledger
            .summaries
            .entry(order.pair.clone())
            .or_insert_with(|| TradeSummary::new(&order.pair));
        summary.add_volume(fill.price, fill.quantity);

        let position = match ledger.positions.entry(order.pair.clone()) {
            Entry::Vacant(entry) => {
                debug!(pair = %order.pair, side = %fill.side, "position opened");
                entry.insert(Position::open(&order.pair, &fill));
                return;
            }
            Entry::Occupied(entry) => entry.into_mut(),
        };

        let outcome = position.apply(&fill);
        if let Some(result) = outcome.result {
            summary.add(&result);
            info!(
                "[PROFIT] {} {:.4} ({:.2}%)",
                result.pair,
                result.profit_value,
                result.profit_percent * 100.0
            );
            self.notify(&format!(
                "[PROFIT] {:.4} ({:.2}%)\n`{}`",
                result.profit_value,
                result.profit_percent * 100.0,
                order
            ));
        }
        if outcome.closed {
            ledger.positions.remove(&order.pair);
        }
    }

    /// Poll the exchange for every open order and apply status changes
    ///
    /// Returns the number of orders updated. Unchanged orders are neither
    /// written nor published, so repeated calls without exchange-side
    /// changes are no-ops.
    pub async fn reconcile(&self) -> usize {
        let mut ledger = self.ledger.lock().await;

        let open = match self
            .storage
            .orders(&[OrderFilter::StatusIn(OrderStatus::OPEN.to_vec())])
            .await
        {
            Ok(orders) => orders,
            Err(e) => {
                self.set_status(ControllerStatus::Error);
                let _ = self.fail::<()>(e);
                return 0;
            }
        };
        if self.status() == ControllerStatus::Error {
            self.set_status(ControllerStatus::Running);
        }

        let mut updated = Vec::new();
        for local in &open {
            let mut remote = match self.exchange.order(&local.pair, &local.exchange_id).await {
                Ok(order) => order,
                Err(e) => {
                    error!(pair = %local.pair, id = %local.exchange_id, "reconcile: {}", e);
                    continue;
                }
            };

            let status_changed = remote.status != local.status;
            let filled_more = remote.filled_quantity() > local.filled_quantity() + QUANTITY_EPSILON;
            if !status_changed && !filled_more {
                continue;
            }
            if status_changed && !local.status.can_transition_to(remote.status) {
                warn!(
                    pair = %local.pair,
                    id = %local.exchange_id,
                    "ignoring transition {} -> {}",
                    local.status,
                    remote.status
                );
                continue;
            }

            remote.id = local.id;
            if remote.group_id.is_none() {
                remote.group_id = local.group_id.clone();
            }
            if let Err(e) = self.storage.update_order(&remote).await {
                let _ = self.fail::<()>(e);
                continue;
            }
            info!("[ORDER {}] {}", remote.status, remote);
            self.apply_execution(&mut ledger, &remote, local.filled_quantity());
            updated.push(remote);
        }

        for order in &updated {
            self.feed.publish(order.clone(), false);
        }

        if self.oco_policy == OcoPolicy::CancelSiblings {
            for order in updated.iter().filter(|o| o.is_filled()) {
                self.cancel_siblings(order).await;
            }
        }

        updated.len()
    }

    async fn cancel_siblings(&self, filled: &Order) {
        let Some(group) = &filled.group_id else {
            return;
        };
        let siblings = match self
            .storage
            .orders(&[
                OrderFilter::Pair(filled.pair.clone()),
                OrderFilter::StatusIn(vec![OrderStatus::New, OrderStatus::PartiallyFilled]),
            ])
            .await
        {
            Ok(orders) => orders,
            Err(e) => {
                let _ = self.fail::<()>(e);
                return;
            }
        };
        for sibling in siblings
            .iter()
            .filter(|o| o.id != filled.id && o.group_id.as_ref() == Some(group))
        {
            if let Err(e) = self.request_cancel(sibling).await {
                warn!(id = %sibling.exchange_id, "oco sibling cancel failed: {}", e);
            }
        }
    }

    /// The stored copy of `order`; callers may hold an outdated one
    async fn stored(&self, order: &Order) -> Result<Order> {
        let found = self
            .storage
            .orders(&[OrderFilter::Id(order.id), OrderFilter::Pair(order.pair.clone())])
            .await?;
        found.into_iter().next().ok_or_else(|| EngineError::OrderNotFound {
            pair: order.pair.clone(),
            id: order.exchange_id.clone(),
        })
    }

    async fn request_cancel(&self, order: &Order) -> Result<()> {
        let stored = match self.stored(order).await {
            Ok(stored) => stored,
            Err(e) => return self.fail(e),
        };
        if !stored.status.can_transition_to(OrderStatus::PendingCancel) {
            return self.fail(EngineError::InvalidTransition {
                id: stored.exchange_id.clone(),
                from: stored.status,
                to: OrderStatus::PendingCancel,
            });
        }
        info!("[ORDER] Cancelling order for {}", stored.pair);
        if let Err(e) = self.exchange.cancel(&stored).await {
            return self.fail(e);
        }

        let mut pending = stored;
        pending.status = OrderStatus::PendingCancel;
        pending.updated_at = self.now();
        if let Err(e) = self.storage.update_order(&pending).await {
            return self.fail(e);
        }
        info!("[ORDER {}] {}", pending.status, pending);
        self.feed.publish(pending, false);
        Ok(())
    }

    fn group_id() -> String {
        Uuid::new_v4().to_string()
    }
}

#[async_trait]
impl Broker for OrderController {
    async fn account(&self) -> Result<Account> {
        self.exchange.account().await
    }

    async fn position(&self, pair: &str) -> Result<(f64, f64)> {
        self.exchange.position(pair).await
    }

    async fn order(&self, pair: &str, exchange_id: &str) -> Result<Order> {
        self.exchange.order(pair, exchange_id).await
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
        let mut ledger = self.ledger.lock().await;
        info!("[ORDER] Creating OCO order for {}", pair);
        let legs = match self
            .exchange
            .create_order_oco(side, pair, size, price, stop, stop_limit)
            .await
        {
            Ok(legs) => legs,
            Err(e) => return self.fail(e),
        };

        let group = legs
            .iter()
            .find_map(|o| o.group_id.clone())
            .unwrap_or_else(Self::group_id);
        let legs: Vec<Order> = legs
            .into_iter()
            .map(|mut leg| {
                leg.group_id = Some(group.clone());
                leg
            })
            .collect();

        let mut created = Vec::with_capacity(legs.len());
        for leg in &legs {
            let mut leg = leg.clone();
            if let Err(e) = self.storage.create_order(&mut leg).await {
                self.abandon_group(&legs, &created).await;
                return self.fail(e);
            }
            created.push(leg);
        }
        for leg in &created {
            self.announce(&mut ledger, leg);
        }
        Ok(created)
    }

    async fn create_order_limit(
        &self,
        side: OrderSide,
        pair: &str,
        size: f64,
        limit: f64,
    ) -> Result<Order> {
        let mut ledger = self.ledger.lock().await;
        info!("[ORDER] Creating LIMIT {} order for {}", side, pair);
        match self.exchange.create_order_limit(side, pair, size, limit).await {
            Ok(order) => self.register(&mut ledger, order).await,
            Err(e) => self.fail(e),
        }
    }

    async fn create_order_market(&self, side: OrderSide, pair: &str, size: f64) -> Result<Order> {
        let mut ledger = self.ledger.lock().await;
        info!("[ORDER] Creating MARKET {} order for {}", side, pair);
        match self.exchange.create_order_market(side, pair, size).await {
            Ok(order) => self.register(&mut ledger, order).await,
            Err(e) => self.fail(e),
        }
    }

    async fn create_order_market_quote(
        &self,
        side: OrderSide,
        pair: &str,
        quote: f64,
    ) -> Result<Order> {
        let mut ledger = self.ledger.lock().await;
        info!("[ORDER] Creating MARKET {} order for {} (quote {:.2})", side, pair, quote);
        match self.exchange.create_order_market_quote(side, pair, quote).await {
            Ok(order) => self.register(&mut ledger, order).await,
            Err(e) => self.fail(e),
        }
    }

    async fn create_order_stop(
        &self,
        side: OrderSide,
        pair: &str,
        size: f64,
        stop: f64,
    ) -> Result<Order> {
        let mut ledger = self.ledger.lock().await;
        info!("[ORDER] Creating STOP {} order for {}", side, pair);
        match self.exchange.create_order_stop(side, pair, size, stop).await {
            Ok(order) => self.register(&mut ledger, order).await,
            Err(e) => self.fail(e),
        }
    }

    /// Request cancellation; the order becomes PENDING_CANCEL until the
    /// exchange confirms through reconciliation
    async fn cancel(&self, order: &Order) -> Result<()> {
        let _ledger = self.ledger.lock().await;
        self.request_cancel(order).await
    }
}
