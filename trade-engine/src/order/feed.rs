//! Per-pair order event pub/sub
//!
//! Each pair gets one bounded queue and one delivery task. Publishing never
//! blocks: a full queue drops the event with a warning.

use crate::exchange::Order;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Events queued per pair before new ones are dropped
pub const DEFAULT_BUFFER: usize = 100;

/// Callback receiving order events of one pair
pub type OrderConsumer = Arc<dyn Fn(&Order) + Send + Sync>;

#[derive(Debug, Clone)]
struct OrderEvent {
    order: Order,
    is_new: bool,
}

#[derive(Clone)]
struct Subscription {
    only_new: bool,
    consumer: OrderConsumer,
}

type Subscriptions = Arc<RwLock<HashMap<String, Vec<Subscription>>>>;

#[derive(Default)]
struct Channels {
    senders: HashMap<String, mpsc::Sender<OrderEvent>>,
    receivers: HashMap<String, mpsc::Receiver<OrderEvent>>,
    started: bool,
}

pub struct OrderFeed {
    buffer: usize,
    channels: Mutex<Channels>,
    subscriptions: Subscriptions,
    handles: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Default for OrderFeed {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl OrderFeed {
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            channels: Mutex::new(Channels::default()),
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            handles: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Register a consumer for a pair's order events
    ///
    /// With `only_new`, only creation events are delivered to it.
    pub fn subscribe(&self, pair: &str, consumer: OrderConsumer, only_new: bool) {
        self.subscriptions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(pair.to_string())
            .or_default()
            .push(Subscription { only_new, consumer });

        let mut channels = lock(&self.channels);
        if channels.senders.contains_key(pair) {
            return;
        }
        let (tx, rx) = mpsc::channel(self.buffer);
        channels.senders.insert(pair.to_string(), tx);
        if channels.started {
            lock(&self.handles).push(self.spawn_delivery(pair.to_string(), rx));
        } else {
            channels.receivers.insert(pair.to_string(), rx);
        }
        debug!(pair, "order consumer subscribed");
    }

    /// Queue an event for the order's pair without waiting
    pub fn publish(&self, order: Order, is_new: bool) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let channels = lock(&self.channels);
        let Some(sender) = channels.senders.get(&order.pair) else {
            return;
        };
        match sender.try_send(OrderEvent { order, is_new }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    pair = %event.order.pair,
                    id = %event.order.exchange_id,
                    "order feed full, dropping event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Spawn one delivery task per subscribed pair
    pub fn start(&self) {
        let mut channels = lock(&self.channels);
        if channels.started {
            return;
        }
        channels.started = true;
        let receivers: Vec<_> = channels.receivers.drain().collect();
        let mut handles = lock(&self.handles);
        for (pair, rx) in receivers {
            handles.push(self.spawn_delivery(pair, rx));
        }
    }

    fn spawn_delivery(&self, pair: String, mut rx: mpsc::Receiver<OrderEvent>) -> JoinHandle<()> {
        let subscriptions = self.subscriptions.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let consumers = subscriptions
                    .read()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .get(&pair)
                    .cloned()
                    .unwrap_or_default();
                for subscription in consumers {
                    if subscription.only_new && !event.is_new {
                        continue;
                    }
                    (subscription.consumer)(&event.order);
                }
            }
            debug!(pair = %pair, "order feed closed");
        })
    }

    /// Close every queue, then wait for queued events to be delivered
    ///
    /// Calling it more than once is a no-op.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut channels = lock(&self.channels);
            channels.senders.clear();
            channels.receivers.clear();
        }
        let handles: Vec<_> = lock(&self.handles).drain(..).collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!("order feed task failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{OrderSide, OrderType};
    use chrono::Utc;

    fn order(pair: &str, id: &str) -> Order {
        Order::new(id, pair, OrderSide::Buy, OrderType::Limit, 10.0, 1.0, Utc::now())
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, OrderConsumer) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let inner = seen.clone();
        (seen, Arc::new(move |o: &Order| inner.lock().unwrap().push(o.exchange_id.clone())))
    }

    #[tokio::test]
    async fn test_only_new_filter_and_order() {
        let feed = OrderFeed::default();
        let (all, consumer) = recorder();
        let (created, only_new) = recorder();
        feed.subscribe("BTCUSDT", consumer, false);
        feed.subscribe("BTCUSDT", only_new, true);
        feed.start();

        feed.publish(order("BTCUSDT", "1"), true);
        feed.publish(order("BTCUSDT", "1"), false);
        feed.publish(order("BTCUSDT", "2"), true);
        feed.publish(order("ETHUSDT", "3"), true);
        feed.stop().await;

        assert_eq!(*all.lock().unwrap(), vec!["1", "1", "2"]);
        assert_eq!(*created.lock().unwrap(), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let feed = OrderFeed::new(2);
        let (seen, consumer) = recorder();
        feed.subscribe("BTCUSDT", consumer, false);

        // Not started, so nothing drains the queue.
        for i in 0..5 {
            feed.publish(order("BTCUSDT", &i.to_string()), true);
        }
        feed.start();
        feed.stop().await;
        feed.stop().await;
        feed.publish(order("BTCUSDT", "late"), true);

        assert_eq!(*seen.lock().unwrap(), vec!["0", "1"]);
    }

    #[tokio::test]
    async fn test_subscribe_after_start() {
        let feed = OrderFeed::default();
        feed.start();
        let (seen, consumer) = recorder();
        feed.subscribe("ETHUSDT", consumer, false);
        feed.publish(order("ETHUSDT", "9"), false);
        feed.stop().await;

        assert_eq!(*seen.lock().unwrap(), vec!["9"]);
    }
}
