//! Market data multiplexer
//!
//! Owns the (pair, timeframe) -> consumers mapping and fans every candle of
//! the underlying exchange stream out to the consumers of its key.

use crate::data::Candle;
use crate::error::{EngineError, Result};
use crate::exchange::{CandleStream, Feeder};
use crate::notification::Notifier;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Callback receiving candles for one (pair, timeframe) key
pub type CandleConsumer = Arc<dyn Fn(Candle) + Send + Sync>;

/// Stream key (pair + timeframe)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedKey {
    pub pair: String,
    pub timeframe: String,
}

impl FeedKey {
    pub fn new(pair: &str, timeframe: &str) -> Self {
        Self {
            pair: pair.to_string(),
            timeframe: timeframe.to_string(),
        }
    }
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}--{}", self.pair, self.timeframe)
    }
}

#[derive(Clone)]
struct Subscription {
    only_completed: bool,
    consumer: CandleConsumer,
}

/// Fan-out of exchange candle streams to registered consumers
pub struct CandleMultiplexer {
    feeder: Arc<dyn Feeder>,
    notifier: Option<Arc<dyn Notifier>>,
    /// Keys in first-subscription order
    keys: Mutex<Vec<FeedKey>>,
    subscriptions: Arc<RwLock<HashMap<FeedKey, Vec<Subscription>>>>,
    streams: Mutex<HashMap<FeedKey, CandleStream>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CandleMultiplexer {
    pub fn new(feeder: Arc<dyn Feeder>) -> Self {
        Self {
            feeder,
            notifier: None,
            keys: Mutex::new(Vec::new()),
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            streams: Mutex::new(HashMap::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Report stream errors to a notifier in addition to the log
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Register a consumer for a key
    ///
    /// Consumers of one key are invoked in registration order. With
    /// `only_completed`, in-progress candles are skipped for that consumer.
    pub fn subscribe(
        &self,
        pair: &str,
        timeframe: &str,
        consumer: CandleConsumer,
        only_completed: bool,
    ) {
        let key = FeedKey::new(pair, timeframe);
        {
            let mut keys = lock(&self.keys);
            if !keys.contains(&key) {
                keys.push(key.clone());
            }
        }
        let mut subscriptions = self
            .subscriptions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscriptions.entry(key.clone()).or_default().push(Subscription {
            only_completed,
            consumer,
        });
        debug!(key = %key, "candle consumer subscribed");
    }

    /// Number of consumers registered for a key
    pub fn subscriber_count(&self, pair: &str, timeframe: &str) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&FeedKey::new(pair, timeframe))
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Replay complete historical candles to every consumer of the key
    pub fn preload(&self, pair: &str, timeframe: &str, candles: &[Candle]) {
        let key = FeedKey::new(pair, timeframe);
        info!("[SETUP] preloading {} candles for {}", candles.len(), key);
        let consumers = Self::consumers(&self.subscriptions, &key);
        for candle in candles.iter().filter(|c| c.complete) {
            for subscription in &consumers {
                (subscription.consumer)(candle.clone());
            }
        }
    }

    fn consumers(
        subscriptions: &RwLock<HashMap<FeedKey, Vec<Subscription>>>,
        key: &FeedKey,
    ) -> Vec<Subscription> {
        subscriptions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Open one exchange stream for every subscribed key
    pub async fn connect(&self) -> Result<()> {
        info!("Connecting to the exchange.");
        let keys = lock(&self.keys).clone();
        for key in keys {
            if lock(&self.streams).contains_key(&key) {
                continue;
            }
            let stream = self
                .feeder
                .candles_subscription(&key.pair, &key.timeframe)
                .await?;
            lock(&self.streams).insert(key, stream);
        }
        Ok(())
    }

    /// Connect, then run one dispatch loop per key
    ///
    /// With `synchronous`, returns only after every source stream has ended,
    /// which is how backtests know all historical data has been delivered.
    pub async fn start(&self, synchronous: bool) -> Result<()> {
        self.connect().await?;

        let streams: Vec<(FeedKey, CandleStream)> = lock(&self.streams).drain().collect();
        let mut handles = Vec::with_capacity(streams.len());
        for (key, stream) in streams {
            let subscriptions = self.subscriptions.clone();
            let notifier = self.notifier.clone();
            handles.push(tokio::spawn(Self::dispatch(key, stream, subscriptions, notifier)));
        }
        info!("Data feed connected.");

        if synchronous {
            for result in futures::future::join_all(handles).await {
                if let Err(e) = result {
                    return Err(EngineError::Stream(format!("dispatch task failed: {}", e)));
                }
            }
        } else {
            lock(&self.handles).extend(handles);
        }
        Ok(())
    }

    /// Abort every running dispatch loop
    pub fn stop(&self) {
        for handle in lock(&self.handles).drain(..) {
            handle.abort();
        }
    }

    async fn dispatch(
        key: FeedKey,
        mut stream: CandleStream,
        subscriptions: Arc<RwLock<HashMap<FeedKey, Vec<Subscription>>>>,
        notifier: Option<Arc<dyn Notifier>>,
    ) {
        let mut errors_open = true;
        loop {
            tokio::select! {
                candle = stream.candles.recv() => {
                    let Some(candle) = candle else {
                        debug!(key = %key, "candle stream ended");
                        return;
                    };
                    for subscription in Self::consumers(&subscriptions, &key) {
                        if subscription.only_completed && !candle.complete {
                            continue;
                        }
                        (subscription.consumer)(candle.clone());
                    }
                }
                err = stream.errors.recv(), if errors_open => {
                    match err {
                        Some(err) => {
                            error!(key = %key, "candle stream error: {}", err);
                            if let Some(notifier) = &notifier {
                                notifier.on_error(&err);
                            }
                        }
                        None => {
                            warn!(key = %key, "error stream closed");
                            errors_open = false;
                        }
                    }
                }
            }
        }
    }
}

impl Drop for CandleMultiplexer {
    fn drop(&mut self) {
        self.stop();
    }
}
