//! Per-pair strategy dispatch
//!
//! Keeps the rolling window of one pair and calls the strategy once the
//! window holds at least the warm-up period.

use crate::data::{Candle, Dataframe};
use crate::exchange::Broker;
use crate::strategy::StrategyKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error};

struct Window {
    dataframe: Dataframe,
    /// Whether the newest row belongs to a closed period
    tail_complete: bool,
}

pub struct StrategyController {
    pair: String,
    strategy: StrategyKind,
    broker: Arc<dyn Broker>,
    max_window: usize,
    started: AtomicBool,
    window: Mutex<Window>,
}

impl StrategyController {
    /// `max_window` is raised to the warm-up period when smaller
    pub fn new(
        pair: &str,
        strategy: StrategyKind,
        broker: Arc<dyn Broker>,
        max_window: usize,
    ) -> Self {
        let max_window = max_window.max(strategy.warmup_period());
        Self {
            pair: pair.to_string(),
            strategy,
            broker,
            max_window,
            started: AtomicBool::new(false),
            window: Mutex::new(Window {
                dataframe: Dataframe::new(pair),
                tail_complete: true,
            }),
        }
    }

    pub fn pair(&self) -> &str {
        &self.pair
    }

    pub fn strategy(&self) -> &StrategyKind {
        &self.strategy
    }

    /// Enable strategy callbacks; candles before this only fill the window
    pub fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Number of rows currently held
    pub async fn len(&self) -> usize {
        self.window.lock().await.dataframe.len()
    }

    pub async fn is_ready(&self) -> bool {
        self.len().await >= self.strategy.warmup_period()
    }

    /// Copy of the retained window
    pub async fn dataframe(&self) -> Dataframe {
        self.window.lock().await.dataframe.clone()
    }

    fn sample(&self, dataframe: &Dataframe) -> Dataframe {
        let mut sample = if self.strategy.full_history() {
            dataframe.clone()
        } else {
            dataframe.sample(self.strategy.warmup_period())
        };
        self.strategy.indicators(&mut sample);
        sample
    }

    /// Handle a complete candle
    ///
    /// A candle is accepted when it is newer than the tail, or revises a
    /// tail that is still in progress. Anything else is dropped.
    pub async fn on_candle(&self, candle: &Candle) {
        let mut window = self.window.lock().await;
        match window.dataframe.last_time() {
            Some(last) if candle.time == last && !window.tail_complete => {
                window.dataframe.replace_last(candle);
            }
            Some(last) if candle.time <= last => {
                error!(
                    pair = %self.pair,
                    time = %candle.time,
                    last = %last,
                    "late candle dropped"
                );
                return;
            }
            _ => window.dataframe.push(candle),
        }
        window.tail_complete = true;
        window.dataframe.truncate_front(self.max_window);

        if window.dataframe.len() < self.strategy.warmup_period() {
            debug!(pair = %self.pair, rows = window.dataframe.len(), "warming up");
            return;
        }
        let sample = self.sample(&window.dataframe);
        if self.is_started() {
            self.strategy.on_candle(&sample, self.broker.as_ref()).await;
        }
    }

    /// Handle an in-progress candle; only high-frequency strategies see it
    pub async fn on_partial_candle(&self, candle: &Candle) {
        if !self.strategy.supports_partial() || candle.complete {
            return;
        }
        let mut window = self.window.lock().await;
        if window.dataframe.len() < self.strategy.warmup_period() {
            return;
        }
        match window.dataframe.last_time() {
            Some(last) if candle.time == last && !window.tail_complete => {
                window.dataframe.replace_last(candle);
            }
            Some(last) if candle.time <= last => {
                debug!(pair = %self.pair, time = %candle.time, "stale partial candle dropped");
                return;
            }
            _ => {
                window.dataframe.push(candle);
                window.tail_complete = false;
                window.dataframe.truncate_front(self.max_window);
            }
        }

        let sample = self.sample(&window.dataframe);
        if self.is_started() {
            self.strategy
                .on_partial_candle(&sample, self.broker.as_ref())
                .await;
        }
    }
}
