//! Trading engine
//!
//! Wires the market data multiplexer, the candle sequencer, one strategy
//! controller per pair and the order controller, and drives them either
//! live (blocking drain until stopped) or as a backtest (bulk drain of a
//! finite replay).

pub mod report;

pub use report::*;

use crate::config::EngineConfig;
use crate::data::{Candle, CandleConsumer, CandleMultiplexer};
use crate::error::{EngineError, Result};
use crate::exchange::{Exchange, Feeder, Order, PaperWallet};
use crate::notification::Notifier;
use crate::order::{ControllerStatus, OrderConsumer, OrderController, OrderFeed, TradeSummary};
use crate::sequencer::CandleSequencer;
use crate::storage::{from_backend, OrderStorage};
use crate::strategy::{StrategyController, StrategyKind};
use crate::telemetry::build_info;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Collects collaborators before the engine is assembled
pub struct EngineBuilder {
    config: EngineConfig,
    exchange: Arc<dyn Exchange>,
    feeder: Arc<dyn Feeder>,
    strategy: StrategyKind,
    storage: Option<Arc<dyn OrderStorage>>,
    notifier: Option<Arc<dyn Notifier>>,
    paper_wallet: Option<Arc<PaperWallet>>,
    backtest: bool,
}

impl EngineBuilder {
    /// Use this storage instead of the configured backend
    pub fn with_storage(mut self, storage: Arc<dyn OrderStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Trade against a simulated wallet; it also becomes the data source
    pub fn with_paper_wallet(mut self, wallet: Arc<PaperWallet>) -> Self {
        self.exchange = wallet.clone();
        self.feeder = wallet.clone();
        self.paper_wallet = Some(wallet);
        self
    }

    /// Replay mode: finite sources, bulk drain, reconciliation per candle
    pub fn backtest(mut self, backtest: bool) -> Self {
        self.backtest = backtest;
        self
    }

    /// Validate the configuration and assemble the engine
    pub fn build(self) -> Result<Engine> {
        self.config.validate()?;
        if self.strategy.timeframe().is_empty() {
            return Err(EngineError::Config("strategy timeframe is empty".to_string()));
        }
        let storage = match self.storage {
            Some(storage) => storage,
            None => from_backend(&self.config.storage)?,
        };

        let order_feed = Arc::new(OrderFeed::new(self.config.order_feed_buffer));
        let mut order_controller =
            OrderController::new(self.exchange.clone(), storage, order_feed.clone())
                .with_oco_policy(self.config.oco_policy)
                .with_reconcile_interval(Duration::from_millis(self.config.reconcile_interval_ms));
        let mut multiplexer = CandleMultiplexer::new(self.feeder.clone());
        if let Some(notifier) = &self.notifier {
            order_controller = order_controller.with_notifier(notifier.clone());
            multiplexer = multiplexer.with_notifier(notifier.clone());
        }
        let order_controller = Arc::new(order_controller);

        let strategy_controllers = self
            .config
            .pairs
            .iter()
            .map(|pair| {
                let controller = StrategyController::new(
                    pair,
                    self.strategy.clone(),
                    order_controller.clone(),
                    self.config.max_window,
                );
                (pair.clone(), Arc::new(controller))
            })
            .collect();

        let (done, _) = watch::channel(false);
        Ok(Engine {
            config: self.config,
            feeder: self.feeder,
            strategy: self.strategy,
            notifier: self.notifier,
            paper_wallet: self.paper_wallet,
            backtest: self.backtest,
            sequencer: Arc::new(CandleSequencer::new()),
            multiplexer,
            order_feed,
            order_controller,
            strategy_controllers,
            running: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            done,
        })
    }
}

pub struct Engine {
    config: EngineConfig,
    feeder: Arc<dyn Feeder>,
    strategy: StrategyKind,
    notifier: Option<Arc<dyn Notifier>>,
    paper_wallet: Option<Arc<PaperWallet>>,
    backtest: bool,
    sequencer: Arc<CandleSequencer>,
    multiplexer: CandleMultiplexer,
    order_feed: Arc<OrderFeed>,
    order_controller: Arc<OrderController>,
    strategy_controllers: HashMap<String, Arc<StrategyController>>,
    running: AtomicBool,
    shut_down: AtomicBool,
    done: watch::Sender<bool>,
}

impl Engine {
    pub fn builder<E: Exchange + 'static>(
        config: EngineConfig,
        exchange: Arc<E>,
        strategy: StrategyKind,
    ) -> EngineBuilder {
        EngineBuilder {
            config,
            exchange: exchange.clone(),
            feeder: exchange,
            strategy,
            storage: None,
            notifier: None,
            paper_wallet: None,
            backtest: false,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_backtest(&self) -> bool {
        self.backtest
    }

    pub fn order_controller(&self) -> &Arc<OrderController> {
        &self.order_controller
    }

    pub fn strategy_controller(&self, pair: &str) -> Option<&Arc<StrategyController>> {
        self.strategy_controllers.get(pair)
    }

    pub fn status(&self) -> ControllerStatus {
        self.order_controller.status()
    }

    /// Observe order events of a pair
    pub fn subscribe_orders(&self, pair: &str, consumer: OrderConsumer, only_new: bool) {
        self.order_feed.subscribe(pair, consumer, only_new);
    }

    /// Observe candles of a (pair, timeframe) key alongside the strategy
    pub fn subscribe_candles(
        &self,
        pair: &str,
        timeframe: &str,
        consumer: CandleConsumer,
        only_completed: bool,
    ) {
        self.multiplexer
            .subscribe(pair, timeframe, consumer, only_completed);
    }

    pub async fn summary(&self) -> Vec<TradeSummary> {
        self.order_controller.summaries().await
    }

    pub async fn report(&self) -> EngineReport {
        let wallet = self.paper_wallet.as_ref().map(|wallet| WalletReport {
            quote_asset: wallet.quote_asset().to_string(),
            initial_equity: wallet.initial_equity(),
            final_equity: wallet.equity(),
            max_drawdown: wallet.max_drawdown(),
        });
        EngineReport::new(self.summary().await, wallet)
    }

    /// Run until the sources end (backtest) or [`stop`](Self::stop) is called
    pub async fn run(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(EngineError::Config("engine is already running".to_string()));
        }
        info!("{}", build_info());
        info!(
            "[SETUP] {} on {} ({}), backtest: {}",
            self.strategy.name(),
            self.config.pairs.join(", "),
            self.strategy.timeframe(),
            self.backtest
        );

        let result = self.run_inner().await;
        self.shutdown().await;
        self.running.store(false, Ordering::SeqCst);
        self.done.send_replace(true);
        result
    }

    async fn run_inner(&self) -> Result<()> {
        let timeframe = self.strategy.timeframe().to_string();
        for pair in &self.config.pairs {
            if let Some(notifier) = &self.notifier {
                let notifier = notifier.clone();
                self.order_feed
                    .subscribe(pair, Arc::new(move |order: &Order| notifier.on_order(order)), false);
            }
            if !self.backtest {
                self.preload(pair, &timeframe).await?;
            }
            let sequencer = self.sequencer.clone();
            self.multiplexer.subscribe(
                pair,
                &timeframe,
                Arc::new(move |candle| sequencer.push(candle)),
                false,
            );
        }

        for controller in self.strategy_controllers.values() {
            controller.start();
        }
        if self.backtest {
            self.order_controller.start_manual();
        } else {
            self.order_controller.start();
        }
        self.order_feed.start();

        if self.backtest {
            self.multiplexer.start(true).await?;
            let total = self.sequencer.len();
            info!("[SETUP] replaying {} candles", total);
            while let Some(candle) = self.sequencer.pop() {
                self.process_candle(candle).await;
            }
            info!("[SETUP] backtest finished");
        } else {
            self.multiplexer.start(false).await?;
            while let Some(candle) = self.sequencer.pop_wait().await {
                self.process_candle(candle).await;
            }
        }
        Ok(())
    }

    /// Warm a pair's window with recent history before trading starts
    async fn preload(&self, pair: &str, timeframe: &str) -> Result<()> {
        let candles = self
            .feeder
            .candles_by_limit(pair, timeframe, self.strategy.warmup_period())
            .await?;
        for candle in &candles {
            self.process_candle(candle.clone()).await;
        }
        self.multiplexer.preload(pair, timeframe, &candles);
        Ok(())
    }

    async fn process_candle(&self, candle: Candle) {
        debug!(pair = %candle.pair, time = %candle.time, complete = candle.complete, "candle");
        if let Some(wallet) = &self.paper_wallet {
            wallet.on_candle(&candle);
        }
        self.order_controller.on_candle(&candle);
        if self.backtest {
            self.order_controller.reconcile().await;
        }

        let Some(controller) = self.strategy_controllers.get(&candle.pair) else {
            return;
        };
        if candle.complete {
            controller.on_candle(&candle).await;
        } else {
            controller.on_partial_candle(&candle).await;
        }
    }

    /// Stop feeding candles, drain what is queued, reconcile once more and
    /// close the order feed
    pub async fn stop(&self) {
        info!("Stopping engine...");
        self.multiplexer.stop();
        self.sequencer.close();
        if self.running.load(Ordering::SeqCst) {
            let mut done = self.done.subscribe();
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.shutdown().await;
    }

    async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.sequencer.close();
        self.order_controller.stop().await;
        self.order_feed.stop().await;
        info!("Engine stopped.");
    }
}
