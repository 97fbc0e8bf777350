//! Notification contract

use crate::error::EngineError;
use crate::exchange::Order;
use tracing::{error, info};

/// Receives human-facing engine events (chat, mail, dashboards)
///
/// Calls must not block; implementations queue their own delivery.
pub trait Notifier: Send + Sync {
    fn notify(&self, text: &str);
    fn on_order(&self, order: &Order);
    fn on_error(&self, err: &EngineError);
}

/// Notifier that writes everything to the log
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, text: &str) {
        info!(target: "notification", "{}", text);
    }

    fn on_order(&self, order: &Order) {
        info!(target: "notification", "{}", order);
    }

    fn on_error(&self, err: &EngineError) {
        error!(target: "notification", "{}", err);
    }
}
