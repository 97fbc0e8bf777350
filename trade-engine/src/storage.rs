//! Order storage contract and in-memory backend

use crate::error::{EngineError, Result};
use crate::exchange::{Order, OrderStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

/// Composable order query filter
#[derive(Debug, Clone, PartialEq)]
pub enum OrderFilter {
    Id(u64),
    StatusIn(Vec<OrderStatus>),
    Pair(String),
    UpdatedAtOrBefore(DateTime<Utc>),
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        match self {
            Self::Id(id) => order.id == *id,
            Self::StatusIn(statuses) => statuses.contains(&order.status),
            Self::Pair(pair) => &order.pair == pair,
            Self::UpdatedAtOrBefore(cutoff) => order.updated_at <= *cutoff,
        }
    }
}

/// Persistence for orders created by the engine
#[async_trait]
pub trait OrderStorage: Send + Sync {
    /// Persist a new order, assigning its storage id
    async fn create_order(&self, order: &mut Order) -> Result<()>;

    /// Overwrite a persisted order, matched by storage id
    async fn update_order(&self, order: &Order) -> Result<()>;

    /// Orders matching every filter, in creation order
    async fn orders(&self, filters: &[OrderFilter]) -> Result<Vec<Order>>;
}

/// Build the storage backend named in the configuration
pub fn from_backend(name: &str) -> Result<Arc<dyn OrderStorage>> {
    match name.to_lowercase().as_str() {
        "memory" | "mem" => Ok(Arc::new(MemoryStorage::new())),
        other => Err(EngineError::Config(format!("unknown storage backend: {}", other))),
    }
}

/// Volatile storage kept in process memory
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    next_id: u64,
    orders: Vec<Order>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|_| EngineError::Storage("memory storage lock poisoned".to_string()))
    }
}

#[async_trait]
impl OrderStorage for MemoryStorage {
    async fn create_order(&self, order: &mut Order) -> Result<()> {
        let mut inner = self.lock()?;
        inner.next_id += 1;
        order.id = inner.next_id;
        inner.orders.push(order.clone());
        Ok(())
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        let mut inner = self.lock()?;
        let stored = inner
            .orders
            .iter_mut()
            .find(|o| o.id == order.id)
            .ok_or_else(|| EngineError::OrderNotFound {
                pair: order.pair.clone(),
                id: order.id.to_string(),
            })?;
        *stored = order.clone();
        Ok(())
    }

    async fn orders(&self, filters: &[OrderFilter]) -> Result<Vec<Order>> {
        let inner = self.lock()?;
        Ok(inner
            .orders
            .iter()
            .filter(|o| filters.iter().all(|f| f.matches(o)))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{OrderSide, OrderType};

    fn order(pair: &str, status: OrderStatus) -> Order {
        let mut o = Order::new("x", pair, OrderSide::Buy, OrderType::Limit, 10.0, 1.0, Utc::now());
        o.status = status;
        o
    }

    #[tokio::test]
    async fn test_filters_compose() {
        let storage = MemoryStorage::new();
        for (pair, status) in [
            ("BTCUSDT", OrderStatus::New),
            ("BTCUSDT", OrderStatus::Filled),
            ("ETHUSDT", OrderStatus::New),
        ] {
            storage.create_order(&mut order(pair, status)).await.unwrap();
        }

        let open_btc = storage
            .orders(&[
                OrderFilter::StatusIn(OrderStatus::OPEN.to_vec()),
                OrderFilter::Pair("BTCUSDT".to_string()),
            ])
            .await
            .unwrap();
        assert_eq!(open_btc.len(), 1);
        assert_eq!(open_btc[0].id, 1);

        let all = storage.orders(&[]).await.unwrap();
        assert_eq!(all.iter().map(|o| o.id).collect::<Vec<_>>(), vec![1, 2, 3]);

        let none = storage
            .orders(&[OrderFilter::UpdatedAtOrBefore(Utc::now() - chrono::Duration::days(1))])
            .await
            .unwrap();
        assert!(none.is_empty());

        let by_id = storage.orders(&[OrderFilter::Id(3)]).await.unwrap();
        assert_eq!(by_id.len(), 1);
        assert_eq!(by_id[0].pair, "ETHUSDT");
        assert!(storage.orders(&[OrderFilter::Id(4)]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_unknown_order_fails() {
        let storage = MemoryStorage::new();
        let mut o = order("BTCUSDT", OrderStatus::New);
        o.id = 99;
        assert!(matches!(
            storage.update_order(&o).await,
            Err(EngineError::OrderNotFound { .. })
        ));
        assert!(from_backend("postgres").is_err());
        assert!(from_backend("memory").is_ok());
    }
}
