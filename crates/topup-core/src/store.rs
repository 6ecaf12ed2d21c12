//! # Durable Checkout Store
//!
//! Navigating to a redirect gateway outlives the in-memory checkout. Before
//! redirecting, the orchestrator saves just enough to resume: the order id
//! and the gateway. The return handler reads it back.
//!
//! Entries are keyed by order id, so one store can serve many customers'
//! returns at once.

use crate::error::ShopResult;
use crate::gateway::PaymentMethod;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Payment awaiting the customer's return from a gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPayment {
    pub order_id: String,
    pub method: PaymentMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_order_id: Option<String>,
    pub saved_at: DateTime<Utc>,
}

impl PendingPayment {
    pub fn new(order_id: impl Into<String>, method: PaymentMethod) -> Self {
        Self {
            order_id: order_id.into(),
            method,
            gateway_order_id: None,
            saved_at: Utc::now(),
        }
    }

    pub fn with_gateway_order_id(mut self, id: Option<String>) -> Self {
        self.gateway_order_id = id;
        self
    }
}

/// Durable storage for pending payments, one per order
#[async_trait]
pub trait CheckoutStore: Send + Sync {
    /// Save or replace the entry for `pending.order_id`
    async fn save_pending(&self, pending: &PendingPayment) -> ShopResult<()>;

    async fn load_pending(&self, order_id: &str) -> ShopResult<Option<PendingPayment>>;

    /// Remove the entry for `order_id`; a missing entry is not an error
    async fn clear_pending(&self, order_id: &str) -> ShopResult<()>;
}

/// In-process store, for tests and single-process demos
#[derive(Debug, Default)]
pub struct MemoryCheckoutStore {
    pending: Mutex<HashMap<String, PendingPayment>>,
}

impl MemoryCheckoutStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingPayment>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CheckoutStore for MemoryCheckoutStore {
    async fn save_pending(&self, pending: &PendingPayment) -> ShopResult<()> {
        self.entries()
            .insert(pending.order_id.clone(), pending.clone());
        Ok(())
    }

    async fn load_pending(&self, order_id: &str) -> ShopResult<Option<PendingPayment>> {
        Ok(self.entries().get(order_id).cloned())
    }

    async fn clear_pending(&self, order_id: &str) -> ShopResult<()> {
        self.entries().remove(order_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_lifecycle() {
        let store = MemoryCheckoutStore::new();
        assert!(store.load_pending("ord_1").await.unwrap().is_none());

        let pending = PendingPayment::new("ord_1", PaymentMethod::Paypal)
            .with_gateway_order_id(Some("PP-9".into()));
        let other = PendingPayment::new("ord_2", PaymentMethod::Paypal);
        store.save_pending(&pending).await.unwrap();
        store.save_pending(&other).await.unwrap();
        assert_eq!(store.load_pending("ord_1").await.unwrap(), Some(pending));

        store.clear_pending("ord_1").await.unwrap();
        assert!(store.load_pending("ord_1").await.unwrap().is_none());
        assert_eq!(store.load_pending("ord_2").await.unwrap(), Some(other));
    }

    #[test]
    fn test_pending_wire_format() {
        let pending = PendingPayment::new("ord_1", PaymentMethod::Paypal);
        let json = serde_json::to_value(&pending).unwrap();
        assert_eq!(json["orderId"], "ord_1");
        assert_eq!(json["method"], "paypal");
    }
}
