//! # Order Repository
//!
//! `OrderRepository` and `CatalogSource` over the backend's REST functions.
//! Every order handed back to callers has passed `Order::check_totals`.

use crate::executor::{ApiRequest, OperationKind, RequestExecutor};
use async_trait::async_trait;
use serde::Deserialize;
use topup_core::{Catalog, CatalogSource, NewOrder, Order, OrderRepository, ShopError, ShopResult};
use tracing::{debug, info, instrument, warn};

/// Accepts both `{ "order": {...} }` and a bare order object
#[derive(Deserialize)]
#[serde(untagged)]
enum OrderEnvelope {
    Wrapped { order: Order },
    Bare(Order),
}

impl OrderEnvelope {
    fn into_order(self) -> Order {
        match self {
            OrderEnvelope::Wrapped { order } | OrderEnvelope::Bare(order) => order,
        }
    }
}

/// Backend-backed orders and catalog
#[derive(Debug, Clone)]
pub struct HttpOrderRepository {
    executor: RequestExecutor,
}

impl HttpOrderRepository {
    pub fn new(executor: RequestExecutor) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl OrderRepository for HttpOrderRepository {
    #[instrument(skip(self, order), fields(game_id = %order.game_id, quantity = order.quantity.get()))]
    async fn create(&self, order: &NewOrder) -> ShopResult<Order> {
        let request = ApiRequest::post("/orders")
            .operation("create order")
            .kind(OperationKind::Write)
            .header("Idempotency-Key", order.idempotency_key.clone())
            .json(order)?;

        let created = self
            .executor
            .execute::<OrderEnvelope>(request)
            .await?
            .into_order();
        created.check_totals()?;

        if created.game_id != order.game_id
            || created.denomination_id != order.denomination_id
            || created.quantity != order.quantity
        {
            return Err(ShopError::Server {
                status: None,
                message: format!("Order {} does not match what was submitted", created.id),
            });
        }

        let expected = order.expected_total()?;
        if created.total_price != expected.amount {
            // The backend prices the order; the client figure is only what was displayed
            warn!(
                order_id = %created.id,
                displayed = expected.amount,
                charged = created.total_price,
                "Backend total differs from displayed total"
            );
        }

        info!(order_id = %created.id, total = created.total_price, "Order created");
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn get(&self, order_id: &str) -> ShopResult<Order> {
        let request = ApiRequest::get("/orders").segment(order_id).operation("load order");

        let order = self
            .executor
            .execute::<OrderEnvelope>(request)
            .await
            .map_err(|e| match ShopError::from(e) {
                ShopError::NotFound(_) => ShopError::NotFound(format!("order {}", order_id)),
                other => other,
            })?
            .into_order();
        order.check_totals()?;

        debug!(status = ?order.status, "Order loaded");
        Ok(order)
    }
}

#[async_trait]
impl CatalogSource for HttpOrderRepository {
    #[instrument(skip(self))]
    async fn fetch_catalog(&self) -> ShopResult<Catalog> {
        let request = ApiRequest::get("/products").operation("load products");
        let catalog: Catalog = self.executor.execute(request).await?;

        debug!(
            games = catalog.games.len(),
            denominations = catalog.denominations.len(),
            "Catalog loaded"
        );
        Ok(catalog)
    }
}
