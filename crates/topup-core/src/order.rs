//! # Order Types
//!
//! Orders as stored by the backend, the write-only creation payload and the
//! repository seam the checkout flow talks to.

use crate::catalog::{Currency, Price, Quantity};
use crate::error::{ShopError, ShopResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created, awaiting payment
    #[default]
    Pending,
    /// Payment captured, awaiting fulfillment
    Paid,
    /// Support staff are delivering the points
    Processing,
    /// Points delivered
    Completed,
    /// Payment failed
    Failed,
    /// Cancelled before payment
    Cancelled,
}

impl OrderStatus {
    pub fn is_paid(&self) -> bool {
        matches!(
            self,
            OrderStatus::Paid | OrderStatus::Processing | OrderStatus::Completed
        )
    }
}

/// In-game login used to deliver the points.
///
/// Sent once with the order and never read back.
#[derive(Clone, Serialize)]
pub struct GameCredentials {
    #[serde(rename = "game_login_username")]
    pub username: String,
    #[serde(rename = "game_login_password")]
    password: String,
}

impl GameCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Both fields must be non-blank
    pub fn validate(&self) -> ShopResult<()> {
        if self.username.trim().is_empty() {
            return Err(ShopError::Validation("Game login username is required".to_string()));
        }
        if self.password.trim().is_empty() {
            return Err(ShopError::Validation("Game login password is required".to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for GameCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Payload for `POST /orders`
#[derive(Debug, Clone, Serialize)]
pub struct NewOrder {
    #[serde(rename = "gameId")]
    pub game_id: String,
    #[serde(rename = "denominationId")]
    pub denomination_id: String,
    #[serde(flatten)]
    pub credentials: GameCredentials,
    pub customer_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
    pub quantity: Quantity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Unit price the customer saw. The backend recomputes the charge.
    #[serde(skip)]
    pub unit_price: Price,
    /// One key per submission, sent as `Idempotency-Key`
    #[serde(skip)]
    pub idempotency_key: String,
}

impl NewOrder {
    /// Total the customer was shown, `unit_price × quantity`
    pub fn expected_total(&self) -> ShopResult<Price> {
        self.unit_price.times(self.quantity)
    }
}

/// An order record as returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    #[serde(alias = "gameId")]
    pub game_id: String,
    #[serde(alias = "denominationId")]
    pub denomination_id: String,
    pub customer_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
    pub quantity: Quantity,
    pub price_per_unit: i64,
    pub total_price: i64,
    #[serde(default)]
    pub currency: Currency,
    #[serde(default)]
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_gateway: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfilled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Order {
    /// Order total
    pub fn total(&self) -> Price {
        Price::new(self.total_price, self.currency)
    }

    /// `total_price == price_per_unit × quantity` must hold for every order we hand out
    pub fn check_totals(&self) -> ShopResult<()> {
        let expected = Price::new(self.price_per_unit, self.currency).times(self.quantity)?;
        if expected.amount != self.total_price {
            return Err(ShopError::Server {
                status: None,
                message: format!(
                    "Order {} has inconsistent totals: {} x {} != {}",
                    self.id,
                    self.price_per_unit,
                    self.quantity.get(),
                    self.total_price
                ),
            });
        }
        Ok(())
    }
}

/// Read-through access to backend orders
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Create an order. Called exactly once per checkout submission.
    async fn create(&self, order: &NewOrder) -> ShopResult<Order>;

    /// Fetch an order by ID
    async fn get(&self, order_id: &str) -> ShopResult<Order>;
}
