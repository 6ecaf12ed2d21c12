//! # Payment Gateway Traits
//!
//! Payment methods come in two shapes:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    GatewayAdapter (enum)                     │
//! ├────────────────────┬───────────────────────┬─────────────────┤
//! │ Redirect           │ Direct                │ Unavailable     │
//! │  create()  → URL   │  validate() (sync)    │  always errors  │
//! │  capture() → status│  submit()   → outcome │                 │
//! ├────────────────────┼───────────────────────┼─────────────────┤
//! │ PayPal             │ Card, Bank transfer   │ Local gateway   │
//! └────────────────────┴───────────────────────┴─────────────────┘
//! ```

use crate::error::{ShopError, ShopResult};
use crate::order::Order;
use crate::validation::{BankDetails, CardDetails};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Payment methods offered at checkout
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Paypal,
    CreditCard,
    BankTransfer,
    /// Local payment gateway, present but switched off
    Local,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Paypal => "paypal",
            PaymentMethod::CreditCard => "credit_card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Local => "local",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = ShopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paypal" => Ok(PaymentMethod::Paypal),
            "credit_card" | "card" => Ok(PaymentMethod::CreditCard),
            "bank_transfer" | "bank" => Ok(PaymentMethod::BankTransfer),
            "local" => Ok(PaymentMethod::Local),
            other => Err(ShopError::Validation(format!("Unknown payment method: {}", other))),
        }
    }
}

/// How a payment method completes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayCapability {
    RedirectBased,
    DirectSubmit,
}

/// Status reported by a capture or a direct submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    Completed,
    Pending,
    Declined,
}

impl CaptureStatus {
    /// Map a gateway status string onto our three outcomes
    pub fn from_gateway(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "completed" | "success" | "succeeded" | "paid" | "captured" | "already_captured" => {
                CaptureStatus::Completed
            }
            "pending" | "processing" => CaptureStatus::Pending,
            _ => CaptureStatus::Declined,
        }
    }
}

/// Final result of a payment attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Completed,
    Failed { reason: String },
    Cancelled,
}

/// One payment attempt for an order. Only one is active at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentAttempt {
    pub order_id: String,
    pub method: PaymentMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<PaymentOutcome>,
}

impl PaymentAttempt {
    pub fn new(order_id: impl Into<String>, method: PaymentMethod) -> Self {
        Self {
            order_id: order_id.into(),
            method,
            gateway_order_id: None,
            outcome: None,
        }
    }
}

/// Redirect-based approval returned by `create`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectApproval {
    pub approval_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_order_id: Option<String>,
}

/// Details entered for a direct-submit method
#[derive(Debug, Clone)]
pub enum PaymentDetails {
    Card(CardDetails),
    Bank(BankDetails),
}

impl PaymentDetails {
    pub fn method(&self) -> PaymentMethod {
        match self {
            PaymentDetails::Card(_) => PaymentMethod::CreditCard,
            PaymentDetails::Bank(_) => PaymentMethod::BankTransfer,
        }
    }

    /// Run field validation, returning normalised details
    pub fn validated(&self) -> ShopResult<PaymentDetails> {
        match self {
            PaymentDetails::Card(card) => card.validated().map(PaymentDetails::Card),
            PaymentDetails::Bank(bank) => bank.validated().map(PaymentDetails::Bank),
        }
    }
}

/// A gateway that sends the customer away and back again
#[async_trait]
pub trait RedirectGateway: Send + Sync {
    /// Create the gateway-side order and return where to send the customer
    async fn create(&self, order_id: &str) -> ShopResult<RedirectApproval>;

    /// Finalize the payment after the customer returns.
    /// Calling it twice with the same arguments re-confirms the first result.
    async fn capture(&self, order_id: &str, gateway_token: &str) -> ShopResult<CaptureStatus>;

    fn method(&self) -> PaymentMethod;
}

/// A gateway completed entirely within the current page
#[async_trait]
pub trait DirectGateway: Send + Sync {
    /// Synchronous field validation. Nothing goes to the network if this fails.
    fn validate(&self, details: &PaymentDetails) -> ShopResult<PaymentDetails>;

    /// Submit once and report the outcome
    async fn submit(&self, order: &Order, details: &PaymentDetails) -> ShopResult<CaptureStatus>;

    fn method(&self) -> PaymentMethod;
}

/// A payment method as the checkout sees it
#[derive(Clone)]
pub enum GatewayAdapter {
    Redirect(Arc<dyn RedirectGateway>),
    Direct(Arc<dyn DirectGateway>),
    /// Selectable but inert
    Unavailable { method: PaymentMethod },
}

impl GatewayAdapter {
    pub fn method(&self) -> PaymentMethod {
        match self {
            GatewayAdapter::Redirect(g) => g.method(),
            GatewayAdapter::Direct(g) => g.method(),
            GatewayAdapter::Unavailable { method } => *method,
        }
    }

    /// `None` for the disabled placeholder
    pub fn capability(&self) -> Option<GatewayCapability> {
        match self {
            GatewayAdapter::Redirect(_) => Some(GatewayCapability::RedirectBased),
            GatewayAdapter::Direct(_) => Some(GatewayCapability::DirectSubmit),
            GatewayAdapter::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.capability().is_some()
    }

    pub fn unavailable_error(method: PaymentMethod) -> ShopError {
        ShopError::GatewayUnavailable {
            method: method.to_string(),
        }
    }
}

impl std::fmt::Debug for GatewayAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayAdapter")
            .field("method", &self.method())
            .field("capability", &self.capability())
            .finish()
    }
}

/// Selectable method for rendering the payment step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodOption {
    pub method: PaymentMethod,
    pub available: bool,
}

/// Registry of payment methods
#[derive(Clone, Default)]
pub struct GatewaySelector {
    gateways: BTreeMap<PaymentMethod, GatewayAdapter>,
}

impl GatewaySelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gateway adapter
    pub fn register(&mut self, adapter: GatewayAdapter) {
        self.gateways.insert(adapter.method(), adapter);
    }

    /// Register with builder pattern
    pub fn with_gateway(mut self, adapter: GatewayAdapter) -> Self {
        self.register(adapter);
        self
    }

    /// Get an adapter by method
    pub fn get(&self, method: PaymentMethod) -> ShopResult<&GatewayAdapter> {
        self.gateways.get(&method).ok_or_else(|| {
            ShopError::Validation(format!("Payment method {} is not offered", method))
        })
    }

    /// Every registered method, including disabled ones
    pub fn options(&self) -> Vec<MethodOption> {
        self.gateways
            .values()
            .map(|g| MethodOption {
                method: g.method(),
                available: g.is_available(),
            })
            .collect()
    }

    pub fn has_method(&self, method: PaymentMethod) -> bool {
        self.gateways.contains_key(&method)
    }
}

impl std::fmt::Debug for GatewaySelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.gateways.values()).finish()
    }
}

/// Return and cancel URLs handed to redirect gateways
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    /// Base URL of the storefront (e.g., "https://shop.example.com")
    pub base_url: String,
    /// Return page path; receives `token` and `orderId`
    pub return_path: String,
    /// Cancel page path; receives `orderId`
    pub cancel_path: String,
}

impl CheckoutUrls {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            return_path: "/payment/success".to_string(),
            cancel_path: "/payment/cancel".to_string(),
        }
    }

    pub fn return_url(&self) -> String {
        format!("{}{}", self.base_url, self.return_path)
    }

    pub fn cancel_url(&self, order_id: &str) -> String {
        format!("{}{}?orderId={}", self.base_url, self.cancel_path, order_id)
    }
}

impl Default for CheckoutUrls {
    fn default() -> Self {
        Self::new("http://localhost:8080")
    }
}
