//! # PayPal Gateway
//!
//! Redirect-based gateway. `create` asks the backend for a PayPal order and
//! an approval URL; the customer approves on PayPal and comes back to the
//! storefront's return URL with a `token`, which `capture` finalizes.
//!
//! Capture is idempotent per `(order_id, token)`: every request carries an
//! `Idempotency-Key`, and a pair already seen as completed is re-confirmed
//! without another network call.

use crate::executor::{ApiRequest, OperationKind, RequestError, RequestExecutor};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Mutex;
use topup_core::{
    CaptureStatus, CheckoutUrls, PaymentMethod, RedirectApproval, RedirectGateway, ShopError,
    ShopResult,
};
use tracing::{debug, info, instrument, warn};

const GATEWAY: &str = "paypal";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest<'a> {
    order_id: &'a str,
    return_url: String,
    cancel_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateResponse {
    #[serde(default)]
    approval_url: Option<String>,
    #[serde(default)]
    paypal_order_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CaptureRequest<'a> {
    order_id: &'a str,
    gateway_token: &'a str,
}

#[derive(Deserialize)]
struct CaptureResponse {
    status: String,
}

/// `Idempotency-Key` for a capture: hex SHA-256 of `order_id:token`
pub fn capture_idempotency_key(order_id: &str, gateway_token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(order_id.as_bytes());
    hasher.update(b":");
    hasher.update(gateway_token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Gateway rejections come back as 4xx with the reason in the payload
fn gateway_failure(err: RequestError) -> ShopError {
    match err {
        RequestError::Http { status, message } if matches!(status, 400 | 402 | 409 | 422) => {
            ShopError::Gateway {
                gateway: GATEWAY.to_string(),
                message,
            }
        }
        other => other.into(),
    }
}

/// PayPal via the backend's payment functions
pub struct PayPalGateway {
    executor: RequestExecutor,
    urls: CheckoutUrls,
    captured: Mutex<HashSet<(String, String)>>,
}

impl PayPalGateway {
    pub fn new(executor: RequestExecutor, urls: CheckoutUrls) -> Self {
        Self {
            executor,
            urls,
            captured: Mutex::new(HashSet::new()),
        }
    }

    fn already_captured(&self, order_id: &str, gateway_token: &str) -> bool {
        self.captured
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&(order_id.to_string(), gateway_token.to_string()))
    }

    fn mark_captured(&self, order_id: &str, gateway_token: &str) {
        self.captured
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((order_id.to_string(), gateway_token.to_string()));
    }
}

#[async_trait]
impl RedirectGateway for PayPalGateway {
    #[instrument(skip(self))]
    async fn create(&self, order_id: &str) -> ShopResult<RedirectApproval> {
        let body = CreateRequest {
            order_id,
            return_url: format!("{}?orderId={}", self.urls.return_url(), order_id),
            cancel_url: self.urls.cancel_url(order_id),
        };
        let request = ApiRequest::post("/payments/paypal/create")
            .operation("create PayPal payment")
            .kind(OperationKind::Payment)
            .json(&body)?;

        let response: CreateResponse = self
            .executor
            .execute(request)
            .await
            .map_err(gateway_failure)?;

        let approval_url = response
            .approval_url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ShopError::Gateway {
                gateway: GATEWAY.to_string(),
                message: "PayPal did not return an approval link".to_string(),
            })?;

        info!(paypal_order_id = ?response.paypal_order_id, "PayPal payment created");
        Ok(RedirectApproval {
            approval_url,
            gateway_order_id: response.paypal_order_id,
        })
    }

    #[instrument(skip(self, gateway_token))]
    async fn capture(&self, order_id: &str, gateway_token: &str) -> ShopResult<CaptureStatus> {
        if self.already_captured(order_id, gateway_token) {
            debug!("Capture already completed, re-confirming");
            return Ok(CaptureStatus::Completed);
        }

        let request = ApiRequest::post("/payments/paypal/capture")
            .operation("capture PayPal payment")
            .kind(OperationKind::Payment)
            .header(
                "Idempotency-Key",
                capture_idempotency_key(order_id, gateway_token),
            )
            .json(&CaptureRequest {
                order_id,
                gateway_token,
            })?;

        let response: CaptureResponse = self
            .executor
            .execute(request)
            .await
            .map_err(gateway_failure)?;

        let status = CaptureStatus::from_gateway(&response.status);
        match status {
            CaptureStatus::Completed => {
                self.mark_captured(order_id, gateway_token);
                info!("PayPal payment captured");
            }
            CaptureStatus::Pending => info!("PayPal capture pending"),
            CaptureStatus::Declined => warn!(status = %response.status, "PayPal capture declined"),
        }
        Ok(status)
    }

    fn method(&self) -> PaymentMethod {
        PaymentMethod::Paypal
    }
}
