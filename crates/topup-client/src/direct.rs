//! # Direct-Submit Gateways
//!
//! Card and bank transfer payments completed in-page: validate the fields
//! locally, then one `POST /payments/process` under the payment timeout.

use crate::executor::{ApiRequest, OperationKind, RequestError, RequestExecutor};
use crate::paypal::PayPalGateway;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use topup_core::{
    CaptureStatus, CheckoutUrls, DirectGateway, GatewayAdapter, GatewaySelector, Order,
    PaymentDetails, PaymentMethod, ShopError, ShopResult,
};
use tracing::{info, instrument, warn};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessRequest<'a> {
    order_id: &'a str,
    payment_method: PaymentMethod,
    amount: i64,
    currency: &'static str,
    payment_details: Value,
}

#[derive(Deserialize)]
struct ProcessResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// Card or bank transfer, depending on `method`
pub struct DirectPaymentGateway {
    executor: RequestExecutor,
    method: PaymentMethod,
}

impl DirectPaymentGateway {
    pub fn card(executor: RequestExecutor) -> Self {
        Self {
            executor,
            method: PaymentMethod::CreditCard,
        }
    }

    pub fn bank_transfer(executor: RequestExecutor) -> Self {
        Self {
            executor,
            method: PaymentMethod::BankTransfer,
        }
    }

    fn failure(&self, err: RequestError) -> ShopError {
        match err {
            RequestError::Http { status, message } if matches!(status, 400 | 402 | 422) => {
                ShopError::Gateway {
                    gateway: self.method.to_string(),
                    message,
                }
            }
            other => other.into(),
        }
    }
}

#[async_trait]
impl DirectGateway for DirectPaymentGateway {
    fn validate(&self, details: &PaymentDetails) -> ShopResult<PaymentDetails> {
        if details.method() != self.method {
            return Err(ShopError::Validation(format!(
                "{} details cannot be used for {}",
                details.method(),
                self.method
            )));
        }
        details.validated()
    }

    #[instrument(skip(self, order, details), fields(order_id = %order.id, method = %self.method))]
    async fn submit(&self, order: &Order, details: &PaymentDetails) -> ShopResult<CaptureStatus> {
        let details = self.validate(details)?;
        let payment_details = match &details {
            PaymentDetails::Card(card) => serde_json::to_value(card),
            PaymentDetails::Bank(bank) => serde_json::to_value(bank),
        }
        .map_err(|e| ShopError::Serialization(e.to_string()))?;

        let request = ApiRequest::post("/payments/process")
            .operation("process payment")
            .kind(OperationKind::Payment)
            .json(&ProcessRequest {
                order_id: &order.id,
                payment_method: self.method,
                amount: order.total_price,
                currency: order.currency.as_str(),
                payment_details,
            })?;

        let response: ProcessResponse = self
            .executor
            .execute(request)
            .await
            .map_err(|e| self.failure(e))?;

        let status = CaptureStatus::from_gateway(&response.status);
        match status {
            CaptureStatus::Declined => {
                warn!(status = %response.status, "Payment declined");
                Err(ShopError::Gateway {
                    gateway: self.method.to_string(),
                    message: response
                        .message
                        .unwrap_or_else(|| "Payment was declined".to_string()),
                })
            }
            _ => {
                info!(?status, "Payment processed");
                Ok(status)
            }
        }
    }

    fn method(&self) -> PaymentMethod {
        self.method
    }
}

/// The local gateway is offered but switched off
pub fn local_gateway() -> GatewayAdapter {
    GatewayAdapter::Unavailable {
        method: PaymentMethod::Local,
    }
}

/// Every payment method the storefront offers
pub fn default_selector(executor: &RequestExecutor, urls: CheckoutUrls) -> GatewaySelector {
    GatewaySelector::new()
        .with_gateway(GatewayAdapter::Redirect(Arc::new(PayPalGateway::new(
            executor.clone(),
            urls,
        ))))
        .with_gateway(GatewayAdapter::Direct(Arc::new(DirectPaymentGateway::card(
            executor.clone(),
        ))))
        .with_gateway(GatewayAdapter::Direct(Arc::new(
            DirectPaymentGateway::bank_transfer(executor.clone()),
        )))
        .with_gateway(local_gateway())
}
