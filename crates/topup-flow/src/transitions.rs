//! # Checkout Transitions
//!
//! The checkout steps and the single table that says which event moves
//! which step where. Every step change in the orchestrator goes through
//! [`transition`].
//!
//! ```text
//! SelectingProduct ─► EnteringCredentials ─► ReviewingOrder ─► Submitting
//!                                                  ▲               │
//!                                                  └── failure ────┤
//!                                                                  ▼
//!            ┌──────────────── AwaitingPaymentMethod ◄── retry ── Failed
//!            ▼                         │                            ▲
//!  RedirectingToGateway ──► CapturingPayment ──────────────────────┘
//!                                  │
//!                                  ▼
//!                              Completed
//! ```

use serde::Serialize;
use std::fmt;
use topup_core::ShopError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStep {
    SelectingProduct,
    EnteringCredentials,
    ReviewingOrder,
    Submitting,
    AwaitingPaymentMethod,
    RedirectingToGateway,
    CapturingPayment,
    Completed,
    Failed,
    Cancelled,
}

impl CheckoutStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutStep::SelectingProduct => "selecting product",
            CheckoutStep::EnteringCredentials => "entering credentials",
            CheckoutStep::ReviewingOrder => "reviewing order",
            CheckoutStep::Submitting => "submitting",
            CheckoutStep::AwaitingPaymentMethod => "awaiting payment method",
            CheckoutStep::RedirectingToGateway => "redirecting to gateway",
            CheckoutStep::CapturingPayment => "capturing payment",
            CheckoutStep::Completed => "completed",
            CheckoutStep::Failed => "failed",
            CheckoutStep::Cancelled => "cancelled",
        }
    }

    /// No further events except `RetryPayment` (from `Failed`)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CheckoutStep::Completed | CheckoutStep::Failed | CheckoutStep::Cancelled
        )
    }
}

impl fmt::Display for CheckoutStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckoutEvent {
    ProductSelected,
    CredentialsEntered,
    SubmitRequested,
    OrderCreated,
    SubmissionFailed,
    RedirectStarted,
    DirectPaymentStarted,
    GatewayReturned,
    PaymentSucceeded,
    PaymentFailed,
    RetryPayment,
    /// Customer backed out of the checkout
    Cancel,
    /// Gateway reported the customer cancelled there
    GatewayCancelled,
    Back,
}

impl CheckoutEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutEvent::ProductSelected => "select a product",
            CheckoutEvent::CredentialsEntered => "enter credentials",
            CheckoutEvent::SubmitRequested => "submit the order",
            CheckoutEvent::OrderCreated => "accept a created order",
            CheckoutEvent::SubmissionFailed => "record a failed submission",
            CheckoutEvent::RedirectStarted => "redirect to the gateway",
            CheckoutEvent::DirectPaymentStarted => "submit a payment",
            CheckoutEvent::GatewayReturned => "capture a payment",
            CheckoutEvent::PaymentSucceeded => "complete the payment",
            CheckoutEvent::PaymentFailed => "fail the payment",
            CheckoutEvent::RetryPayment => "retry the payment",
            CheckoutEvent::Cancel => "cancel",
            CheckoutEvent::GatewayCancelled => "cancel at the gateway",
            CheckoutEvent::Back => "go back",
        }
    }
}

impl fmt::Display for CheckoutEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Next step for `event` in `step`, or `None` if the event is not allowed
pub fn transition(step: CheckoutStep, event: CheckoutEvent) -> Option<CheckoutStep> {
    use CheckoutEvent as E;
    use CheckoutStep as S;

    let next = match (step, event) {
        (S::SelectingProduct, E::ProductSelected) => S::EnteringCredentials,
        (S::SelectingProduct, E::Cancel) => S::Cancelled,

        (S::EnteringCredentials, E::CredentialsEntered) => S::ReviewingOrder,
        (S::EnteringCredentials, E::Back) => S::SelectingProduct,
        (S::EnteringCredentials, E::Cancel) => S::Cancelled,

        (S::ReviewingOrder, E::SubmitRequested) => S::Submitting,
        (S::ReviewingOrder, E::Back) => S::EnteringCredentials,
        (S::ReviewingOrder, E::Cancel) => S::Cancelled,

        (S::Submitting, E::OrderCreated) => S::AwaitingPaymentMethod,
        (S::Submitting, E::SubmissionFailed) => S::ReviewingOrder,
        (S::Submitting, E::Cancel) => S::Cancelled,

        (S::AwaitingPaymentMethod, E::RedirectStarted) => S::RedirectingToGateway,
        (S::AwaitingPaymentMethod, E::DirectPaymentStarted) => S::CapturingPayment,
        (S::AwaitingPaymentMethod, E::Cancel | E::GatewayCancelled) => S::Cancelled,

        (S::RedirectingToGateway, E::GatewayReturned) => S::CapturingPayment,
        (S::RedirectingToGateway, E::PaymentFailed) => S::Failed,
        (S::RedirectingToGateway, E::Cancel | E::GatewayCancelled) => S::Cancelled,

        (S::CapturingPayment, E::PaymentSucceeded) => S::Completed,
        (S::CapturingPayment, E::PaymentFailed) => S::Failed,

        (S::Failed, E::RetryPayment) => S::AwaitingPaymentMethod,
        (S::Failed, E::Cancel) => S::Cancelled,

        (S::SelectingProduct, _)
        | (S::EnteringCredentials, _)
        | (S::ReviewingOrder, _)
        | (S::Submitting, _)
        | (S::AwaitingPaymentMethod, _)
        | (S::RedirectingToGateway, _)
        | (S::CapturingPayment, _)
        | (S::Failed, _)
        | (S::Completed, _)
        | (S::Cancelled, _) => return None,
    };
    Some(next)
}

/// [`transition`] or an `InvalidTransition` error
pub fn next_step(step: CheckoutStep, event: CheckoutEvent) -> Result<CheckoutStep, ShopError> {
    transition(step, event).ok_or_else(|| ShopError::InvalidTransition {
        from: step.to_string(),
        event: event.to_string(),
    })
}
