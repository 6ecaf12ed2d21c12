//! # Checkout Orchestrator
//!
//! Drives one checkout from product selection to a paid order.
//!
//! State sits behind a `std::sync::Mutex` that is only held for short
//! synchronous sections, never across an `.await`. Each entry into
//! `Submitting` or `CapturingPayment` bumps an epoch; a network result that
//! comes back under an older epoch is discarded.

use crate::transitions::{next_step, CheckoutEvent, CheckoutStep};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use topup_core::{
    validate_email, validate_phone, CaptureStatus, Catalog, CheckoutStore, DirectGateway,
    GameCredentials, GatewayAdapter, GatewaySelector, MethodOption, NewOrder, Order,
    OrderRepository, PaymentAttempt, PaymentDetails, PaymentMethod, PaymentOutcome,
    PendingPayment, Price, Quantity, RedirectGateway, ShopError, ShopResult,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Collaborators of a checkout
#[derive(Clone)]
pub struct CheckoutDeps {
    pub orders: Arc<dyn OrderRepository>,
    pub gateways: GatewaySelector,
    pub store: Arc<dyn CheckoutStore>,
}

/// Contact fields of the review form
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContactDetails {
    pub email: String,
    pub phone: Option<String>,
    pub notes: Option<String>,
}

impl ContactDetails {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            ..Self::default()
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    fn validate(&self) -> ShopResult<()> {
        validate_email(&self.email)?;
        match self.phone.as_deref().map(str::trim) {
            Some(phone) if !phone.is_empty() => validate_phone(phone),
            _ => Ok(()),
        }
    }
}

/// What the caller should do after `pay`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "next", rename_all = "snake_case")]
pub enum PaymentProgress {
    /// Send the customer to the gateway
    Redirect { approval_url: String },
    Completed,
    /// Accepted, settlement still pending at the gateway
    Pending,
}

/// Read-only view for the UI
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSnapshot {
    pub step: CheckoutStep,
    pub game_id: Option<String>,
    pub denomination_id: Option<String>,
    pub quantity: Quantity,
    /// Current selection priced from the catalog snapshot
    pub total: Option<Price>,
    pub submission_in_flight: bool,
    pub order: Option<Order>,
    pub attempt: Option<PaymentAttempt>,
    pub error_message: Option<String>,
    #[serde(skip)]
    pub last_error: Option<ShopError>,
}

struct CheckoutState {
    step: CheckoutStep,
    catalog: Catalog,
    game_id: Option<String>,
    denomination_id: Option<String>,
    quantity: Quantity,
    credentials: Option<GameCredentials>,
    contact: ContactDetails,
    submission_in_flight: bool,
    order: Option<Order>,
    attempt: Option<PaymentAttempt>,
    capture_token: Option<String>,
    last_error: Option<ShopError>,
    epoch: u64,
}

impl CheckoutState {
    fn new(step: CheckoutStep, catalog: Catalog) -> Self {
        Self {
            step,
            catalog,
            game_id: None,
            denomination_id: None,
            quantity: Quantity::ONE,
            credentials: None,
            contact: ContactDetails::default(),
            submission_in_flight: false,
            order: None,
            attempt: None,
            capture_token: None,
            last_error: None,
            epoch: 0,
        }
    }

    /// Record and return an error
    fn fail(&mut self, err: ShopError) -> ShopError {
        self.last_error = Some(err.clone());
        err
    }

    fn advance(&mut self, event: CheckoutEvent) -> ShopResult<CheckoutStep> {
        let next = next_step(self.step, event)?;
        debug!(from = %self.step, to = %next, "Checkout step");
        self.step = next;
        Ok(next)
    }

    fn unit_price(&self) -> ShopResult<Price> {
        let (game_id, denomination_id) = match (&self.game_id, &self.denomination_id) {
            (Some(g), Some(d)) => (g, d),
            _ => return Err(ShopError::Validation("Select a game and a denomination".to_string())),
        };
        let (_, denomination) = self.catalog.resolve(game_id, denomination_id)?;
        Ok(denomination.unit_price())
    }

    fn set_outcome(&mut self, outcome: PaymentOutcome) {
        if let Some(attempt) = self.attempt.as_mut() {
            attempt.outcome = Some(outcome);
        }
    }
}

enum PaymentPlan {
    Redirect {
        gateway: Arc<dyn RedirectGateway>,
        order_id: String,
    },
    Direct {
        gateway: Arc<dyn DirectGateway>,
        order: Order,
        details: PaymentDetails,
    },
}

/// One checkout, from product selection to payment
pub struct CheckoutOrchestrator {
    deps: CheckoutDeps,
    state: Mutex<CheckoutState>,
}

impl CheckoutOrchestrator {
    pub fn new(catalog: Catalog, deps: CheckoutDeps) -> Self {
        Self {
            deps,
            state: Mutex::new(CheckoutState::new(CheckoutStep::SelectingProduct, catalog)),
        }
    }

    /// Rebuild a checkout that redirected to a gateway and is now coming back.
    /// An order the backend already reports as paid resumes as `Completed`.
    pub fn resume(pending: &PendingPayment, order: Option<Order>, deps: CheckoutDeps) -> Self {
        let paid = order.as_ref().is_some_and(|o| o.status.is_paid());
        let step = if paid {
            CheckoutStep::Completed
        } else {
            CheckoutStep::RedirectingToGateway
        };

        let mut state = CheckoutState::new(step, Catalog::default());
        if let Some(order) = &order {
            state.game_id = Some(order.game_id.clone());
            state.denomination_id = Some(order.denomination_id.clone());
            state.quantity = order.quantity;
        }
        state.order = order;
        state.attempt = Some(PaymentAttempt {
            order_id: pending.order_id.clone(),
            method: pending.method,
            gateway_order_id: pending.gateway_order_id.clone(),
            outcome: paid.then_some(PaymentOutcome::Completed),
        });

        Self {
            deps,
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CheckoutState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn step(&self) -> CheckoutStep {
        self.lock().step
    }

    /// Swap in a fresher catalog. Prices are read from it at submission.
    pub fn replace_catalog(&self, catalog: Catalog) {
        self.lock().catalog = catalog;
    }

    /// Pick a game, one of its denominations and a quantity
    pub fn select_product(&self, game_id: &str, denomination_id: &str, quantity: u32) -> ShopResult<Price> {
        let mut state = self.lock();
        next_step(state.step, CheckoutEvent::ProductSelected)?;

        let priced = Quantity::new(quantity).and_then(|quantity| {
            let (_, denomination) = state.catalog.resolve(game_id, denomination_id)?;
            Ok((quantity, denomination.unit_price().times(quantity)?))
        });
        let (quantity, total) = priced.map_err(|e| state.fail(e))?;

        state.game_id = Some(game_id.to_string());
        state.denomination_id = Some(denomination_id.to_string());
        state.quantity = quantity;
        state.last_error = None;
        state.advance(CheckoutEvent::ProductSelected)?;
        Ok(total)
    }

    /// Change the quantity before the order is submitted
    pub fn set_quantity(&self, quantity: u32) -> ShopResult<Price> {
        let mut state = self.lock();
        if !matches!(
            state.step,
            CheckoutStep::EnteringCredentials | CheckoutStep::ReviewingOrder
        ) {
            return Err(ShopError::InvalidTransition {
                from: state.step.to_string(),
                event: "change the quantity".to_string(),
            });
        }
        let quantity = Quantity::new(quantity).map_err(|e| state.fail(e))?;
        let total = state.unit_price()?.times(quantity)?;
        state.quantity = quantity;
        Ok(total)
    }

    /// In-game login used for delivery
    pub fn set_credentials(&self, username: &str, password: &str) -> ShopResult<()> {
        let mut state = self.lock();
        next_step(state.step, CheckoutEvent::CredentialsEntered)?;

        let credentials = GameCredentials::new(username.trim(), password);
        credentials.validate().map_err(|e| state.fail(e))?;

        state.credentials = Some(credentials);
        state.last_error = None;
        state.advance(CheckoutEvent::CredentialsEntered)?;
        Ok(())
    }

    /// Contact fields; checked at submission
    pub fn set_contact(&self, contact: ContactDetails) -> ShopResult<()> {
        let mut state = self.lock();
        if !matches!(
            state.step,
            CheckoutStep::SelectingProduct
                | CheckoutStep::EnteringCredentials
                | CheckoutStep::ReviewingOrder
        ) {
            return Err(ShopError::InvalidTransition {
                from: state.step.to_string(),
                event: "update contact details".to_string(),
            });
        }
        state.contact = contact;
        Ok(())
    }

    fn build_order(state: &CheckoutState) -> ShopResult<NewOrder> {
        let credentials = state
            .credentials
            .clone()
            .ok_or_else(|| ShopError::Validation("Game login is required".to_string()))?;
        state.contact.validate()?;

        // Price comes from the catalog as it is now, not as it was at selection
        let unit_price = state.unit_price()?;
        let order = NewOrder {
            game_id: state.game_id.clone().unwrap_or_default(),
            denomination_id: state.denomination_id.clone().unwrap_or_default(),
            credentials,
            customer_email: state.contact.email.trim().to_string(),
            customer_phone: state
                .contact
                .phone
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from),
            quantity: state.quantity,
            notes: state.contact.notes.clone().filter(|n| !n.trim().is_empty()),
            unit_price,
            idempotency_key: Uuid::new_v4().to_string(),
        };
        order.expected_total()?;
        Ok(order)
    }

    /// Create the order. At most one submission runs at a time; a second
    /// call while one is running fails with `SubmissionInFlight`.
    #[instrument(skip(self))]
    pub async fn submit(&self) -> ShopResult<Order> {
        let (new_order, epoch) = {
            let mut state = self.lock();
            if state.submission_in_flight {
                return Err(ShopError::SubmissionInFlight);
            }
            next_step(state.step, CheckoutEvent::SubmitRequested)?;
            let new_order = Self::build_order(&state).map_err(|e| state.fail(e))?;

            state.advance(CheckoutEvent::SubmitRequested)?;
            state.submission_in_flight = true;
            state.last_error = None;
            state.epoch += 1;
            (new_order, state.epoch)
        };

        info!(
            game_id = %new_order.game_id,
            quantity = new_order.quantity.get(),
            "Submitting order"
        );
        let result = self.deps.orders.create(&new_order).await;

        let mut state = self.lock();
        if state.epoch != epoch {
            if let Ok(order) = &result {
                warn!(order_id = %order.id, "Order created after checkout moved on, discarding");
            }
            return Err(ShopError::Aborted {
                operation: "submit order".to_string(),
            });
        }
        state.submission_in_flight = false;

        match result {
            Ok(order) => {
                state.advance(CheckoutEvent::OrderCreated)?;
                state.order = Some(order.clone());
                info!(order_id = %order.id, total = order.total_price, "Order created");
                Ok(order)
            }
            Err(e) => {
                state.advance(CheckoutEvent::SubmissionFailed)?;
                warn!("Order submission failed: {}", e);
                Err(state.fail(e))
            }
        }
    }

    /// Methods to show on the payment step
    pub fn payment_options(&self) -> Vec<MethodOption> {
        self.deps.gateways.options()
    }

    fn plan_payment(&self, method: PaymentMethod, details: Option<PaymentDetails>) -> ShopResult<(PaymentPlan, u64)> {
        let mut state = self.lock();
        let adapter = self
            .deps
            .gateways
            .get(method)
            .cloned()
            .map_err(|e| state.fail(e))?;

        let order = state.order.clone();
        let plan = match adapter {
            GatewayAdapter::Unavailable { method } => {
                return Err(state.fail(GatewayAdapter::unavailable_error(method)));
            }
            GatewayAdapter::Redirect(gateway) => {
                next_step(state.step, CheckoutEvent::RedirectStarted)?;
                let order = order.ok_or_else(|| ShopError::Validation("No order to pay".to_string()))?;
                state.advance(CheckoutEvent::RedirectStarted)?;
                PaymentPlan::Redirect {
                    gateway,
                    order_id: order.id,
                }
            }
            GatewayAdapter::Direct(gateway) => {
                next_step(state.step, CheckoutEvent::DirectPaymentStarted)?;
                let order = order.ok_or_else(|| ShopError::Validation("No order to pay".to_string()))?;
                let details = details
                    .ok_or_else(|| ShopError::Validation("Payment details are required".to_string()))
                    .and_then(|d| gateway.validate(&d))
                    .map_err(|e| state.fail(e))?;
                state.advance(CheckoutEvent::DirectPaymentStarted)?;
                PaymentPlan::Direct {
                    gateway,
                    order,
                    details,
                }
            }
        };

        let order_id = match &plan {
            PaymentPlan::Redirect { order_id, .. } => order_id.clone(),
            PaymentPlan::Direct { order, .. } => order.id.clone(),
        };
        state.attempt = Some(PaymentAttempt::new(order_id, method));
        state.capture_token = None;
        state.last_error = None;
        state.epoch += 1;
        Ok((plan, state.epoch))
    }

    /// Start paying for the created order.
    ///
    /// Redirect gateways: the pending payment is stored before the approval
    /// URL is returned. Direct gateways: fields are validated, then the
    /// payment is submitted once.
    #[instrument(skip(self, details))]
    pub async fn pay(&self, method: PaymentMethod, details: Option<PaymentDetails>) -> ShopResult<PaymentProgress> {
        let (plan, epoch) = self.plan_payment(method, details)?;

        match plan {
            PaymentPlan::Redirect { gateway, order_id } => {
                let approval = match gateway.create(&order_id).await {
                    Ok(approval) => approval,
                    Err(e) => return Err(self.fail_payment(epoch, e)),
                };
                if !self.is_current(epoch) {
                    return Err(ShopError::Aborted {
                        operation: "start payment".to_string(),
                    });
                }

                let pending = PendingPayment::new(&order_id, method)
                    .with_gateway_order_id(approval.gateway_order_id.clone());
                if let Err(e) = self.deps.store.save_pending(&pending).await {
                    return Err(self.fail_payment(epoch, e));
                }

                let superseded = {
                    let mut state = self.lock();
                    if state.epoch == epoch {
                        if let Some(attempt) = state.attempt.as_mut() {
                            attempt.gateway_order_id = approval.gateway_order_id;
                        }
                        false
                    } else {
                        true
                    }
                };
                if superseded {
                    // Cancelled while saving
                    if let Err(e) = self.deps.store.clear_pending(&order_id).await {
                        warn!("Could not clear pending payment: {}", e);
                    }
                    return Err(ShopError::Aborted {
                        operation: "start payment".to_string(),
                    });
                }

                info!(order_id = %order_id, %method, "Redirecting to gateway");
                Ok(PaymentProgress::Redirect {
                    approval_url: approval.approval_url,
                })
            }
            PaymentPlan::Direct {
                gateway,
                order,
                details,
            } => {
                let result = gateway.submit(&order, &details).await;
                match self.settle(epoch, method, result, true)? {
                    CaptureStatus::Pending => Ok(PaymentProgress::Pending),
                    _ => Ok(PaymentProgress::Completed),
                }
            }
        }
    }

    /// Finalize a redirect payment with the token the gateway returned.
    /// Repeating a completed capture with the same token re-confirms it.
    #[instrument(skip(self, gateway_token))]
    pub async fn capture(&self, gateway_token: &str) -> ShopResult<CheckoutStep> {
        let gateway_token = gateway_token.trim();
        if gateway_token.is_empty() {
            return Err(ShopError::Validation("Missing payment token".to_string()));
        }

        let (gateway, order_id, method, epoch) = {
            let mut state = self.lock();
            if state.step == CheckoutStep::Completed
                && state.capture_token.as_deref() == Some(gateway_token)
            {
                debug!("Payment already captured");
                return Ok(CheckoutStep::Completed);
            }
            if state.step != CheckoutStep::CapturingPayment {
                next_step(state.step, CheckoutEvent::GatewayReturned)?;
            }

            let attempt = state.attempt.clone().ok_or_else(|| ShopError::InvalidTransition {
                from: state.step.to_string(),
                event: CheckoutEvent::GatewayReturned.to_string(),
            })?;
            let gateway = match self.deps.gateways.get(attempt.method).map_err(|e| state.fail(e))? {
                GatewayAdapter::Redirect(gateway) => gateway.clone(),
                other => {
                    return Err(state.fail(ShopError::Validation(format!(
                        "{} payments are not captured after a redirect",
                        other.method()
                    ))))
                }
            };

            if state.step == CheckoutStep::RedirectingToGateway {
                state.advance(CheckoutEvent::GatewayReturned)?;
            }
            state.capture_token = Some(gateway_token.to_string());
            state.epoch += 1;
            (gateway, attempt.order_id, attempt.method, state.epoch)
        };

        let result = gateway.capture(&order_id, gateway_token).await;
        self.settle(epoch, method, result, false)?;
        Ok(self.step())
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.lock().epoch == epoch
    }

    /// Record a failed payment attempt. The order is kept for a retry.
    fn fail_payment(&self, epoch: u64, err: ShopError) -> ShopError {
        let mut state = self.lock();
        if state.epoch != epoch {
            debug!("Discarding late payment failure: {}", err);
            return err;
        }
        if let Err(e) = state.advance(CheckoutEvent::PaymentFailed) {
            debug!("Payment failure outside a payment step: {}", e);
        }
        state.set_outcome(PaymentOutcome::Failed {
            reason: err.user_message(),
        });
        warn!("Payment failed: {}", err);
        state.fail(err)
    }

    /// Apply a gateway result. `pending_completes` is set for direct gateways,
    /// where a pending settlement still ends the checkout.
    fn settle(
        &self,
        epoch: u64,
        method: PaymentMethod,
        result: ShopResult<CaptureStatus>,
        pending_completes: bool,
    ) -> ShopResult<CaptureStatus> {
        let status = match result {
            Ok(CaptureStatus::Declined) => {
                return Err(self.fail_payment(
                    epoch,
                    ShopError::Gateway {
                        gateway: method.to_string(),
                        message: "Payment was declined".to_string(),
                    },
                ))
            }
            Ok(status) => status,
            Err(e) => return Err(self.fail_payment(epoch, e)),
        };

        let mut state = self.lock();
        if state.epoch != epoch {
            debug!(?status, "Discarding late payment result");
            return Ok(status);
        }

        if status == CaptureStatus::Completed || pending_completes {
            state.advance(CheckoutEvent::PaymentSucceeded)?;
            state.set_outcome(PaymentOutcome::Completed);
            state.last_error = None;
            info!(?status, %method, "Payment completed");
        } else {
            info!(%method, "Payment pending at gateway");
        }
        Ok(status)
    }

    /// Customer backs out
    pub async fn cancel(&self) -> ShopResult<()> {
        self.cancel_with(CheckoutEvent::Cancel).await
    }

    /// Gateway reported the customer cancelled there
    pub async fn gateway_cancelled(&self) -> ShopResult<()> {
        self.cancel_with(CheckoutEvent::GatewayCancelled).await
    }

    async fn cancel_with(&self, event: CheckoutEvent) -> ShopResult<()> {
        let redirected_order = {
            let mut state = self.lock();
            let from = state.step;
            state.advance(event)?;
            state.submission_in_flight = false;
            state.epoch += 1;
            state.set_outcome(PaymentOutcome::Cancelled);
            state
                .attempt
                .as_ref()
                .filter(|_| from == CheckoutStep::RedirectingToGateway)
                .map(|attempt| attempt.order_id.clone())
        };

        if let Some(order_id) = redirected_order {
            if let Err(e) = self.deps.store.clear_pending(&order_id).await {
                warn!("Could not clear pending payment: {}", e);
            }
        }
        info!("Checkout cancelled");
        Ok(())
    }

    /// One step back, where that makes sense
    pub fn back(&self) -> ShopResult<CheckoutStep> {
        let mut state = self.lock();
        let step = state.advance(CheckoutEvent::Back)?;
        state.last_error = None;
        Ok(step)
    }

    /// Start over on the payment step after a failed attempt
    pub fn retry_payment(&self) -> ShopResult<()> {
        let mut state = self.lock();
        state.advance(CheckoutEvent::RetryPayment)?;
        state.attempt = None;
        state.capture_token = None;
        state.last_error = None;
        Ok(())
    }

    pub fn snapshot(&self) -> CheckoutSnapshot {
        let state = self.lock();
        let total = state
            .unit_price()
            .and_then(|price| price.times(state.quantity))
            .ok()
            .or_else(|| state.order.as_ref().map(Order::total));

        CheckoutSnapshot {
            step: state.step,
            game_id: state.game_id.clone(),
            denomination_id: state.denomination_id.clone(),
            quantity: state.quantity,
            total,
            submission_in_flight: state.submission_in_flight,
            order: state.order.clone(),
            attempt: state.attempt.clone(),
            error_message: state.last_error.as_ref().map(ShopError::user_message),
            last_error: state.last_error.clone(),
        }
    }
}

impl std::fmt::Debug for CheckoutOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("CheckoutOrchestrator")
            .field("step", &state.step)
            .field("epoch", &state.epoch)
            .finish_non_exhaustive()
    }
}
