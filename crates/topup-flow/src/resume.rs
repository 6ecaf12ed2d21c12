//! # Redirect Return Handling
//!
//! Picks a checkout back up when the customer comes back from a redirect
//! gateway, using the pending payment saved before the redirect.

use crate::checkout::{CheckoutDeps, CheckoutOrchestrator, CheckoutSnapshot};
use crate::transitions::CheckoutStep;
use topup_core::{validate_order_id, PaymentMethod, PendingPayment, ShopResult};
use tracing::{debug, info, instrument, warn};

/// Serves the gateway return and cancel URLs
#[derive(Clone)]
pub struct ReturnHandler {
    deps: CheckoutDeps,
}

impl ReturnHandler {
    pub fn new(deps: CheckoutDeps) -> Self {
        Self { deps }
    }

    /// Pending payment for `order_id`. Without one (store cleared by an
    /// earlier return, or lost) the return URL alone is trusted as a PayPal
    /// return.
    async fn pending_for(&self, order_id: &str) -> ShopResult<PendingPayment> {
        validate_order_id(order_id)?;

        match self.deps.store.load_pending(order_id).await? {
            Some(pending) => Ok(pending),
            None => {
                debug!("No pending payment stored");
                Ok(PendingPayment::new(order_id, PaymentMethod::Paypal))
            }
        }
    }

    async fn clear_if_terminal(&self, order_id: &str, step: CheckoutStep) {
        if !step.is_terminal() {
            return;
        }
        if let Err(e) = self.deps.store.clear_pending(order_id).await {
            warn!("Could not clear pending payment: {}", e);
        }
    }

    /// Gateway return URL: `?token=..&orderId=..`
    ///
    /// A declined or failed capture is still a final state and comes back as
    /// a `Failed` snapshot carrying the error.
    #[instrument(skip(self, gateway_token))]
    pub async fn handle_return(&self, gateway_token: &str, order_id: &str) -> ShopResult<CheckoutSnapshot> {
        let pending = self.pending_for(order_id).await?;
        let order = self.deps.orders.get(order_id).await?;

        let checkout = CheckoutOrchestrator::resume(&pending, Some(order), self.deps.clone());
        if checkout.step() == CheckoutStep::Completed {
            info!("Order already paid");
        } else if let Err(e) = checkout.capture(gateway_token).await {
            if checkout.step() != CheckoutStep::Failed {
                return Err(e);
            }
        }

        let snapshot = checkout.snapshot();
        self.clear_if_terminal(order_id, snapshot.step).await;
        info!(step = %snapshot.step, "Gateway return handled");
        Ok(snapshot)
    }

    /// Gateway cancel URL: `?orderId=..`
    #[instrument(skip(self))]
    pub async fn handle_cancel(&self, order_id: &str) -> ShopResult<CheckoutSnapshot> {
        let pending = self.pending_for(order_id).await?;

        let checkout = CheckoutOrchestrator::resume(&pending, None, self.deps.clone());
        checkout.gateway_cancelled().await?;
        Ok(checkout.snapshot())
    }
}

impl std::fmt::Debug for ReturnHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReturnHandler")
            .field("gateways", &self.deps.gateways)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::ContactDetails;
    use crate::testing::{catalog, Harness};
    use topup_core::{CaptureStatus, CheckoutStore, OrderRepository, OrderStatus, ShopError};

    /// Redirect one more checkout to PayPal; the fake numbers orders `ord_1`, `ord_2`, ...
    async fn redirect_checkout(harness: &Harness) {
        let checkout = CheckoutOrchestrator::new(catalog(), harness.deps());
        checkout.select_product("g-ff", "d-60", 4).unwrap();
        checkout.set_credentials("player1", "hunter2").unwrap();
        checkout.set_contact(ContactDetails::new("buyer@example.com")).unwrap();
        checkout.submit().await.unwrap();
        checkout.pay(PaymentMethod::Paypal, None).await.unwrap();
    }

    /// Checkout that has redirected `ord_1` to PayPal
    async fn redirected(harness: &Harness) -> ReturnHandler {
        redirect_checkout(harness).await;
        ReturnHandler::new(harness.deps())
    }

    #[tokio::test]
    async fn test_return_captures_and_clears_store() {
        let harness = Harness::new();
        let handler = redirected(&harness).await;

        let snapshot = handler.handle_return("EC-1", "ord_1").await.unwrap();
        assert_eq!(snapshot.step, CheckoutStep::Completed);
        assert_eq!(snapshot.order.unwrap().total_price, 60_000);
        assert!(harness.store.load_pending("ord_1").await.unwrap().is_none());

        // Customer reloads the return page
        let again = handler.handle_return("EC-1", "ord_1").await.unwrap();
        assert_eq!(again.step, CheckoutStep::Completed);
        assert_eq!(harness.paypal.capture_calls(), 1);
    }

    #[tokio::test]
    async fn test_interleaved_returns_for_two_customers() {
        let harness = Harness::new();
        redirect_checkout(&harness).await;
        redirect_checkout(&harness).await;
        let handler = ReturnHandler::new(harness.deps());

        // Second customer comes back first
        let second = handler.handle_return("EC-2", "ord_2").await.unwrap();
        assert_eq!(second.step, CheckoutStep::Completed);
        assert!(harness.store.load_pending("ord_2").await.unwrap().is_none());
        let first_pending = harness.store.load_pending("ord_1").await.unwrap().unwrap();
        assert_eq!(first_pending.gateway_order_id.as_deref(), Some("PP-ord_1"));

        let first = handler.handle_return("EC-1", "ord_1").await.unwrap();
        assert_eq!(first.step, CheckoutStep::Completed);
        assert!(harness.store.load_pending("ord_1").await.unwrap().is_none());
        assert_eq!(harness.paypal.capture_calls(), 2);
    }

    #[tokio::test]
    async fn test_malformed_order_id_rejected() {
        let harness = Harness::new();
        let handler = redirected(&harness).await;

        let err = handler.handle_return("EC-1", "../rest/v1/profiles").await.unwrap_err();
        assert!(matches!(err, ShopError::Validation(_)));
        let err = handler.handle_cancel("").await.unwrap_err();
        assert!(matches!(err, ShopError::Validation(_)));

        assert!(harness.store.load_pending("ord_1").await.unwrap().is_some());
        assert_eq!(harness.paypal.capture_calls(), 0);
    }

    #[tokio::test]
    async fn test_declined_capture_is_final() {
        let harness = Harness::new();
        harness.paypal.set_capture_status(CaptureStatus::Declined);
        let handler = redirected(&harness).await;

        let snapshot = handler.handle_return("EC-1", "ord_1").await.unwrap();
        assert_eq!(snapshot.step, CheckoutStep::Failed);
        assert!(snapshot.error_message.is_some());
        assert!(snapshot.order.is_some());
        assert!(harness.store.load_pending("ord_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pending_capture_keeps_store() {
        let harness = Harness::new();
        harness.paypal.set_capture_status(CaptureStatus::Pending);
        let handler = redirected(&harness).await;

        let snapshot = handler.handle_return("EC-1", "ord_1").await.unwrap();
        assert_eq!(snapshot.step, CheckoutStep::CapturingPayment);
        assert!(harness.store.load_pending("ord_1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_paid_order_needs_no_capture() {
        let harness = Harness::new();
        let handler = redirected(&harness).await;
        harness.store.clear_pending("ord_1").await.unwrap();

        let mut order = harness.orders.get("ord_1").await.unwrap();
        order.status = OrderStatus::Paid;
        harness.orders.insert(order);

        let snapshot = handler.handle_return("EC-1", "ord_1").await.unwrap();
        assert_eq!(snapshot.step, CheckoutStep::Completed);
        assert_eq!(harness.paypal.capture_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_url_clears_store() {
        let harness = Harness::new();
        let handler = redirected(&harness).await;

        let snapshot = handler.handle_cancel("ord_1").await.unwrap();
        assert_eq!(snapshot.step, CheckoutStep::Cancelled);
        assert!(harness.store.load_pending("ord_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_order_is_not_found() {
        let harness = Harness::new();
        let handler = ReturnHandler::new(harness.deps());

        let err = handler.handle_return("EC-1", "ord_404").await.unwrap_err();
        assert!(matches!(err, ShopError::NotFound(_)));
        assert!(handler.handle_return("EC-1", " ").await.is_err());
    }
}
