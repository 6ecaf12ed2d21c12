//! In-memory providers, repositories and gateways for the state machine tests.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use topup_core::{
    AuthProvider, AuthSession, AuthUser, CaptureStatus, Catalog, CheckoutStore, Currency,
    Denomination, DirectGateway, Game, GatewayAdapter, GatewaySelector, MemoryCheckoutStore,
    NewOrder, Order, OrderRepository, OrderStatus, PaymentDetails, PaymentMethod,
    RedirectApproval, RedirectGateway, ShopError, ShopResult, UserProfile,
};

use crate::checkout::CheckoutDeps;

async fn delay(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

/// Session for `user_id`, with `role` in the token's `app_metadata` claims
pub fn auth_session(user_id: &str, role: Option<&str>) -> AuthSession {
    let claims = match role {
        Some(role) => serde_json::json!({"sub": user_id, "app_metadata": {"role": role}}),
        None => serde_json::json!({"sub": user_id, "role": "authenticated"}),
    };
    let token = format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256"}"#),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    );

    AuthSession {
        access_token: token,
        refresh_token: Some(format!("refresh-{}", user_id)),
        expires_at: Utc::now() + chrono::Duration::hours(1),
        user: AuthUser {
            id: user_id.to_string(),
            email: format!("{}@x.com", user_id),
            app_metadata: serde_json::Value::Null,
        },
    }
}

#[derive(Default)]
struct AuthScript {
    existing: Option<AuthSession>,
    existing_delay: Duration,
    sign_in: Option<AuthSession>,
    sign_in_delay: Duration,
    sign_out_fails: bool,
    refresh: Option<AuthSession>,
    profile: Option<UserProfile>,
}

#[derive(Default)]
pub struct FakeAuthProvider {
    script: Mutex<AuthScript>,
    sign_in_calls: AtomicUsize,
    profile_calls: AtomicUsize,
}

impl FakeAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, AuthScript> {
        self.script.lock().unwrap()
    }

    pub fn set_existing_session(&self, session: Option<AuthSession>, delay: Duration) {
        let mut script = self.script();
        script.existing = session;
        script.existing_delay = delay;
    }

    pub fn set_sign_in(&self, session: AuthSession) {
        self.script().sign_in = Some(session);
    }

    pub fn set_sign_in_delay(&self, delay: Duration) {
        self.script().sign_in_delay = delay;
    }

    pub fn fail_sign_out(&self) {
        self.script().sign_out_fails = true;
    }

    pub fn set_refresh(&self, session: Option<AuthSession>) {
        self.script().refresh = session;
    }

    pub fn set_profile(&self, profile: UserProfile) {
        self.script().profile = Some(profile);
    }

    pub fn sign_in_calls(&self) -> usize {
        self.sign_in_calls.load(Ordering::SeqCst)
    }

    pub fn profile_calls(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthProvider for FakeAuthProvider {
    async fn sign_in(&self, _email: &str, _password: &str) -> ShopResult<AuthSession> {
        self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
        let (session, wait) = {
            let script = self.script();
            (script.sign_in.clone(), script.sign_in_delay)
        };
        delay(wait).await;
        session.ok_or_else(|| ShopError::Auth("Invalid login credentials".into()))
    }

    async fn sign_up(&self, _email: &str, _password: &str) -> ShopResult<Option<AuthSession>> {
        Ok(self.script().sign_in.clone())
    }

    async fn sign_out(&self, _access_token: &str) -> ShopResult<()> {
        if self.script().sign_out_fails {
            return Err(ShopError::Server {
                status: None,
                message: "connection refused".into(),
            });
        }
        Ok(())
    }

    async fn get_session(&self) -> ShopResult<Option<AuthSession>> {
        let (session, wait) = {
            let script = self.script();
            (script.existing.clone(), script.existing_delay)
        };
        delay(wait).await;
        Ok(session)
    }

    async fn refresh_session(&self) -> ShopResult<Option<AuthSession>> {
        Ok(self.script().refresh.clone())
    }

    async fn get_profile(&self, user_id: &str, _access_token: &str) -> ShopResult<UserProfile> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        self.script()
            .profile
            .clone()
            .ok_or_else(|| ShopError::NotFound(format!("profile for user {}", user_id)))
    }
}

/// Two games; `d-86` and `d-172` belong to `g-ml`, `d-60` to `g-ff`
pub fn catalog() -> Catalog {
    let game = |id: &str, name: &str, active: bool| Game {
        id: id.into(),
        name: name.into(),
        slug: id.into(),
        platform: Some("mobile".into()),
        active,
    };
    let denomination = |id: &str, game_id: &str, price: i64| Denomination {
        id: id.into(),
        game_id: game_id.into(),
        name: format!("{} points", id),
        amount: 100,
        price,
        currency: Currency::IDR,
        active: true,
    };

    Catalog::new(
        vec![
            game("g-ml", "Mobile Legends", true),
            game("g-ff", "Free Fire", true),
            game("g-old", "Retired", false),
        ],
        vec![
            denomination("d-86", "g-ml", 20_000),
            denomination("d-172", "g-ml", 39_000),
            denomination("d-60", "g-ff", 15_000),
        ],
    )
}

#[derive(Default)]
pub struct FakeOrderRepository {
    orders: Mutex<HashMap<String, Order>>,
    submitted: Mutex<Vec<NewOrder>>,
    create_delay: Mutex<Duration>,
    fail_next: Mutex<Option<ShopError>>,
    create_calls: AtomicUsize,
}

impl FakeOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_create_delay(self, delay: Duration) -> Self {
        *self.create_delay.lock().unwrap() = delay;
        self
    }

    pub fn fail_next_create(&self, err: ShopError) {
        *self.fail_next.lock().unwrap() = Some(err);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<NewOrder> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn insert(&self, order: Order) {
        self.orders.lock().unwrap().insert(order.id.clone(), order);
    }
}

#[async_trait]
impl OrderRepository for FakeOrderRepository {
    async fn create(&self, new_order: &NewOrder) -> ShopResult<Order> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.submitted.lock().unwrap().push(new_order.clone());
        let wait = *self.create_delay.lock().unwrap();
        delay(wait).await;

        if let Some(err) = self.fail_next.lock().unwrap().take() {
            return Err(err);
        }

        let order = Order {
            id: format!("ord_{}", n),
            game_id: new_order.game_id.clone(),
            denomination_id: new_order.denomination_id.clone(),
            customer_email: new_order.customer_email.clone(),
            customer_phone: new_order.customer_phone.clone(),
            quantity: new_order.quantity,
            price_per_unit: new_order.unit_price.amount,
            total_price: new_order.expected_total()?.amount,
            currency: new_order.unit_price.currency,
            status: OrderStatus::Pending,
            payment_gateway: None,
            gateway_transaction_id: None,
            created_at: Utc::now(),
            paid_at: None,
            fulfilled_at: None,
            notes: new_order.notes.clone(),
        };
        self.insert(order.clone());
        Ok(order)
    }

    async fn get(&self, order_id: &str) -> ShopResult<Order> {
        self.orders
            .lock()
            .unwrap()
            .get(order_id)
            .cloned()
            .ok_or_else(|| ShopError::NotFound(format!("order {}", order_id)))
    }
}

/// Redirect gateway that remembers completed captures like the real one
pub struct FakeRedirectGateway {
    capture_status: Mutex<CaptureStatus>,
    fail_create: Mutex<bool>,
    captured: Mutex<HashSet<(String, String)>>,
    create_calls: AtomicUsize,
    capture_calls: AtomicUsize,
}

impl FakeRedirectGateway {
    pub fn new() -> Self {
        Self {
            capture_status: Mutex::new(CaptureStatus::Completed),
            fail_create: Mutex::new(false),
            captured: Mutex::new(HashSet::new()),
            create_calls: AtomicUsize::new(0),
            capture_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_capture_status(&self, status: CaptureStatus) {
        *self.capture_status.lock().unwrap() = status;
    }

    pub fn fail_create(&self) {
        *self.fail_create.lock().unwrap() = true;
    }

    /// Captures that reached the "network"
    pub fn capture_calls(&self) -> usize {
        self.capture_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RedirectGateway for FakeRedirectGateway {
    async fn create(&self, order_id: &str) -> ShopResult<RedirectApproval> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_create.lock().unwrap() {
            return Err(ShopError::Gateway {
                gateway: "paypal".into(),
                message: "PayPal is unreachable".into(),
            });
        }
        Ok(RedirectApproval {
            approval_url: format!("https://paypal.example/approve?order={}", order_id),
            gateway_order_id: Some(format!("PP-{}", order_id)),
        })
    }

    async fn capture(&self, order_id: &str, gateway_token: &str) -> ShopResult<CaptureStatus> {
        let key = (order_id.to_string(), gateway_token.to_string());
        if self.captured.lock().unwrap().contains(&key) {
            return Ok(CaptureStatus::Completed);
        }

        self.capture_calls.fetch_add(1, Ordering::SeqCst);
        let status = *self.capture_status.lock().unwrap();
        if status == CaptureStatus::Completed {
            self.captured.lock().unwrap().insert(key);
        }
        Ok(status)
    }

    fn method(&self) -> PaymentMethod {
        PaymentMethod::Paypal
    }
}

pub struct FakeDirectGateway {
    method: PaymentMethod,
    result: Mutex<ShopResult<CaptureStatus>>,
    submit_calls: AtomicUsize,
}

impl FakeDirectGateway {
    pub fn new(method: PaymentMethod) -> Self {
        Self {
            method,
            result: Mutex::new(Ok(CaptureStatus::Completed)),
            submit_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_result(&self, result: ShopResult<CaptureStatus>) {
        *self.result.lock().unwrap() = result;
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectGateway for FakeDirectGateway {
    fn validate(&self, details: &PaymentDetails) -> ShopResult<PaymentDetails> {
        if details.method() != self.method {
            return Err(ShopError::Validation(format!("{} details expected", self.method)));
        }
        details.validated()
    }

    async fn submit(&self, _order: &Order, _details: &PaymentDetails) -> ShopResult<CaptureStatus> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        self.result.lock().unwrap().clone()
    }

    fn method(&self) -> PaymentMethod {
        self.method
    }
}

/// Fakes behind a `CheckoutDeps`, with handles kept for assertions
pub struct Harness {
    pub orders: Arc<FakeOrderRepository>,
    pub paypal: Arc<FakeRedirectGateway>,
    pub card: Arc<FakeDirectGateway>,
    pub store: Arc<MemoryCheckoutStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_orders(FakeOrderRepository::new())
    }

    pub fn with_orders(orders: FakeOrderRepository) -> Self {
        Self {
            orders: Arc::new(orders),
            paypal: Arc::new(FakeRedirectGateway::new()),
            card: Arc::new(FakeDirectGateway::new(PaymentMethod::CreditCard)),
            store: Arc::new(MemoryCheckoutStore::new()),
        }
    }

    pub fn deps(&self) -> CheckoutDeps {
        let gateways = GatewaySelector::new()
            .with_gateway(GatewayAdapter::Redirect(self.paypal.clone()))
            .with_gateway(GatewayAdapter::Direct(self.card.clone()))
            .with_gateway(GatewayAdapter::Unavailable {
                method: PaymentMethod::Local,
            });

        CheckoutDeps {
            orders: self.orders.clone(),
            gateways,
            store: self.store.clone() as Arc<dyn CheckoutStore>,
        }
    }
}
