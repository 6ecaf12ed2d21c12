//! Fixed-answer collaborators for router and state tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use topup_core::{
    AuthProvider, AuthSession, AuthUser, BearerToken, Catalog, CatalogSource, Currency,
    Denomination, Game, GatewayAdapter, GatewaySelector, MemoryCheckoutStore, NewOrder, Order,
    OrderRepository, OrderStatus, PaymentMethod, Quantity, ShopError, ShopResult, UserProfile,
};
use topup_flow::{CheckoutDeps, ReturnHandler, SessionConfig, SessionManager};

use crate::state::{AppConfig, AppState};

/// Guest-only auth backend
pub struct GuestAuth;

#[async_trait]
impl AuthProvider for GuestAuth {
    async fn sign_in(&self, _email: &str, _password: &str) -> ShopResult<AuthSession> {
        Err(ShopError::Auth("Invalid login credentials".into()))
    }

    async fn sign_up(&self, _email: &str, _password: &str) -> ShopResult<Option<AuthSession>> {
        Ok(None)
    }

    async fn sign_out(&self, _access_token: &str) -> ShopResult<()> {
        Ok(())
    }

    async fn get_session(&self) -> ShopResult<Option<AuthSession>> {
        Ok(None)
    }

    async fn refresh_session(&self) -> ShopResult<Option<AuthSession>> {
        Ok(None)
    }

    async fn get_profile(&self, user_id: &str, _access_token: &str) -> ShopResult<UserProfile> {
        Err(ShopError::NotFound(format!("profile for user {}", user_id)))
    }
}

/// Auth backend that never answers
pub struct UnreachableAuth;

impl UnreachableAuth {
    async fn hang<T: Send>() -> ShopResult<T> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(ShopError::Server {
            status: None,
            message: "unreachable".into(),
        })
    }
}

#[async_trait]
impl AuthProvider for UnreachableAuth {
    async fn sign_in(&self, _email: &str, _password: &str) -> ShopResult<AuthSession> {
        Self::hang().await
    }

    async fn sign_up(&self, _email: &str, _password: &str) -> ShopResult<Option<AuthSession>> {
        Self::hang().await
    }

    async fn sign_out(&self, _access_token: &str) -> ShopResult<()> {
        Self::hang().await
    }

    async fn get_session(&self) -> ShopResult<Option<AuthSession>> {
        Self::hang().await
    }

    async fn refresh_session(&self) -> ShopResult<Option<AuthSession>> {
        Self::hang().await
    }

    async fn get_profile(&self, _user_id: &str, _access_token: &str) -> ShopResult<UserProfile> {
        Self::hang().await
    }
}

/// Session whose user carries `role` in `app_metadata`
pub fn auth_session(user_id: &str, role: &str) -> AuthSession {
    AuthSession {
        access_token: "opaque-token".into(),
        refresh_token: None,
        expires_at: Utc::now() + chrono::Duration::hours(1),
        user: AuthUser {
            id: user_id.into(),
            email: format!("{}@x.com", user_id),
            app_metadata: serde_json::json!({ "role": role }),
        },
    }
}

pub struct StaticCatalog(pub Catalog);

#[async_trait]
impl CatalogSource for StaticCatalog {
    async fn fetch_catalog(&self) -> ShopResult<Catalog> {
        Ok(self.0.clone())
    }
}

pub fn catalog() -> Catalog {
    Catalog::new(
        vec![
            Game {
                id: "g-ml".into(),
                name: "Mobile Legends".into(),
                slug: "mobile-legends".into(),
                platform: None,
                active: true,
            },
            Game {
                id: "g-old".into(),
                name: "Retired".into(),
                slug: "retired".into(),
                platform: None,
                active: false,
            },
        ],
        vec![Denomination {
            id: "d-86".into(),
            game_id: "g-ml".into(),
            name: "86 Diamonds".into(),
            amount: 86,
            price: 20_000,
            currency: Currency::IDR,
            active: true,
        }],
    )
}

pub fn order(id: &str, status: OrderStatus) -> Order {
    Order {
        id: id.into(),
        game_id: "g-ml".into(),
        denomination_id: "d-86".into(),
        customer_email: "buyer@example.com".into(),
        customer_phone: None,
        quantity: Quantity::ONE,
        price_per_unit: 20_000,
        total_price: 20_000,
        currency: Currency::IDR,
        status,
        payment_gateway: Some("paypal".into()),
        gateway_transaction_id: None,
        created_at: Utc::now(),
        paid_at: None,
        fulfilled_at: None,
        notes: None,
    }
}

/// Lookup-only order repository
#[derive(Default)]
pub struct KnownOrders {
    orders: Mutex<HashMap<String, Order>>,
}

impl KnownOrders {
    pub fn with(order: Order) -> Self {
        let known = Self::default();
        known.orders.lock().unwrap().insert(order.id.clone(), order);
        known
    }
}

#[async_trait]
impl OrderRepository for KnownOrders {
    async fn create(&self, _order: &NewOrder) -> ShopResult<Order> {
        Err(ShopError::Validation("orders are not created here".into()))
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

/// State over in-memory collaborators. The local method is the only
/// registered gateway, so nothing here reaches a payment network.
pub fn test_state(orders: KnownOrders) -> AppState {
    test_state_with_auth(orders, Arc::new(GuestAuth))
}

pub fn test_state_with_auth(orders: KnownOrders, auth: Arc<dyn AuthProvider>) -> AppState {
    let session = SessionManager::new(auth, BearerToken::new(), SessionConfig::default());
    let deps = CheckoutDeps {
        orders: Arc::new(orders),
        gateways: GatewaySelector::new().with_gateway(GatewayAdapter::Unavailable {
            method: PaymentMethod::Local,
        }),
        store: Arc::new(MemoryCheckoutStore::new()),
    };

    AppState::new(
        AppConfig {
            host: "127.0.0.1".into(),
            port: 0,
            environment: "test".into(),
        },
        session,
        ReturnHandler::new(deps),
        Arc::new(StaticCatalog(catalog())),
    )
}
