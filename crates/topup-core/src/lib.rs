//! # topup-core
//!
//! Core types and traits for the topup storefront checkout engine.
//!
//! This crate provides:
//! - `Catalog`, `Game`, `Denomination`, `Price` and `Quantity`
//! - `Order`, `NewOrder` and the `OrderRepository` trait
//! - `Session`, `Role` and the `AuthProvider` trait
//! - `GatewayAdapter` over redirect and direct-submit payment methods
//! - `CheckoutStore` for resuming after a gateway redirect
//! - `ShopError` for typed error handling
//!
//! ## Example
//!
//! ```rust,ignore
//! use topup_core::{Catalog, Quantity};
//!
//! let catalog = repository.fetch_catalog().await?;
//! let (_game, denomination) = catalog.resolve("g-ml", "d-86")?;
//! let total = denomination.unit_price().times(Quantity::new(3)?)?;
//! println!("Total: {}", total.display());
//! ```

pub mod catalog;
pub mod error;
pub mod gateway;
pub mod order;
pub mod session;
pub mod store;
pub mod validation;

// Re-exports for convenience
pub use catalog::{
    Catalog, CatalogSource, Currency, Denomination, Game, Price, Quantity, ALLOWED_QUANTITIES,
};
pub use error::{ShopError, ShopResult, GENERIC_FAILURE_MESSAGE};
pub use gateway::{
    CaptureStatus, CheckoutUrls, DirectGateway, GatewayAdapter, GatewayCapability,
    GatewaySelector, MethodOption, PaymentAttempt, PaymentDetails, PaymentMethod,
    PaymentOutcome, RedirectApproval, RedirectGateway,
};
pub use order::{GameCredentials, NewOrder, Order, OrderRepository, OrderStatus};
pub use session::{
    AuthEvent, AuthPhase, AuthProvider, AuthSession, AuthUser, BearerToken, ProviderEvent,
    ResolvedRole, Role, RoleConfidence, Session, UserProfile,
};
pub use store::{CheckoutStore, MemoryCheckoutStore, PendingPayment};
pub use validation::{validate_email, validate_order_id, validate_phone, BankDetails, CardDetails};
