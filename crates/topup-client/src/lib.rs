//! # topup-client
//!
//! Backend adapters for topup-rs.
//!
//! - **RequestExecutor** - bounded-timeout HTTP with cancellation and one
//!   error classification
//! - **HttpAuthProvider** - sign-in, sign-up, session and profile lookups
//! - **HttpOrderRepository** - orders and the product catalog
//! - **PayPalGateway** - redirect-based payments
//! - **DirectPaymentGateway** - card and bank transfer
//! - **FileCheckoutStore** - pending payment persisted across a redirect
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use topup_client::{ClientConfig, RequestExecutor, HttpOrderRepository};
//! use topup_core::{BearerToken, CatalogSource};
//!
//! let config = ClientConfig::from_env()?;
//! let executor = RequestExecutor::new(&config, BearerToken::new())?;
//! let catalog = HttpOrderRepository::new(executor).fetch_catalog().await?;
//! ```

pub mod auth;
pub mod config;
pub mod direct;
pub mod executor;
pub mod orders;
pub mod paypal;
pub mod store;

// Re-exports
pub use auth::HttpAuthProvider;
pub use config::{ClientConfig, Timeouts};
pub use direct::{default_selector, local_gateway, DirectPaymentGateway};
pub use executor::{ApiRequest, OperationKind, RequestError, RequestExecutor};
pub use orders::HttpOrderRepository;
pub use paypal::{capture_idempotency_key, PayPalGateway};
pub use store::FileCheckoutStore;
