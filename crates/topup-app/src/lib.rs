//! # topup-app
//!
//! Storefront service for topup-rs.
//!
//! This crate provides:
//! - Wiring of the HTTP client, session manager and checkout into one state
//! - The gateway return and cancel URLs
//! - Session and catalog endpoints for the UI
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Health check |
//! | GET | `/api/v1/session` | Current session, role and offline flag |
//! | GET | `/api/v1/catalog` | Active games and denominations |
//! | GET | `/payment/success` | Gateway return URL (`token`, `orderId`) |
//! | GET | `/payment/cancel` | Gateway cancel URL (`orderId`) |

pub mod handlers;
pub mod routes;
pub mod state;

#[cfg(test)]
mod testing;

pub use routes::create_router;
pub use state::{forward_provider_events, AppConfig, AppState};
