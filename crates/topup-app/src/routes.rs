//! # Routes
//!
//! Axum router configuration for the storefront service.

use crate::handlers;
use crate::state::AppState;
use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main application router
///
/// Routes:
/// - GET /health, GET / - Health check
/// - GET /api/v1/session - Session status
/// - GET /api/v1/catalog - Active games and denominations
/// - GET /payment/success?token=..&orderId=.. - Gateway return URL
/// - GET /payment/cancel?orderId=.. - Gateway cancel URL
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/session", get(handlers::session_status))
        .route("/catalog", get(handlers::list_catalog));

    // Gateway redirects land here, so no CORS concerns
    let payment_routes = Router::new()
        .route("/success", get(handlers::payment_success))
        .route("/cancel", get(handlers::payment_cancel));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/", get(handlers::health))
        .nest("/api/v1", api_routes)
        .nest("/payment", payment_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
