//! # Request Handlers
//!
//! Axum request handlers for the storefront service: the gateway return
//! and cancel pages plus small JSON endpoints for the UI.

use crate::state::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    Json,
};
use serde::{Deserialize, Serialize};
use topup_core::{Denomination, Game, Role, Session, ShopError};
use topup_flow::{CheckoutSnapshot, CheckoutStep};
use tracing::{error, info, instrument};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Query of the gateway return URL
#[derive(Debug, Deserialize)]
pub struct ReturnParams {
    /// Gateway-side order id
    pub token: String,
    #[serde(rename = "orderId")]
    pub order_id: String,
}

/// Query of the gateway cancel URL
#[derive(Debug, Deserialize)]
pub struct CancelParams {
    #[serde(rename = "orderId")]
    pub order_id: String,
}

#[derive(Debug, Serialize)]
pub struct SessionStatus {
    pub authenticated: bool,
    pub role: Role,
    pub offline: bool,
    pub is_staff: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
}

#[derive(Debug, Serialize)]
pub struct CatalogGame {
    #[serde(flatten)]
    pub game: Game,
    pub denominations: Vec<Denomination>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    pub retryable: bool,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
            retryable: false,
        }
    }
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn shop_error_to_response(err: ShopError) -> ApiError {
    let code = err.status_code();
    let response = ErrorResponse {
        retryable: err.is_retryable(),
        ..ErrorResponse::new(err.user_message(), code)
    };
    (
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(response),
    )
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "topup",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Current session as the UI should render it
pub async fn session_status(State(state): State<AppState>) -> Json<SessionStatus> {
    let snapshot = state.session.snapshot();
    Json(SessionStatus {
        authenticated: snapshot.is_authenticated(),
        role: snapshot.role,
        offline: snapshot.offline,
        is_staff: state.session.is_staff(),
        session: snapshot.session,
    })
}

/// Active games with their active denominations
#[instrument(skip(state))]
pub async fn list_catalog(State(state): State<AppState>) -> Result<Json<Vec<CatalogGame>>, ApiError> {
    let catalog = state.catalog.fetch_catalog().await.map_err(|e| {
        error!("Failed to load catalog: {}", e);
        shop_error_to_response(e)
    })?;

    let games = catalog
        .active_games()
        .map(|game| CatalogGame {
            game: game.clone(),
            denominations: catalog.denominations_for(&game.id).cloned().collect(),
        })
        .collect();
    Ok(Json(games))
}

/// Gateway return URL
#[instrument(skip(state, params), fields(order_id = %params.order_id))]
pub async fn payment_success(
    State(state): State<AppState>,
    Query(params): Query<ReturnParams>,
) -> Result<Html<String>, ApiError> {
    let snapshot = state
        .returns
        .handle_return(&params.token, &params.order_id)
        .await
        .map_err(|e| {
            error!("Gateway return failed: {}", e);
            shop_error_to_response(e)
        })?;

    info!(step = %snapshot.step, "Gateway return");
    Ok(Html(result_page(&params.order_id, &snapshot)))
}

/// Gateway cancel URL
#[instrument(skip(state, params), fields(order_id = %params.order_id))]
pub async fn payment_cancel(
    State(state): State<AppState>,
    Query(params): Query<CancelParams>,
) -> Result<Html<String>, ApiError> {
    let snapshot = state
        .returns
        .handle_cancel(&params.order_id)
        .await
        .map_err(shop_error_to_response)?;

    Ok(Html(result_page(&params.order_id, &snapshot)))
}

// =============================================================================
// Pages
// =============================================================================

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn result_page(order_id: &str, snapshot: &CheckoutSnapshot) -> String {
    let (icon, title, detail) = match snapshot.step {
        CheckoutStep::Completed => ("✅", "Payment Successful", "Your top-up is on its way.".to_string()),
        CheckoutStep::Cancelled => ("❌", "Payment Cancelled", "No charges were made.".to_string()),
        CheckoutStep::Failed => (
            "⚠️",
            "Payment Failed",
            snapshot
                .error_message
                .clone()
                .unwrap_or_else(|| "The payment could not be completed.".to_string()),
        ),
        _ => (
            "⏳",
            "Payment Processing",
            "The gateway is still confirming your payment.".to_string(),
        ),
    };

    format!(
        r#"
<!DOCTYPE html>
<html>
<head><title>{title}</title></head>
<body style="font-family: system-ui; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; background: linear-gradient(135deg, #1a1a2e 0%, #16213e 100%);">
    <div style="background: white; padding: 60px; border-radius: 16px; text-align: center;">
        <div style="font-size: 60px;">{icon}</div>
        <h1>{title}</h1>
        <p>Order: <code>{order}</code></p>
        <p style="color: #666;">{detail}</p>
    </div>
</body>
</html>
"#,
        title = title,
        icon = icon,
        order = escape_html(order_id),
        detail = escape_html(&detail),
    )
}
