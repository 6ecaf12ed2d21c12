//! # Error Types
//!
//! The error taxonomy seen by the session and checkout state machines.
//! Transport failures are classified before they get here, so callers only
//! ever match on `ShopError`.

use thiserror::Error;

/// Fallback message used when the backend gives us nothing readable.
pub const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong. Please try again.";

/// Core error type for storefront operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShopError {
    /// Local validation failed, nothing was sent to the network
    #[error("Validation error: {0}")]
    Validation(String),

    /// Session missing, invalid or expired
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Operation exceeded its deadline
    #[error("Request timed out after {after_ms} ms: {operation}")]
    Timeout { operation: String, after_ms: u64 },

    /// Caller abandoned the request before it finished
    #[error("Request aborted: {operation}")]
    Aborted { operation: String },

    /// Payment rejected by the gateway
    #[error("Payment failed [{gateway}]: {message}")]
    Gateway { gateway: String, message: String },

    /// Gateway exists but cannot be used right now
    #[error("Payment method {method} is temporarily unavailable")]
    GatewayUnavailable { method: String },

    /// Backend answered with an error status (or could not be reached)
    #[error("Server error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Server { status: Option<u16>, message: String },

    /// Resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Checkout event not allowed from the current step
    #[error("Cannot {event} while {from}")]
    InvalidTransition { from: String, event: String },

    /// A submission for this checkout is already running
    #[error("An order submission is already in progress")]
    SubmissionInFlight,

    /// Durable client-side storage failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors (missing keys, invalid URLs)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ShopError {
    /// Shorthand for a server error carrying a status code
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        ShopError::Server {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Returns true if the UI should offer a manual retry
    pub fn is_retryable(&self) -> bool {
        match self {
            ShopError::Timeout { .. } | ShopError::Aborted { .. } => true,
            ShopError::Server { status, .. } => status.map(|s| s >= 500).unwrap_or(true),
            _ => false,
        }
    }

    /// Returns true if the user has to sign in again
    pub fn requires_reauth(&self) -> bool {
        matches!(self, ShopError::Auth(_))
    }

    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self {
            ShopError::Validation(_) => 400,
            ShopError::Auth(_) => 401,
            ShopError::Timeout { .. } => 504,
            ShopError::Aborted { .. } => 499,
            ShopError::Gateway { .. } => 402,
            ShopError::GatewayUnavailable { .. } => 503,
            ShopError::Server { status, .. } => status.unwrap_or(502),
            ShopError::NotFound(_) => 404,
            ShopError::InvalidTransition { .. } => 409,
            ShopError::SubmissionInFlight => 409,
            ShopError::Storage(_) => 500,
            ShopError::Configuration(_) => 500,
            ShopError::Serialization(_) => 500,
        }
    }

    /// Message suitable for showing to a customer. Server messages are
    /// surfaced verbatim since they were already extracted from the payload.
    pub fn user_message(&self) -> String {
        match self {
            ShopError::Validation(msg) | ShopError::Auth(msg) => msg.clone(),
            ShopError::Server { message, .. } | ShopError::Gateway { message, .. } => {
                message.clone()
            }
            ShopError::Timeout { .. } => {
                "The request took too long. Please check your connection and try again."
                    .to_string()
            }
            ShopError::GatewayUnavailable { .. } => self.to_string(),
            ShopError::SubmissionInFlight => self.to_string(),
            _ => GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }
}

/// Result type alias for storefront operations
pub type ShopResult<T> = Result<T, ShopError>;
