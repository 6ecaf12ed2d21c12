//! # Session Types
//!
//! Authentication session, roles and the auth provider seam.
//!
//! Roles carry a confidence so that a weak signal (a fallback default when
//! no role could be read) never overwrites a strong one (claims, profile or
//! an explicit sign-in).

use crate::error::{ShopError, ShopResult};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Storefront role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    /// Customer service
    #[serde(alias = "customer_service")]
    Cs,
    #[default]
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Cs => "cs",
            Role::User => "user",
        }
    }

    /// Admin or customer service
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Admin | Role::Cs)
    }
}

impl std::str::FromStr for Role {
    type Err = ShopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "cs" | "customer_service" => Ok(Role::Cs),
            "user" => Ok(Role::User),
            other => Err(ShopError::Validation(format!("Unknown role: {}", other))),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much a role value can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleConfidence {
    /// Fallback used when nothing told us the role
    Default,
    /// Read from token claims or the profile
    Verified,
    /// Carried by the result of an explicit sign-in; holds until sign-out
    SignIn,
}

/// A role together with where it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRole {
    pub role: Role,
    pub confidence: RoleConfidence,
}

impl ResolvedRole {
    pub fn verified(role: Role) -> Self {
        Self {
            role,
            confidence: RoleConfidence::Verified,
        }
    }

    pub fn fallback() -> Self {
        Self {
            role: Role::User,
            confidence: RoleConfidence::Default,
        }
    }

    /// Raise a role read from a sign-in result to `SignIn`. A fallback stays
    /// a fallback so the profile can still fill it in.
    pub fn signed_in(self) -> Self {
        match self.confidence {
            RoleConfidence::Default => self,
            _ => Self {
                confidence: RoleConfidence::SignIn,
                ..self
            },
        }
    }

    /// True if `self` may replace `current`
    pub fn at_least_as_strong_as(&self, current: &ResolvedRole) -> bool {
        self.confidence >= current.confidence
    }
}

/// User record embedded in an auth session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub app_metadata: serde_json::Value,
}

/// Session as returned by the auth provider
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub user: AuthUser,
}

impl AuthSession {
    /// Role carried by the session itself: the access token's claims first,
    /// then the embedded user's `app_metadata`. No network involved.
    pub fn embedded_role(&self) -> ResolvedRole {
        role_from_claims(&self.access_token)
            .or_else(|| role_from_metadata(&self.user.app_metadata))
            .map(ResolvedRole::verified)
            .unwrap_or_else(ResolvedRole::fallback)
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("user", &self.user)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Profile row fetched in the background after bootstrap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(alias = "id")]
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl UserProfile {
    pub fn resolved_role(&self) -> ResolvedRole {
        self.role
            .map(ResolvedRole::verified)
            .unwrap_or_else(ResolvedRole::fallback)
    }
}

/// The applied session, owned by the session manager
#[derive(Clone, PartialEq, Serialize)]
pub struct Session {
    pub user_id: String,
    pub email: String,
    pub role: Role,
    #[serde(skip)]
    pub access_token: String,
    #[serde(skip)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    /// Sequence number of the update that produced this value
    pub source_version: u64,
}

impl Session {
    pub fn from_auth(auth: &AuthSession, role: Role, source_version: u64) -> Self {
        Self {
            user_id: auth.user.id.clone(),
            email: auth.user.email.clone(),
            role,
            access_token: auth.access_token.clone(),
            refresh_token: auth.refresh_token.clone(),
            expires_at: auth.expires_at,
            source_version,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("role", &self.role)
            .field("expires_at", &self.expires_at)
            .field("source_version", &self.source_version)
            .finish_non_exhaustive()
    }
}

/// Authentication lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "role", rename_all = "snake_case")]
pub enum AuthPhase {
    #[default]
    Unauthenticated,
    Authenticating,
    Authenticated(Role),
}

/// Events published to subscribers of the session manager
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn { session: Session },
    SignedOut,
    TokenRefreshed { session: Session },
}

/// Events pushed by the auth provider itself
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    SignedIn(AuthSession),
    SignedOut,
    TokenRefreshed(AuthSession),
}

/// External auth provider (sign-in, sign-up, sign-out, get-session)
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> ShopResult<AuthSession>;

    /// `None` when the account needs email confirmation before a session exists
    async fn sign_up(&self, email: &str, password: &str) -> ShopResult<Option<AuthSession>>;

    async fn sign_out(&self, access_token: &str) -> ShopResult<()>;

    /// Existing session, if any. `Ok(None)` is a definitive "signed out".
    async fn get_session(&self) -> ShopResult<Option<AuthSession>>;

    /// Force a token refresh
    async fn refresh_session(&self) -> ShopResult<Option<AuthSession>>;

    /// Profile details for the signed-in user
    async fn get_profile(&self, user_id: &str, access_token: &str) -> ShopResult<UserProfile>;
}

/// Shared bearer token cell. The session manager writes it, the request
/// executor reads it for every call.
#[derive(Clone, Default)]
pub struct BearerToken {
    inner: Arc<RwLock<Option<String>>>,
}

impl BearerToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, token: Option<String>) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = token;
    }

    pub fn get(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerToken")
            .field("present", &self.get().is_some())
            .finish()
    }
}

/// Read the role out of a JWT payload without verifying the signature.
/// The backend verifies tokens; the client only needs the hint.
pub fn role_from_claims(token: &str) -> Option<Role> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;

    role_from_metadata(claims.get("app_metadata").unwrap_or(&serde_json::Value::Null))
        .or_else(|| claim_role(&claims, "user_role"))
        .or_else(|| claim_role(&claims, "role"))
}

fn role_from_metadata(metadata: &serde_json::Value) -> Option<Role> {
    claim_role(metadata, "role")
}

fn claim_role(value: &serde_json::Value, key: &str) -> Option<Role> {
    value.get(key)?.as_str()?.parse().ok()
}
