//! # Hosted Auth Provider
//!
//! `AuthProvider` over the backend's auth endpoints. The provider keeps the
//! issued session itself (optionally on disk) so `get_session` can answer at
//! startup, and pushes `ProviderEvent`s when it refreshes tokens on its own.

use crate::executor::{ApiRequest, OperationKind, RequestError, RequestExecutor};
use crate::store::{read_json, remove_file, write_json_atomic};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::sync::broadcast;
use topup_core::{
    validate_email, AuthProvider, AuthSession, AuthUser, ProviderEvent, ShopError, ShopResult,
    UserProfile,
};
use tracing::{debug, info, instrument, warn};

const PROVIDER_EVENT_CAPACITY: usize = 16;

/// Token grant response from `/auth/v1/token` and `/auth/v1/signup`
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    /// Unix seconds
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self) -> AuthSession {
        let expires_at = self
            .expires_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(|| Utc::now() + Duration::seconds(self.expires_in.unwrap_or(3600)));

        AuthSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

#[derive(Default)]
struct StoredSession {
    loaded: bool,
    session: Option<AuthSession>,
}

/// Auth provider backed by the hosted auth service
pub struct HttpAuthProvider {
    executor: RequestExecutor,
    session_path: Option<PathBuf>,
    stored: Mutex<StoredSession>,
    events: broadcast::Sender<ProviderEvent>,
}

impl HttpAuthProvider {
    pub fn new(executor: RequestExecutor) -> Self {
        let (events, _) = broadcast::channel(PROVIDER_EVENT_CAPACITY);
        Self {
            executor,
            session_path: None,
            stored: Mutex::new(StoredSession::default()),
            events,
        }
    }

    /// Builder: persist the session to `path` between runs
    pub fn with_session_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_path = Some(path.into());
        self
    }

    /// Events the provider raises by itself (background token refreshes)
    pub fn provider_events(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    fn current(&self) -> Option<AuthSession> {
        self.stored
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .session
            .clone()
    }

    async fn ensure_loaded(&self) {
        let loaded = self.stored.lock().unwrap_or_else(|e| e.into_inner()).loaded;
        if loaded {
            return;
        }

        let from_disk = match &self.session_path {
            Some(path) => read_json::<AuthSession>(path).await,
            None => None,
        };

        let mut stored = self.stored.lock().unwrap_or_else(|e| e.into_inner());
        if !stored.loaded {
            stored.loaded = true;
            if stored.session.is_none() {
                stored.session = from_disk;
            }
        }
    }

    async fn remember(&self, session: Option<AuthSession>) {
        {
            let mut stored = self.stored.lock().unwrap_or_else(|e| e.into_inner());
            stored.loaded = true;
            stored.session = session.clone();
        }

        let Some(path) = &self.session_path else {
            return;
        };
        let result = match &session {
            Some(session) => write_json_atomic(path, session).await,
            None => remove_file(path).await,
        };
        if let Err(e) = result {
            warn!(path = %path.display(), "Could not persist auth session: {}", e);
        }
    }

    async fn grant(&self, grant_type: &str, body: serde_json::Value) -> Result<AuthSession, RequestError> {
        let request = ApiRequest::post(format!("/auth/v1/token?grant_type={}", grant_type))
            .operation(format!("auth {}", grant_type.replace('_', " ")))
            .json(&body)?;
        let response: TokenResponse = self.executor.execute(request).await?;
        Ok(response.into_session())
    }

    async fn fetch_user(&self, access_token: &str) -> Result<AuthUser, RequestError> {
        let request = ApiRequest::get("/auth/v1/user")
            .operation("load session user")
            .bearer(access_token);
        self.executor.execute(request).await
    }
}

/// Credential and grant failures come back as 400/422 from the token endpoint
fn auth_failure(err: RequestError) -> ShopError {
    match err {
        RequestError::Http { status, message } if (400..500).contains(&status) && status != 404 => {
            ShopError::Auth(message)
        }
        other => other.into(),
    }
}

#[async_trait]
impl AuthProvider for HttpAuthProvider {
    #[instrument(skip(self, password))]
    async fn sign_in(&self, email: &str, password: &str) -> ShopResult<AuthSession> {
        let session = self
            .grant("password", json!({ "email": email, "password": password }))
            .await
            .map_err(auth_failure)?;

        info!(user_id = %session.user.id, "Signed in");
        self.remember(Some(session.clone())).await;
        Ok(session)
    }

    #[instrument(skip(self, password))]
    async fn sign_up(&self, email: &str, password: &str) -> ShopResult<Option<AuthSession>> {
        validate_email(email)?;

        let request = ApiRequest::post("/auth/v1/signup")
            .operation("sign up")
            .json(&json!({ "email": email, "password": password }))
            .map_err(ShopError::from)?;
        let body: serde_json::Value = self.executor.send(request).await.map_err(auth_failure)?;

        if body.get("access_token").is_none() {
            info!("Sign-up accepted, email confirmation pending");
            return Ok(None);
        }

        let response: TokenResponse = serde_json::from_value(body)
            .map_err(|e| ShopError::Serialization(format!("sign up response: {}", e)))?;
        let session = response.into_session();
        info!(user_id = %session.user.id, "Signed up");
        self.remember(Some(session.clone())).await;
        Ok(Some(session))
    }

    #[instrument(skip_all)]
    async fn sign_out(&self, access_token: &str) -> ShopResult<()> {
        self.remember(None).await;

        let request = ApiRequest::post("/auth/v1/logout")
            .operation("sign out")
            .bearer(access_token);
        match self.executor.send(request).await {
            Ok(_) => Ok(()),
            // Token already invalid, which is what we wanted
            Err(RequestError::Http { status: 401, .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn get_session(&self) -> ShopResult<Option<AuthSession>> {
        self.ensure_loaded().await;

        let Some(mut session) = self.current() else {
            debug!("No stored session");
            return Ok(None);
        };

        if session.is_expired() {
            debug!("Stored session expired, refreshing");
            return self.refresh_session().await;
        }

        match self.fetch_user(&session.access_token).await {
            Ok(user) => {
                session.user = user;
                self.remember(Some(session.clone())).await;
                Ok(Some(session))
            }
            Err(RequestError::Http { status: 401 | 403, .. }) => {
                debug!("Stored token rejected, refreshing");
                self.refresh_session().await
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn refresh_session(&self) -> ShopResult<Option<AuthSession>> {
        self.ensure_loaded().await;

        let Some(refresh_token) = self.current().and_then(|s| s.refresh_token) else {
            self.remember(None).await;
            return Ok(None);
        };

        match self
            .grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
        {
            Ok(session) => {
                info!(user_id = %session.user.id, "Token refreshed");
                self.remember(Some(session.clone())).await;
                // Nobody listening is fine
                let _ = self.events.send(ProviderEvent::TokenRefreshed(session.clone()));
                Ok(Some(session))
            }
            Err(RequestError::Http { status, message }) if (400..500).contains(&status) => {
                warn!(status, "Refresh token rejected: {}", message);
                self.remember(None).await;
                let _ = self.events.send(ProviderEvent::SignedOut);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, access_token))]
    async fn get_profile(&self, user_id: &str, access_token: &str) -> ShopResult<UserProfile> {
        let request = ApiRequest::get(format!("/rest/v1/profiles?id=eq.{}&select=*", user_id))
            .operation("load profile")
            .kind(OperationKind::Read)
            .bearer(access_token);
        let rows: Vec<UserProfile> = self.executor.execute(request).await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| ShopError::NotFound(format!("profile for user {}", user_id)))
    }
}

impl std::fmt::Debug for HttpAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAuthProvider")
            .field("session_path", &self.session_path)
            .field("has_session", &self.current().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use topup_core::{BearerToken, Role};
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> HttpAuthProvider {
        let config = ClientConfig::new(server.uri(), "anon-key");
        HttpAuthProvider::new(RequestExecutor::new(&config, BearerToken::new()).unwrap())
    }

    fn token_body(access: &str, refresh: &str) -> serde_json::Value {
        json!({
            "access_token": access,
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": refresh,
            "user": {"id": "u1", "email": "buyer@example.com", "app_metadata": {"role": "cs"}}
        })
    }

    #[tokio::test]
    async fn test_sign_in_stores_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .and(body_json(json!({"email": "buyer@example.com", "password": "pw"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-1", "rt-1")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("authorization", "Bearer at-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"id": "u1", "email": "buyer@example.com", "app_metadata": {"role": "cs"}}),
            ))
            .mount(&server)
            .await;

        let provider = provider(&server);
        let session = provider.sign_in("buyer@example.com", "pw").await.unwrap();
        assert_eq!(session.user.id, "u1");
        assert_eq!(session.embedded_role().role, Role::Cs);

        let again = provider.get_session().await.unwrap().unwrap();
        assert_eq!(again.access_token, "at-1");
    }

    #[tokio::test]
    async fn test_bad_credentials_are_auth_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(
                json!({"error_description": "Invalid login credentials"}),
            ))
            .mount(&server)
            .await;

        let err = provider(&server).sign_in("buyer@example.com", "nope").await.unwrap_err();
        assert_eq!(err, ShopError::Auth("Invalid login credentials".into()));
    }

    #[tokio::test]
    async fn test_no_stored_session_is_none() {
        let server = MockServer::start().await;
        assert!(provider(&server).get_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejected_token_triggers_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-old", "rt-1")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"msg": "JWT expired"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "refresh_token"))
            .and(body_json(json!({"refresh_token": "rt-1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-new", "rt-2")))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider(&server);
        let mut events = provider.provider_events();
        provider.sign_in("buyer@example.com", "pw").await.unwrap();

        let session = provider.get_session().await.unwrap().unwrap();
        assert_eq!(session.access_token, "at-new");
        assert!(matches!(events.try_recv(), Ok(ProviderEvent::TokenRefreshed(_))));
    }

    #[tokio::test]
    async fn test_sign_up_pending_confirmation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/signup"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "u2", "email": "new@example.com"})),
            )
            .mount(&server)
            .await;

        let result = provider(&server).sign_up("new@example.com", "pw").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_session_persisted_to_disk() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-1", "rt-1")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": "u1", "email": "buyer@example.com"})),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("session.json");

        provider(&server)
            .with_session_path(&file)
            .sign_in("buyer@example.com", "pw")
            .await
            .unwrap();

        // A fresh provider picks the session up from disk
        let restored = provider(&server)
            .with_session_path(&file)
            .get_session()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(restored.access_token, "at-1");
    }

    #[tokio::test]
    async fn test_profile_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .and(query_param("id", "eq.u1"))
            .and(header("authorization", "Bearer at-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"id": "u1", "role": "admin"}])),
            )
            .mount(&server)
            .await;

        let profile = provider(&server).get_profile("u1", "at-1").await.unwrap();
        assert_eq!(profile.role, Some(Role::Admin));
    }
}
