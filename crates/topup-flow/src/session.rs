//! # Session Manager
//!
//! Owns the signed-in session and its role. Construct once at startup and
//! share the `Arc`.
//!
//! Updates race: a slow startup fetch, a background profile load, an
//! explicit sign-in and events pushed by the provider can all resolve in any
//! order. Two rules keep the applied state sane:
//!
//! - **Sequence numbers.** Every update carries a number from one counter.
//!   Background fetches take theirs when they start; explicit sign-in,
//!   sign-out and provider events take theirs when they are applied. An
//!   update older than the last applied one is discarded.
//! - **No downgrade.** For the same user, a role only replaces the current
//!   one if its confidence is at least as high.

use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;
use topup_core::{
    validate_email, AuthEvent, AuthPhase, AuthProvider, AuthSession, BearerToken, ProviderEvent,
    ResolvedRole, Role, RoleConfidence, Session, ShopError, ShopResult,
};
use tracing::{debug, info, instrument, warn};

/// Session manager settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Limit on the startup session fetch
    pub bootstrap_timeout: Duration,
    /// Limit on sign-in, sign-up, sign-out and refresh calls
    pub auth_timeout: Duration,
    /// Buffered events per subscriber
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bootstrap_timeout: Duration::from_secs(5),
            auth_timeout: Duration::from_secs(10),
            event_capacity: 64,
        }
    }
}

/// Read-only view for the UI
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub phase: AuthPhase,
    pub session: Option<Session>,
    pub role: Role,
    pub role_confidence: RoleConfidence,
    pub offline: bool,
    pub version: u64,
}

impl SessionSnapshot {
    pub fn is_authenticated(&self) -> bool {
        matches!(self.phase, AuthPhase::Authenticated(_))
    }
}

struct SessionState {
    phase: AuthPhase,
    session: Option<Session>,
    role: ResolvedRole,
    offline: bool,
    last_applied: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: AuthPhase::Unauthenticated,
            session: None,
            role: ResolvedRole::fallback(),
            offline: false,
            last_applied: 0,
        }
    }
}

/// Typed auth event stream. Dropping it (or calling `unsubscribe`) stops delivery.
pub struct Subscription {
    receiver: broadcast::Receiver<AuthEvent>,
}

impl Subscription {
    /// Next event, or `None` once the manager is gone
    pub async fn recv(&mut self) -> Option<AuthEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Auth subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<AuthEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}

/// How an incoming session relates to the applied one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    /// Sign-in: replaces whatever is applied
    Explicit,
    /// Fetch or refresh: same user keeps its stronger role
    Background,
}

/// Owner of the auth session and role
pub struct SessionManager {
    provider: Arc<dyn AuthProvider>,
    token: BearerToken,
    config: SessionConfig,
    seq: AtomicU64,
    state: Mutex<SessionState>,
    events: broadcast::Sender<AuthEvent>,
    me: Weak<SessionManager>,
}

impl SessionManager {
    pub fn new(provider: Arc<dyn AuthProvider>, token: BearerToken, config: SessionConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Arc::new_cyclic(|me| Self {
            provider,
            token,
            config,
            seq: AtomicU64::new(0),
            state: Mutex::new(SessionState::default()),
            events,
            me: me.clone(),
        })
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, event: AuthEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Apply a provider session. Returns the applied session, or `None` if stale.
    fn apply_session(&self, seq: u64, auth: &AuthSession, incoming: ResolvedRole, signal: Signal) -> Option<Session> {
        let mut state = self.lock();
        if seq < state.last_applied {
            debug!(seq, last_applied = state.last_applied, "Discarding stale session update");
            return None;
        }

        let same_user = state
            .session
            .as_ref()
            .map(|s| s.user_id == auth.user.id)
            .unwrap_or(false);

        let role = if signal == Signal::Background && same_user && !incoming.at_least_as_strong_as(&state.role) {
            debug!(
                current = %state.role.role,
                incoming = %incoming.role,
                "Keeping stronger role"
            );
            state.role
        } else {
            incoming
        };

        let session = Session::from_auth(auth, role.role, seq);
        state.session = Some(session.clone());
        state.role = role;
        state.phase = AuthPhase::Authenticated(role.role);
        state.offline = false;
        state.last_applied = seq;
        drop(state);

        self.token.set(Some(auth.access_token.clone()));
        Some(session)
    }

    /// Apply a role from a background profile load
    fn apply_role(&self, seq: u64, user_id: &str, incoming: ResolvedRole) -> Option<Session> {
        let mut state = self.lock();
        if seq < state.last_applied {
            debug!(seq, last_applied = state.last_applied, "Discarding stale profile");
            return None;
        }
        if state.session.as_ref().map(|s| s.user_id.as_str()) != Some(user_id) {
            debug!("Discarding profile for a different session");
            return None;
        }
        if !incoming.at_least_as_strong_as(&state.role) || incoming == state.role {
            return None;
        }

        state.role = incoming;
        state.phase = AuthPhase::Authenticated(incoming.role);
        state.last_applied = seq;
        state.session.as_mut().map(|s| {
            s.role = incoming.role;
            s.source_version = seq;
            s.clone()
        })
    }

    /// Clear the session. Returns false if a newer update already applied.
    fn apply_sign_out(&self, seq: u64) -> bool {
        let mut state = self.lock();
        if seq < state.last_applied {
            debug!(seq, last_applied = state.last_applied, "Discarding stale sign-out");
            return false;
        }
        let was_signed_in = state.session.is_some();
        state.session = None;
        state.role = ResolvedRole::fallback();
        state.phase = AuthPhase::Unauthenticated;
        state.last_applied = seq;
        drop(state);

        self.token.set(None);
        was_signed_in
    }

    /// Load the profile in the background and apply its role if it is not stale
    fn spawn_profile_refresh(&self, user_id: String, access_token: String) {
        let Some(me) = self.me.upgrade() else {
            return;
        };
        let seq = self.next_seq();
        tokio::spawn(async move {
            me.refresh_profile(seq, &user_id, &access_token).await;
        });
    }

    async fn refresh_profile(&self, seq: u64, user_id: &str, access_token: &str) {
        let fetched = timeout(
            self.config.auth_timeout,
            self.provider.get_profile(user_id, access_token),
        )
        .await;

        match fetched {
            Ok(Ok(profile)) => {
                if let Some(session) = self.apply_role(seq, user_id, profile.resolved_role()) {
                    info!(role = %session.role, "Role updated from profile");
                    self.publish(AuthEvent::TokenRefreshed { session });
                }
            }
            Ok(Err(e)) => debug!("Profile refresh failed: {}", e),
            Err(_) => debug!("Profile refresh timed out"),
        }
    }

    /// Restore an existing session, if any. Never fails: on timeout or error
    /// the manager goes `offline` and the app continues as a guest.
    ///
    /// The sequence number is taken when this is called, not when the
    /// returned future is first polled.
    pub fn bootstrap(&self) -> impl Future<Output = SessionSnapshot> + Send + '_ {
        let seq = self.next_seq();
        async move {
            let fetched = timeout(self.config.bootstrap_timeout, self.provider.get_session()).await;

            match fetched {
                Err(_) => {
                    warn!(
                        timeout_ms = self.config.bootstrap_timeout.as_millis() as u64,
                        "Session fetch timed out, continuing offline"
                    );
                    self.set_offline(true);
                }
                Ok(Err(e)) => {
                    warn!("Session fetch failed, continuing offline: {}", e);
                    self.set_offline(true);
                }
                Ok(Ok(None)) => {
                    debug!("No existing session");
                    self.apply_sign_out(seq);
                }
                Ok(Ok(Some(auth))) => {
                    let role = auth.embedded_role();
                    if let Some(session) = self.apply_session(seq, &auth, role, Signal::Background) {
                        info!(user_id = %session.user_id, role = %session.role, "Session restored");
                        self.spawn_profile_refresh(session.user_id.clone(), session.access_token.clone());
                        self.publish(AuthEvent::SignedIn { session });
                    }
                }
            }

            self.snapshot()
        }
    }

    /// Sign in. The result always wins over anything still in flight.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> ShopResult<Session> {
        validate_email(email)?;
        if password.is_empty() {
            return Err(ShopError::Validation("Password is required".to_string()));
        }

        let previous = {
            let mut state = self.lock();
            let previous = state.phase;
            state.phase = AuthPhase::Authenticating;
            previous
        };

        let result = timeout(self.config.auth_timeout, self.provider.sign_in(email, password))
            .await
            .unwrap_or_else(|_| Err(self.timeout_error("sign in")));

        match result {
            Ok(auth) => self.accept_sign_in(&auth).ok_or_else(|| {
                ShopError::Auth("Sign-in was superseded".to_string())
            }),
            Err(e) => {
                warn!("Sign-in failed: {}", e);
                self.restore_phase(previous);
                if matches!(e, ShopError::Timeout { .. }) {
                    self.set_offline(true);
                }
                Err(e)
            }
        }
    }

    /// Create an account. Signs in when the provider returns a session right away.
    #[instrument(skip(self, password))]
    pub async fn sign_up(&self, email: &str, password: &str) -> ShopResult<Option<Session>> {
        validate_email(email)?;
        if password.len() < 6 {
            return Err(ShopError::Validation(
                "Password must be at least 6 characters".to_string(),
            ));
        }

        let result = timeout(self.config.auth_timeout, self.provider.sign_up(email, password))
            .await
            .unwrap_or_else(|_| Err(self.timeout_error("sign up")))?;

        Ok(result.and_then(|auth| self.accept_sign_in(&auth)))
    }

    fn accept_sign_in(&self, auth: &AuthSession) -> Option<Session> {
        let seq = self.next_seq();
        let session = self.apply_session(seq, auth, auth.embedded_role().signed_in(), Signal::Explicit)?;
        info!(user_id = %session.user_id, role = %session.role, "Signed in");

        self.spawn_profile_refresh(session.user_id.clone(), session.access_token.clone());
        self.publish(AuthEvent::SignedIn {
            session: session.clone(),
        });
        Some(session)
    }

    fn restore_phase(&self, previous: AuthPhase) {
        let mut state = self.lock();
        if state.phase == AuthPhase::Authenticating {
            state.phase = previous;
        }
    }

    fn timeout_error(&self, operation: &str) -> ShopError {
        ShopError::Timeout {
            operation: operation.to_string(),
            after_ms: self.config.auth_timeout.as_millis() as u64,
        }
    }

    /// Sign out locally and, best effort, remotely
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        let seq = self.next_seq();
        let access_token = self.lock().session.as_ref().map(|s| s.access_token.clone());

        self.apply_sign_out(seq);
        self.publish(AuthEvent::SignedOut);
        info!("Signed out");

        let Some(access_token) = access_token else {
            return;
        };
        match timeout(self.config.auth_timeout, self.provider.sign_out(&access_token)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Remote sign-out failed: {}", e);
                self.set_offline(true);
            }
            Err(_) => {
                warn!("Remote sign-out timed out");
                self.set_offline(true);
            }
        }
    }

    /// Re-fetch the session and profile
    #[instrument(skip(self))]
    pub async fn refresh_session(&self) -> ShopResult<Option<Session>> {
        let seq = self.next_seq();
        let result = timeout(self.config.auth_timeout, self.provider.refresh_session())
            .await
            .unwrap_or_else(|_| Err(self.timeout_error("refresh session")));

        match result {
            Ok(Some(auth)) => {
                let Some(session) = self.apply_session(seq, &auth, auth.embedded_role(), Signal::Background) else {
                    return Ok(self.snapshot().session);
                };
                self.spawn_profile_refresh(session.user_id.clone(), session.access_token.clone());
                self.publish(AuthEvent::TokenRefreshed {
                    session: session.clone(),
                });
                Ok(Some(session))
            }
            Ok(None) | Err(ShopError::Auth(_)) => {
                if self.apply_sign_out(seq) {
                    info!("Session ended during refresh");
                    self.publish(AuthEvent::SignedOut);
                }
                Ok(None)
            }
            Err(e) => {
                warn!("Session refresh failed: {}", e);
                self.set_offline(true);
                Err(e)
            }
        }
    }

    /// Apply an event pushed by the auth provider
    pub fn handle_provider_event(&self, event: ProviderEvent) {
        let seq = self.next_seq();
        match event {
            ProviderEvent::SignedIn(auth) => {
                if let Some(session) = self.apply_session(seq, &auth, auth.embedded_role().signed_in(), Signal::Explicit) {
                    self.spawn_profile_refresh(session.user_id.clone(), session.access_token.clone());
                    self.publish(AuthEvent::SignedIn { session });
                }
            }
            ProviderEvent::TokenRefreshed(auth) => {
                if let Some(session) = self.apply_session(seq, &auth, auth.embedded_role(), Signal::Background) {
                    self.publish(AuthEvent::TokenRefreshed { session });
                }
            }
            ProviderEvent::SignedOut => {
                if self.apply_sign_out(seq) {
                    self.publish(AuthEvent::SignedOut);
                }
            }
        }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.events.subscribe(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.lock();
        SessionSnapshot {
            phase: state.phase,
            session: state.session.clone(),
            role: state.role.role,
            role_confidence: state.role.confidence,
            offline: state.offline,
            version: state.last_applied,
        }
    }

    pub fn role(&self) -> Role {
        self.lock().role.role
    }

    pub fn is_admin(&self) -> bool {
        let state = self.lock();
        state.session.is_some() && state.role.role == Role::Admin
    }

    /// Admin or customer service
    pub fn is_staff(&self) -> bool {
        let state = self.lock();
        state.session.is_some() && state.role.role.is_staff()
    }

    pub fn is_offline(&self) -> bool {
        self.lock().offline
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}
