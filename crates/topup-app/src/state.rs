//! # Application State
//!
//! Shared state for the Axum application.
//! Holds the single session manager, the return handler and the catalog source.

use std::net::{AddrParseError, SocketAddr};
use std::sync::Arc;
use tokio::sync::broadcast;
use topup_client::{
    default_selector, ClientConfig, FileCheckoutStore, HttpAuthProvider, HttpOrderRepository,
    RequestExecutor,
};
use topup_core::{BearerToken, CatalogSource, CheckoutUrls, ProviderEvent};
use topup_flow::{CheckoutDeps, ReturnHandler, SessionConfig, SessionManager};
use tracing::{debug, info, warn};

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Environment (development, staging, production)
    pub environment: String,
}

impl AppConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        }
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    /// Created once; every handler sees the same session
    pub session: Arc<SessionManager>,
    pub returns: ReturnHandler,
    pub catalog: Arc<dyn CatalogSource>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        session: Arc<SessionManager>,
        returns: ReturnHandler,
        catalog: Arc<dyn CatalogSource>,
    ) -> Self {
        Self {
            config,
            session,
            returns,
            catalog,
        }
    }

    /// Wire the HTTP collaborators for `client`. Also returns the auth
    /// provider's event stream, to be fed to [`forward_provider_events`].
    pub fn connect(
        config: AppConfig,
        client: &ClientConfig,
    ) -> anyhow::Result<(Self, broadcast::Receiver<ProviderEvent>)> {
        let token = BearerToken::new();
        let executor = RequestExecutor::new(client, token.clone())?;

        let mut auth = HttpAuthProvider::new(executor.clone());
        if let Some(path) = &client.session_path {
            auth = auth.with_session_path(path.clone());
        }
        let provider_events = auth.provider_events();

        let session = SessionManager::new(
            Arc::new(auth),
            token,
            SessionConfig {
                bootstrap_timeout: client.timeouts.bootstrap,
                auth_timeout: client.timeouts.write,
                ..SessionConfig::default()
            },
        );

        let urls = CheckoutUrls::new(client.app_base_url.clone());
        let repository = Arc::new(HttpOrderRepository::new(executor.clone()));
        let deps = CheckoutDeps {
            orders: repository.clone(),
            gateways: default_selector(&executor, urls),
            store: Arc::new(FileCheckoutStore::new(client.store_path.clone())),
        };

        let state = Self::new(config, session, ReturnHandler::new(deps), repository);
        Ok((state, provider_events))
    }
}

/// Client config from `config/topup.toml` when present, else the environment
pub fn load_client_config() -> anyhow::Result<ClientConfig> {
    let config_paths = [
        "config/topup.toml",
        "../config/topup.toml",
        "../../config/topup.toml",
    ];

    for path in config_paths {
        if let Ok(content) = std::fs::read_to_string(path) {
            let config = ClientConfig::from_toml(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path, e))?;
            info!("Loaded client config from {}", path);
            return Ok(config);
        }
    }

    Ok(ClientConfig::from_env()?)
}

/// Apply auth provider events to the session until the provider goes away
pub async fn forward_provider_events(
    session: Arc<SessionManager>,
    mut events: broadcast::Receiver<ProviderEvent>,
) {
    loop {
        match events.recv().await {
            Ok(event) => session.handle_provider_event(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Provider events lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("Provider event stream closed");
}
