//! # topup
//!
//! Game top-up storefront service.
//!
//! ## Usage
//!
//! ```bash
//! # Set environment variables (or copy config/topup.example.toml to config/topup.toml)
//! export TOPUP_API_URL=https://project.backend.example
//! export TOPUP_ANON_KEY=...
//! export TOPUP_APP_URL=https://shop.example
//!
//! # Run the server
//! topup
//! ```

use topup_app::state::load_client_config;
use topup_app::{forward_provider_events, routes, AppConfig, AppState};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    print_banner();

    let client_config = load_client_config()?;
    let config = AppConfig::from_env();
    let addr = config.socket_addr()?;
    let is_prod = config.is_production();

    info!("Environment: {}", config.environment);
    info!("Backend: {}", client_config.api_base_url);

    let (state, provider_events) = AppState::connect(config, &client_config)?;
    tokio::spawn(forward_provider_events(state.session.clone(), provider_events));

    // Restore any stored session; the service starts as a guest otherwise
    let session = state.session.bootstrap().await;
    if session.offline {
        warn!("Auth backend unreachable, starting in offline mode");
    } else {
        info!(
            authenticated = session.is_authenticated(),
            role = %session.role,
            "Session restored"
        );
    }

    match state.catalog.fetch_catalog().await {
        Ok(catalog) => info!("Games loaded: {}", catalog.active_games().count()),
        Err(e) => warn!("Catalog not loaded: {}", e),
    }

    let app = routes::create_router(state);

    info!("🚀 topup starting on http://{}", addr);
    if !is_prod {
        info!("📝 Health: http://{}/health", addr);
        info!("💳 Return URL: http://{}/payment/success", addr);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
  ◆ topup ◆
  ━━━━━━━━━━━━━━━━━━━━━━━
  Game points storefront
  Version: {}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
