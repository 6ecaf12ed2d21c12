//! # Client Configuration
//!
//! Backend URLs, keys and per-operation timeouts.
//! Loaded from environment variables (with `.env` support) or a TOML file.

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use topup_core::ShopError;

/// Per-operation deadlines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Reads (catalog, order lookup, session fetch)
    pub read: Duration,
    /// Writes (order creation, sign-in)
    pub write: Duration,
    /// Payment calls, which are long-running
    pub payment: Duration,
    /// File uploads
    pub upload: Duration,
    /// Startup session fetch; the app continues as a guest after this
    pub bootstrap: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(15),
            write: Duration::from_secs(10),
            payment: Duration::from_secs(30),
            upload: Duration::from_secs(30),
            bootstrap: Duration::from_secs(5),
        }
    }
}

/// Backend client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the hosted backend (auth, REST and functions)
    pub api_base_url: String,

    /// Public anon key, sent as `apikey` and as the guest bearer token
    pub anon_key: String,

    /// Public URL of this storefront, used for gateway return URLs
    pub app_base_url: String,

    /// Directory holding one pending-payment file per order across gateway redirects
    pub store_path: PathBuf,

    /// File used to persist the auth session between runs
    pub session_path: Option<PathBuf>,

    pub timeouts: Timeouts,
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// Required env vars:
    /// - `TOPUP_API_URL`
    /// - `TOPUP_ANON_KEY`
    ///
    /// Optional: `TOPUP_APP_URL`, `TOPUP_STORE_PATH`, `TOPUP_SESSION_PATH`,
    /// `TOPUP_READ_TIMEOUT_SECS`, `TOPUP_WRITE_TIMEOUT_SECS`,
    /// `TOPUP_PAYMENT_TIMEOUT_SECS`, `TOPUP_BOOTSTRAP_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ShopError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let api_base_url = env::var("TOPUP_API_URL")
            .map_err(|_| ShopError::Configuration("TOPUP_API_URL not set".to_string()))?;

        let anon_key = env::var("TOPUP_ANON_KEY")
            .map_err(|_| ShopError::Configuration("TOPUP_ANON_KEY not set".to_string()))?;

        let mut config = Self::new(api_base_url, anon_key);

        if let Ok(url) = env::var("TOPUP_APP_URL") {
            config.app_base_url = url;
        }
        if let Ok(path) = env::var("TOPUP_STORE_PATH") {
            config.store_path = PathBuf::from(path);
        }
        if let Ok(path) = env::var("TOPUP_SESSION_PATH") {
            config.session_path = Some(PathBuf::from(path));
        }

        let t = &mut config.timeouts;
        override_secs("TOPUP_READ_TIMEOUT_SECS", &mut t.read)?;
        override_secs("TOPUP_WRITE_TIMEOUT_SECS", &mut t.write)?;
        override_secs("TOPUP_PAYMENT_TIMEOUT_SECS", &mut t.payment)?;
        override_secs("TOPUP_BOOTSTRAP_TIMEOUT_SECS", &mut t.bootstrap)?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML document
    pub fn from_toml(toml_str: &str) -> Result<Self, ShopError> {
        let file: FileConfig = toml::from_str(toml_str)
            .map_err(|e| ShopError::Configuration(format!("invalid config file: {}", e)))?;

        let mut config = Self::new(file.api_url, file.anon_key);
        if let Some(url) = file.app_url {
            config.app_base_url = url;
        }
        if let Some(path) = file.store_path {
            config.store_path = path;
        }
        config.session_path = file.session_path;

        if let Some(t) = file.timeouts {
            let timeouts = &mut config.timeouts;
            for (value, slot) in [
                (t.read_secs, &mut timeouts.read),
                (t.write_secs, &mut timeouts.write),
                (t.payment_secs, &mut timeouts.payment),
                (t.upload_secs, &mut timeouts.upload),
                (t.bootstrap_secs, &mut timeouts.bootstrap),
            ] {
                if let Some(secs) = value {
                    *slot = Duration::from_secs(secs);
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Create config with explicit values (for testing)
    pub fn new(api_base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            app_base_url: "http://localhost:8080".to_string(),
            store_path: PathBuf::from(".topup/pending"),
            session_path: None,
            timeouts: Timeouts::default(),
        }
    }

    fn validate(&self) -> Result<(), ShopError> {
        for (name, url) in [
            ("TOPUP_API_URL", &self.api_base_url),
            ("TOPUP_APP_URL", &self.app_base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ShopError::Configuration(format!(
                    "{} must start with http:// or https://",
                    name
                )));
            }
        }
        if self.anon_key.trim().is_empty() {
            return Err(ShopError::Configuration("TOPUP_ANON_KEY is empty".to_string()));
        }
        Ok(())
    }

    /// Builder: set the storefront URL
    pub fn with_app_base_url(mut self, url: impl Into<String>) -> Self {
        self.app_base_url = url.into();
        self
    }

    /// Builder: set timeouts
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Builder: set the pending payment file
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }
}

fn override_secs(var: &str, slot: &mut Duration) -> Result<(), ShopError> {
    if let Ok(raw) = env::var(var) {
        let secs: u64 = raw
            .parse()
            .map_err(|_| ShopError::Configuration(format!("{} must be a number of seconds", var)))?;
        *slot = Duration::from_secs(secs);
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    api_url: String,
    anon_key: String,
    #[serde(default)]
    app_url: Option<String>,
    #[serde(default)]
    store_path: Option<PathBuf>,
    #[serde(default)]
    session_path: Option<PathBuf>,
    #[serde(default)]
    timeouts: Option<FileTimeouts>,
}

#[derive(Debug, Deserialize)]
struct FileTimeouts {
    read_secs: Option<u64>,
    write_secs: Option<u64>,
    payment_secs: Option<u64>,
    upload_secs: Option<u64>,
    bootstrap_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new("https://api.example.com/", "anon");
        assert_eq!(config.api_base_url, "https://api.example.com");
        assert_eq!(config.timeouts.payment, Duration::from_secs(30));
        assert_eq!(config.timeouts.bootstrap, Duration::from_secs(5));
    }

    #[test]
    fn test_from_toml() {
        let config = ClientConfig::from_toml(
            r#"
            api_url = "https://api.example.com"
            anon_key = "anon-123"
            app_url = "https://shop.example.com"

            [timeouts]
            read_secs = 12
            payment_secs = 45
            "#,
        )
        .unwrap();

        assert_eq!(config.app_base_url, "https://shop.example.com");
        assert_eq!(config.timeouts.read, Duration::from_secs(12));
        assert_eq!(config.timeouts.write, Duration::from_secs(10));
        assert_eq!(config.timeouts.payment, Duration::from_secs(45));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let result = ClientConfig::from_toml(
            r#"
            api_url = "api.example.com"
            anon_key = "anon"
            "#,
        );
        assert!(matches!(result, Err(ShopError::Configuration(_))));
    }

    #[test]
    fn test_from_env_missing_key() {
        env::remove_var("TOPUP_API_URL");

        let result = ClientConfig::from_env();
        assert!(result.is_err());
    }
}
