//! Client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `CARTWHEEL_API_URL` - Backend API base URL (e.g. `https://shop.example.com/api/`)
//!
//! ## Optional
//! - `CARTWHEEL_STATE_DIR` - Directory for persisted local state (default: `.cartwheel`)
//! - `CARTWHEEL_HTTP_TIMEOUT_SECS` - Per-request timeout (default: 30)
//! - `CARTWHEEL_RENEWAL_INTERVAL_SECS` - Background credential renewal period (default: 1500)
//! - `CARTWHEEL_REFRESH_DEBOUNCE_MS` - Window in which repeated refreshes are skipped (default: 2000)
//! - `CARTWHEEL_ACCESS_TOKEN_TTL_SECS` - Assumed access token validity (default: 3600)
//! - `CARTWHEEL_CART_SYNC_DEBOUNCE_MS` - Quiet period before cart reconciliation (default: 500)
//! - `CARTWHEEL_LOGIN_CART_POLICY` - `replace` or `merge` (default: `replace`)

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Renew every 25 minutes for a 60 minute access token.
const DEFAULT_RENEWAL_INTERVAL_SECS: u64 = 25 * 60;
const DEFAULT_REFRESH_DEBOUNCE_MS: u64 = 2_000;
const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 60 * 60;
const DEFAULT_CART_SYNC_DEBOUNCE_MS: u64 = 500;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STATE_DIR: &str = ".cartwheel";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend API base URL, always ending in `/`
    pub api_url: Url,
    /// Directory holding persisted local state
    pub state_dir: PathBuf,
    /// Per-request HTTP timeout
    pub http_timeout: Duration,
    /// Session manager tuning
    pub session: SessionConfig,
    /// Cart synchronizer tuning
    pub cart: CartConfig,
}

/// Session manager settings.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Period of the background renewal task.
    pub renewal_interval: Duration,
    /// Manual refreshes within this window of the previous attempt are skipped.
    pub refresh_debounce: Duration,
    /// Assumed lifetime of an access token.
    pub access_token_ttl: chrono::Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            renewal_interval: Duration::from_secs(DEFAULT_RENEWAL_INTERVAL_SECS),
            refresh_debounce: Duration::from_millis(DEFAULT_REFRESH_DEBOUNCE_MS),
            access_token_ttl: chrono::Duration::seconds(DEFAULT_ACCESS_TOKEN_TTL_SECS),
        }
    }
}

/// Cart synchronizer settings.
#[derive(Debug, Clone, Copy)]
pub struct CartConfig {
    /// Quiet period after the last local edit before reconciling.
    pub sync_debounce: Duration,
    /// What happens to guest lines when a user signs in.
    pub login_policy: LoginCartPolicy,
}

impl CartConfig {
    /// Default settings (500 ms debounce, backend cart replaces guest cart).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sync_debounce: Duration::from_millis(DEFAULT_CART_SYNC_DEBOUNCE_MS),
            login_policy: LoginCartPolicy::ReplaceWithRemote,
        }
    }
}

impl Default for CartConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Handling of unsynced guest lines when a user becomes authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginCartPolicy {
    /// Adopt the backend cart and drop the guest lines.
    #[default]
    ReplaceWithRemote,
    /// Push the guest lines to the backend, then adopt the combined cart.
    MergeGuest,
}

impl FromStr for LoginCartPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::ReplaceWithRemote),
            "merge" => Ok(Self::MergeGuest),
            other => Err(format!("expected `replace` or `merge`, got `{other}`")),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let api_url = parse_api_url(&get_required_env("CARTWHEEL_API_URL")?)?;
        let state_dir = PathBuf::from(get_env_or_default("CARTWHEEL_STATE_DIR", DEFAULT_STATE_DIR));
        let http_timeout = Duration::from_secs(get_parsed_env(
            "CARTWHEEL_HTTP_TIMEOUT_SECS",
            DEFAULT_HTTP_TIMEOUT_SECS,
        )?);

        let session = SessionConfig {
            renewal_interval: Duration::from_secs(get_parsed_env(
                "CARTWHEEL_RENEWAL_INTERVAL_SECS",
                DEFAULT_RENEWAL_INTERVAL_SECS,
            )?),
            refresh_debounce: Duration::from_millis(get_parsed_env(
                "CARTWHEEL_REFRESH_DEBOUNCE_MS",
                DEFAULT_REFRESH_DEBOUNCE_MS,
            )?),
            access_token_ttl: chrono::Duration::seconds(get_parsed_env(
                "CARTWHEEL_ACCESS_TOKEN_TTL_SECS",
                DEFAULT_ACCESS_TOKEN_TTL_SECS,
            )?),
        };

        let cart = CartConfig {
            sync_debounce: Duration::from_millis(get_parsed_env(
                "CARTWHEEL_CART_SYNC_DEBOUNCE_MS",
                DEFAULT_CART_SYNC_DEBOUNCE_MS,
            )?),
            login_policy: get_parsed_env(
                "CARTWHEEL_LOGIN_CART_POLICY",
                LoginCartPolicy::ReplaceWithRemote,
            )?,
        };

        Ok(Self {
            api_url,
            state_dir,
            http_timeout,
            session,
            cart,
        })
    }

    /// Build a configuration for `api_url` with every optional setting at its default.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` if `api_url` is not an absolute URL.
    pub fn with_api_url(api_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            api_url: parse_api_url(api_url)?,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            session: SessionConfig::default(),
            cart: CartConfig::default(),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Parse the API base URL, ensuring a trailing slash so relative joins keep the path.
fn parse_api_url(raw: &str) -> Result<Url, ConfigError> {
    let mut normalized = raw.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Url::parse(&normalized)
        .map_err(|e| ConfigError::InvalidEnvVar("CARTWHEEL_API_URL".to_string(), e.to_string()))
}

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an optional environment variable, falling back to `default` when unset.
fn get_parsed_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}
