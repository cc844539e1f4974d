//! Server configuration, loaded via the `config` crate from environment variables
//! (`SESSION__SECURE_COOKIES=false`, `PROVIDER__CLIENT_ID=...`).
//!
//! See [`ProviderConfig`] for the identity provider settings.

use serde::Deserialize;
use shopgate_access::ProviderConfig;

/// Top-level settings for the gate server.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Socket address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Cookie and verification settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Identity provider endpoints and client registration.
    pub provider: ProviderConfig,

    /// Gate paths and account defaults.
    pub access: AccessConfig,
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

/// Session-related configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Whether to set the Secure flag on cookies (requires HTTPS).
    /// Defaults to true for production safety; set to false for local HTTP development.
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,

    /// Lifetime of the refresh-token cookie, in days.
    #[serde(default = "default_refresh_token_days")]
    pub refresh_token_days: i64,

    /// How long a verification result is trusted before asking the provider again.
    #[serde(default = "default_verification_ttl_seconds")]
    pub verification_ttl_seconds: i64,

    /// Lifetime of the PKCE transaction cookies.
    #[serde(default = "default_login_transaction_minutes")]
    pub login_transaction_minutes: i64,
}

fn default_secure_cookies() -> bool {
    true
}

fn default_refresh_token_days() -> i64 {
    30
}

fn default_verification_ttl_seconds() -> i64 {
    300
}

fn default_login_transaction_minutes() -> i64 {
    10
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secure_cookies: default_secure_cookies(),
            refresh_token_days: default_refresh_token_days(),
            verification_ttl_seconds: default_verification_ttl_seconds(),
            login_transaction_minutes: default_login_transaction_minutes(),
        }
    }
}

/// Paths the gate redirects to, and the role given to new accounts.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    #[serde(default = "default_login_path")]
    pub login_path: String,

    /// Where a successful login lands.
    #[serde(default = "default_landing_path")]
    pub landing_path: String,

    #[serde(default = "default_unauthorized_path")]
    pub unauthorized_path: String,

    /// Absolute URL the provider returns to after end-session.
    pub post_logout_redirect: String,

    /// Fallback when the store carries no `default_user_role`.
    #[serde(default = "default_role")]
    pub default_role: String,
}

fn default_login_path() -> String {
    "/auth/login".to_string()
}

fn default_landing_path() -> String {
    "/dashboard".to_string()
}

fn default_unauthorized_path() -> String {
    "/unauthorized".to_string()
}

fn default_role() -> String {
    "customer".to_string()
}

impl AccessConfig {
    /// Defaults for every path, with the given post-logout URL.
    #[must_use]
    pub fn new(post_logout_redirect: String) -> Self {
        Self {
            login_path: default_login_path(),
            landing_path: default_landing_path(),
            unauthorized_path: default_unauthorized_path(),
            post_logout_redirect,
            default_role: default_role(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
