//! Identity provider configuration.
//!
//! The storefront authenticates customers against a single OAuth2 provider
//! using the Authorization Code flow with PKCE. Endpoints are configured
//! explicitly; there is no discovery step.
//!
//! Fields with defaults can be omitted when loading from environment variables.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Endpoints and client registration for the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Authorization endpoint the browser is sent to on login.
    authorize_url: String,
    /// Token endpoint for the code and refresh grants.
    token_url: String,
    /// Identity query endpoint used for live verification and user info.
    identity_url: String,
    /// End-session endpoint.
    logout_url: String,
    client_id: String,
    /// Sent as HTTP Basic auth on token requests when present.
    #[serde(default)]
    client_secret: Option<String>,
    /// Callback URL registered with the provider.
    redirect_uri: String,
    /// Comma-separated scopes.
    /// Default: "openid,email,customer-account-api:full"
    #[serde(default = "default_scopes")]
    scopes: String,
    /// Upper bound on every provider round-trip, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    request_timeout_ms: u64,
}

fn default_scopes() -> String {
    "openid,email,customer-account-api:full".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl ProviderConfig {
    /// Creates a configuration for a provider whose endpoints share `base_url`:
    /// `/oauth/authorize`, `/oauth/token`, `/graphql` and `/logout`.
    #[must_use]
    pub fn with_base_url(base_url: &str, client_id: String, redirect_uri: String) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            authorize_url: format!("{base}/oauth/authorize"),
            token_url: format!("{base}/oauth/token"),
            identity_url: format!("{base}/graphql"),
            logout_url: format!("{base}/logout"),
            client_id,
            client_secret: None,
            redirect_uri,
            scopes: default_scopes(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }

    #[must_use]
    pub fn with_client_secret(mut self, secret: String) -> Self {
        self.client_secret = Some(secret);
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn authorize_url(&self) -> &str {
        &self.authorize_url
    }

    #[must_use]
    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    #[must_use]
    pub fn identity_url(&self) -> &str {
        &self.identity_url
    }

    #[must_use]
    pub fn logout_url(&self) -> &str {
        &self.logout_url
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_deref()
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Scopes to request, parsed from the comma-separated setting.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        self.scopes
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
