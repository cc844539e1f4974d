//! Credential bundles, sessions and login transactions.
//!
//! Nothing here is persisted: a [`Session`] is rebuilt on every verification
//! and the tokens only ever live in cookies.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::user::LocalUser;

/// Tokens issued by the provider for one login or refresh.
///
/// A bundle is replaced wholesale on refresh; it is never patched in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBundle {
    access_token: String,
    refresh_token: Option<String>,
    id_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl CredentialBundle {
    #[must_use]
    pub fn new(
        access_token: String,
        refresh_token: Option<String>,
        id_token: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            id_token,
            expires_at,
        }
    }

    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    #[must_use]
    pub fn id_token(&self) -> Option<&str> {
        self.id_token.as_deref()
    }

    /// Provider-reported expiry. Unknown for bundles rebuilt from a bare
    /// access token.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Remaining lifetime at `now`, floored at zero. An unknown expiry
    /// counts as already elapsed.
    #[must_use]
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at
            .map_or(Duration::zero(), |at| (at - now).max(Duration::zero()))
    }

    /// Fills in a refresh token the provider did not rotate.
    #[must_use]
    pub fn or_refresh_token(mut self, previous: &str) -> Self {
        if self.refresh_token.is_none() {
            self.refresh_token = Some(previous.to_string());
        }
        self
    }
}

/// A verified session: the resolved local account plus the credentials that
/// proved it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user: LocalUser,
    pub tokens: CredentialBundle,
}

impl Session {
    #[must_use]
    pub fn new(user: LocalUser, tokens: CredentialBundle) -> Self {
        Self { user, tokens }
    }
}

/// PKCE state carried in cookies between login start and callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginTransaction {
    pub state: String,
    pub code_verifier: String,
    pub nonce: String,
}
