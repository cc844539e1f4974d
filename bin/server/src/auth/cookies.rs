//! Auth cookie names and options.
//!
//! Every cookie is HttpOnly, `SameSite=Lax` and scoped to `/`. Options are
//! built once per token type in [`CookiePolicy`] and reused by the gate and
//! the auth routes.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use shopgate_access::{CredentialBundle, LoginTransaction};
use time::Duration;

use crate::config::SessionConfig;

pub const ACCESS_TOKEN: &str = "access_token";
pub const REFRESH_TOKEN: &str = "refresh_token";
pub const ID_TOKEN: &str = "id_token";
pub const OAUTH_STATE: &str = "oauth_state";
pub const OAUTH_CODE_VERIFIER: &str = "oauth_code_verifier";
pub const OAUTH_NONCE: &str = "oauth_nonce";
pub const OAUTH_RETURN_TO: &str = "oauth_return_to";

const CREDENTIAL_COOKIES: [&str; 3] = [ACCESS_TOKEN, REFRESH_TOKEN, ID_TOKEN];
const TRANSACTION_COOKIES: [&str; 4] = [OAUTH_STATE, OAUTH_CODE_VERIFIER, OAUTH_NONCE, OAUTH_RETURN_TO];

/// Options shared by all cookies of one token type.
#[derive(Debug, Clone, PartialEq)]
pub struct CookieSettings {
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
    pub path: String,
    /// `None` means the lifetime is decided per cookie.
    pub max_age: Option<Duration>,
}

impl CookieSettings {
    fn new(secure: bool, max_age: Option<Duration>) -> Self {
        Self {
            http_only: true,
            secure,
            same_site: SameSite::Lax,
            path: "/".to_string(),
            max_age,
        }
    }

    /// Builds a cookie with these options and the given lifetime.
    #[must_use]
    pub fn build_with_max_age(
        &self,
        name: &'static str,
        value: String,
        max_age: Duration,
    ) -> Cookie<'static> {
        Cookie::build((name, value))
            .http_only(self.http_only)
            .secure(self.secure)
            .same_site(self.same_site)
            .path(self.path.clone())
            .max_age(max_age)
            .build()
    }

    /// Builds a cookie with the configured lifetime.
    #[must_use]
    pub fn build(&self, name: &'static str, value: String) -> Cookie<'static> {
        self.build_with_max_age(name, value, self.max_age.unwrap_or(Duration::ZERO))
    }

    /// An empty, already-expired cookie that makes the browser drop `name`.
    #[must_use]
    pub fn expire(&self, name: &'static str) -> Cookie<'static> {
        self.build_with_max_age(name, String::new(), Duration::ZERO)
    }
}

/// PKCE transaction values read back from the callback request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredTransaction {
    pub state: Option<String>,
    pub code_verifier: Option<String>,
    pub nonce: Option<String>,
    pub return_to: Option<String>,
}

/// Cookie options for credentials and the login transaction.
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    credentials: CookieSettings,
    refresh: CookieSettings,
    transaction: CookieSettings,
}

impl CookiePolicy {
    #[must_use]
    pub fn new(secure: bool, refresh_lifetime: Duration, transaction_lifetime: Duration) -> Self {
        Self {
            credentials: CookieSettings::new(secure, None),
            refresh: CookieSettings::new(secure, Some(refresh_lifetime)),
            transaction: CookieSettings::new(secure, Some(transaction_lifetime)),
        }
    }

    #[must_use]
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            config.secure_cookies,
            Duration::days(config.refresh_token_days),
            Duration::minutes(config.login_transaction_minutes),
        )
    }

    /// Sets `access_token` and `id_token` to live until the bundle expires,
    /// and `refresh_token` for the fixed refresh lifetime.
    #[must_use]
    pub fn set_credentials(&self, jar: CookieJar, tokens: &CredentialBundle) -> CookieJar {
        let remaining = Duration::seconds(tokens.remaining_at(Utc::now()).num_seconds().max(0));

        let mut jar = jar.add(self.credentials.build_with_max_age(
            ACCESS_TOKEN,
            tokens.access_token().to_string(),
            remaining,
        ));
        if let Some(id_token) = tokens.id_token() {
            jar = jar.add(self.credentials.build_with_max_age(
                ID_TOKEN,
                id_token.to_string(),
                remaining,
            ));
        }
        if let Some(refresh_token) = tokens.refresh_token() {
            jar = jar.add(self.refresh.build(REFRESH_TOKEN, refresh_token.to_string()));
        }
        jar
    }

    /// Expires `access_token`, `refresh_token` and `id_token`.
    #[must_use]
    pub fn clear_credentials(&self, jar: CookieJar) -> CookieJar {
        CREDENTIAL_COOKIES
            .into_iter()
            .fold(jar, |jar, name| jar.add(self.credentials.expire(name)))
    }

    #[must_use]
    pub fn set_transaction(
        &self,
        jar: CookieJar,
        transaction: &LoginTransaction,
        return_to: Option<&str>,
    ) -> CookieJar {
        let jar = jar
            .add(self.transaction.build(OAUTH_STATE, transaction.state.clone()))
            .add(
                self.transaction
                    .build(OAUTH_CODE_VERIFIER, transaction.code_verifier.clone()),
            )
            .add(self.transaction.build(OAUTH_NONCE, transaction.nonce.clone()));
        match return_to {
            Some(path) => jar.add(self.transaction.build(OAUTH_RETURN_TO, path.to_string())),
            None => jar.add(self.transaction.expire(OAUTH_RETURN_TO)),
        }
    }

    #[must_use]
    pub fn clear_transaction(&self, jar: CookieJar) -> CookieJar {
        TRANSACTION_COOKIES
            .into_iter()
            .fold(jar, |jar, name| jar.add(self.transaction.expire(name)))
    }

    /// Expires every auth and transaction cookie.
    #[must_use]
    pub fn clear_all(&self, jar: CookieJar) -> CookieJar {
        self.clear_transaction(self.clear_credentials(jar))
    }
}

/// Reads a non-empty cookie value.
#[must_use]
pub fn value(jar: &CookieJar, name: &str) -> Option<String> {
    jar.get(name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

#[must_use]
pub fn read_transaction(jar: &CookieJar) -> StoredTransaction {
    StoredTransaction {
        state: value(jar, OAUTH_STATE),
        code_verifier: value(jar, OAUTH_CODE_VERIFIER),
        nonce: value(jar, OAUTH_NONCE),
        return_to: value(jar, OAUTH_RETURN_TO),
    }
}
