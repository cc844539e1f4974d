//! Authentication routes for login, callback, logout, refresh and user info.

use axum::{
    Json,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shopgate_access::{LocalUser, Session, jwt};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::{AppState, cookies};

const MAX_ERROR_CODE_LEN: usize = 64;

/// Protocol failures on the callback, reported as `?error=<code>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackError {
    /// The provider redirected back with an `error` parameter.
    Provider { code: String },
    MissingCode,
    InvalidState,
    MissingVerifier,
    AuthFailed,
}

impl CallbackError {
    /// Short code for the login page. Provider codes are reduced to
    /// `[a-z0-9_]`.
    #[must_use]
    pub fn code(&self) -> String {
        match self {
            Self::Provider { code } => {
                let sanitized: String = code
                    .chars()
                    .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
                    .map(|c| c.to_ascii_lowercase())
                    .take(MAX_ERROR_CODE_LEN)
                    .collect();
                if sanitized.is_empty() {
                    "provider_error".to_string()
                } else {
                    sanitized
                }
            }
            Self::MissingCode => "missing_code".to_string(),
            Self::InvalidState => "invalid_state".to_string(),
            Self::MissingVerifier => "missing_verifier".to_string(),
            Self::AuthFailed => "auth_failed".to_string(),
        }
    }
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "login callback rejected: {}", self.code())
    }
}

impl std::error::Error for CallbackError {}

/// Query parameters for login start.
#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    redirect: Option<String>,
}

/// Query parameters for the OAuth callback.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
    pub local_revoked: bool,
    pub provider_logout_url: Option<String>,
    pub redirect_url: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub user: LocalUser,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: LocalUser,
    pub refreshed: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
}

fn found(location: String) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

fn unauthorized(error: &'static str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(ErrorBody { error })).into_response()
}

/// Only same-origin absolute paths are accepted as post-login targets.
pub(crate) fn is_local_path(path: &str) -> bool {
    path.starts_with('/') && !path.starts_with("//") && !path.contains('\\')
}

fn validate_callback(
    query: &CallbackQuery,
    stored: &cookies::StoredTransaction,
) -> Result<(String, String), CallbackError> {
    if let Some(code) = &query.error {
        return Err(CallbackError::Provider { code: code.clone() });
    }
    let code = query
        .code
        .clone()
        .filter(|c| !c.is_empty())
        .ok_or(CallbackError::MissingCode)?;
    match (&query.state, &stored.state) {
        (Some(received), Some(expected)) if received == expected => {}
        _ => return Err(CallbackError::InvalidState),
    }
    let verifier = stored
        .code_verifier
        .clone()
        .ok_or(CallbackError::MissingVerifier)?;
    Ok((code, verifier))
}

/// Starts the OIDC login flow by redirecting to the identity provider.
pub async fn login_start(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LoginQuery>,
    jar: CookieJar,
) -> Response {
    let request = state.provider.authorization_request();
    let return_to = query.redirect.as_deref().filter(|p| is_local_path(p));
    let jar = state
        .cookies
        .set_transaction(jar, &request.transaction, return_to);
    (jar, found(request.url)).into_response()
}

/// Handles the provider's redirect back after the user authenticates.
#[instrument(skip_all)]
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
    jar: CookieJar,
) -> Response {
    let stored = cookies::read_transaction(&jar);
    let jar = state.cookies.clear_transaction(jar);
    let login_error = |e: &CallbackError| {
        format!(
            "{}?error={}",
            state.access.login_path,
            urlencoding::encode(&e.code())
        )
    };

    let (code, verifier) = match validate_callback(&query, &stored) {
        Ok(pair) => pair,
        Err(e) => {
            warn!(error = %e, "login callback rejected");
            return (jar, found(login_error(&e))).into_response();
        }
    };

    let session = match state.auth.authenticate_with_code(&code, &verifier).await {
        Ok(session) => session,
        Err(e) if e.is_configuration() => {
            error!(error = %e, "login failed on a configuration error");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                jar,
                "Authentication is misconfigured",
            )
                .into_response();
        }
        Err(e) => {
            warn!(error = %e, "authentication failed");
            return (jar, found(login_error(&CallbackError::AuthFailed))).into_response();
        }
    };

    check_nonce(&session, stored.nonce.as_deref());

    let target = stored
        .return_to
        .filter(|p| is_local_path(p))
        .unwrap_or_else(|| state.access.landing_path.clone());
    let jar = state.cookies.set_credentials(jar, &session.tokens);
    info!(user_id = %session.user.id(), "login complete");
    (jar, found(target)).into_response()
}

/// Compares the id token's nonce with the one sent at login start. A
/// mismatch is logged only.
fn check_nonce(session: &Session, expected: Option<&str>) {
    let Some(id_token) = session.tokens.id_token() else {
        return;
    };
    let received = jwt::nonce_claim(id_token);
    match (received.as_deref(), expected) {
        (Some(received), Some(expected)) if received == expected => {}
        (None, _) => {}
        _ => warn!(user_id = %session.user.id(), "id token nonce mismatch"),
    }
}

struct LogoutOutcome {
    local_revoked: bool,
    provider_logout_url: Option<String>,
}

async fn perform_logout(state: &AppState, jar: &CookieJar) -> LogoutOutcome {
    let local_revoked = match cookies::value(jar, cookies::ACCESS_TOKEN) {
        Some(token) => {
            state.cache.invalidate(&token);
            state.auth.logout(&token).await
        }
        None => false,
    };
    let provider_logout_url = cookies::value(jar, cookies::ID_TOKEN).map(|id_token| {
        state
            .provider
            .build_logout_url(&id_token, &state.access.post_logout_redirect)
            .to_string()
    });
    LogoutOutcome {
        local_revoked,
        provider_logout_url,
    }
}

/// Logs out for script clients. Cookies are cleared whatever the outcome.
pub async fn logout_api(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> (CookieJar, Json<LogoutResponse>) {
    let outcome = perform_logout(&state, &jar).await;
    let redirect_url = outcome
        .provider_logout_url
        .clone()
        .unwrap_or_else(|| "/".to_string());
    (
        state.cookies.clear_all(jar),
        Json(LogoutResponse {
            success: true,
            local_revoked: outcome.local_revoked,
            provider_logout_url: outcome.provider_logout_url,
            redirect_url,
        }),
    )
}

/// Logs out and sends the browser to the provider's end-session page.
pub async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let outcome = perform_logout(&state, &jar).await;
    let target = outcome
        .provider_logout_url
        .unwrap_or_else(|| "/".to_string());
    (state.cookies.clear_all(jar), found(target)).into_response()
}

/// Refreshes from the refresh cookie, through the same single-flight guard
/// as the gate.
async fn rotate(
    state: &AppState,
    jar: CookieJar,
) -> Result<(CookieJar, Option<Session>), StatusCode> {
    let Some(refresh_token) = cookies::value(&jar, cookies::REFRESH_TOKEN) else {
        return Ok((jar, None));
    };
    let auth = &state.auth;
    let outcome = state
        .refresh_flights
        .run(&refresh_token, || auth.refresh_session(&refresh_token))
        .await;

    match outcome {
        Ok(Some(session)) => {
            if let Some(stale) = cookies::value(&jar, cookies::ACCESS_TOKEN) {
                state.cache.invalidate(&stale);
            }
            state.cache.put(session.tokens.access_token(), true);
            let jar = state.cookies.set_credentials(jar, &session.tokens);
            Ok((jar, Some(session)))
        }
        Ok(None) => Ok((state.cookies.clear_credentials(jar), None)),
        Err(e) => {
            warn!(error = %e, "refresh failed");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Explicit refresh for script clients.
pub async fn refresh(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    match rotate(&state, jar).await {
        Ok((jar, Some(session))) => {
            let expires_at = session.tokens.expires_at();
            (
                jar,
                Json(RefreshResponse {
                    user: session.user,
                    expires_at,
                }),
            )
                .into_response()
        }
        Ok((jar, None)) => (jar, unauthorized("refresh_failed")).into_response(),
        Err(_) => unauthorized("refresh_failed"),
    }
}

/// Current user, refreshing once if the access token no longer verifies.
pub async fn me(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    if let Some(token) = cookies::value(&jar, cookies::ACCESS_TOKEN) {
        match state.auth.get_session_by_access_token(&token).await {
            Ok(Some(session)) => {
                return Json(MeResponse {
                    user: session.user,
                    refreshed: false,
                })
                .into_response();
            }
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "session lookup failed");
                return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
                    .into_response();
            }
        }
    }

    match rotate(&state, jar).await {
        Ok((jar, Some(session))) => (
            jar,
            Json(MeResponse {
                user: session.user,
                refreshed: true,
            }),
        )
            .into_response(),
        Ok((jar, None)) => (jar, unauthorized("not_authenticated")).into_response(),
        Err(_) => unauthorized("not_authenticated"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::token_digest;
    use crate::auth::testing::{
        FakeProvider, MemoryStore, account, app_state, bundle, id_token_with_nonce, identity,
        storefront_model,
    };
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::Request,
        routing::{get, post},
    };
    use shopgate_access::CredentialBundle;
    use std::sync::atomic::Ordering;
    use tower::ServiceExt;

    fn fixtures() -> (Arc<FakeProvider>, Arc<MemoryStore>, Arc<AppState>) {
        let provider = Arc::new(FakeProvider::new());
        let store = Arc::new(MemoryStore::new(storefront_model()));
        let state = app_state(provider.clone(), store.clone());
        (provider, store, state)
    }

    fn router(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/auth/login/start", get(login_start))
            .route("/auth/callback", get(callback))
            .route("/auth/logout", get(logout))
            .route("/api/auth/logout", post(logout_api))
            .route("/api/auth/refresh", post(refresh))
            .route("/api/auth/me", get(me))
            .with_state(state)
    }

    fn request(method: &str, uri: &str, cookies: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if !cookies.is_empty() {
            let header: Vec<String> = cookies.iter().map(|(k, v)| format!("{k}={v}")).collect();
            builder = builder.header(header::COOKIE, header.join("; "));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn location(response: &Response) -> String {
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    fn set_cookies(response: &Response) -> Vec<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_string))
            .collect()
    }

    fn cleared(response: &Response, name: &str) -> bool {
        set_cookies(response)
            .iter()
            .any(|c| c.starts_with(&format!("{name}=;")) && c.contains("Max-Age=0"))
    }

    async fn json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    const TRANSACTION: [(&str, &str); 3] = [
        ("oauth_state", "state-1"),
        ("oauth_code_verifier", "verifier-1"),
        ("oauth_nonce", "nonce-1"),
    ];

    #[tokio::test]
    async fn login_start_sets_transaction_and_redirects() {
        let (_, _, state) = fixtures();
        let response = router(state)
            .oneshot(request("GET", "/auth/login/start?redirect=%2Forders", &[]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert!(location(&response).starts_with("https://idp.example.com/oauth/authorize"));
        let cookies = set_cookies(&response);
        assert!(cookies.iter().any(|c| c.starts_with("oauth_state=state-1")));
        assert!(cookies.iter().any(|c| c.starts_with("oauth_code_verifier=verifier-1")));
        assert!(cookies.iter().any(|c| c.starts_with("oauth_nonce=nonce-1")));
        assert!(cookies.iter().any(|c| c.starts_with("oauth_return_to=/orders")));
        assert!(cookies.iter().all(|c| c.contains("HttpOnly")));
    }

    #[tokio::test]
    async fn login_start_ignores_foreign_redirect() {
        let (_, _, state) = fixtures();
        let response = router(state)
            .oneshot(request(
                "GET",
                "/auth/login/start?redirect=%2F%2Fevil.example.com",
                &[],
            ))
            .await
            .unwrap();
        assert!(cleared(&response, "oauth_return_to"));
    }

    #[tokio::test]
    async fn callback_rejects_in_order() {
        let (_, _, state) = fixtures();
        let cases = [
            ("/auth/callback?error=access_denied&code=c&state=state-1", "access_denied"),
            ("/auth/callback?state=state-1", "missing_code"),
            ("/auth/callback?code=c&state=other", "invalid_state"),
        ];
        for (uri, expected) in cases {
            let response = router(state.clone())
                .oneshot(request("GET", uri, &TRANSACTION))
                .await
                .unwrap();
            assert_eq!(location(&response), format!("/auth/login?error={expected}"));
            assert!(cleared(&response, "oauth_state"));
            assert!(cleared(&response, "oauth_code_verifier"));
        }

        let response = router(state)
            .oneshot(request(
                "GET",
                "/auth/callback?code=c&state=state-1",
                &[("oauth_state", "state-1")],
            ))
            .await
            .unwrap();
        assert_eq!(location(&response), "/auth/login?error=missing_verifier");
    }

    #[test]
    fn provider_error_codes_are_sanitized() {
        let err = CallbackError::Provider {
            code: "<script>Bad Thing</script>".to_string(),
        };
        assert_eq!(err.code(), "scriptbadthingscript");
        let empty = CallbackError::Provider {
            code: "!!!".to_string(),
        };
        assert_eq!(empty.code(), "provider_error");
    }

    #[tokio::test]
    async fn successful_callback_sets_credentials_and_lands() {
        let (provider, store, state) = fixtures();
        let tokens = CredentialBundle::new(
            "at-1".to_string(),
            Some("rt-1".to_string()),
            Some(id_token_with_nonce("nonce-1")),
            Some(Utc::now() + chrono::Duration::hours(1)),
        );
        provider.add_code("code-1", tokens);
        provider.add_identity("at-1", identity("cust-1", "ada@example.com"));

        let response = router(state)
            .oneshot(request(
                "GET",
                "/auth/callback?code=code-1&state=state-1",
                &TRANSACTION,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/dashboard");
        let cookies = set_cookies(&response);
        assert!(cookies.iter().any(|c| c.starts_with("access_token=at-1")));
        assert!(cookies.iter().any(|c| c.starts_with("refresh_token=rt-1")));
        assert!(cookies.iter().any(|c| c.starts_with("id_token=")));
        assert!(cleared(&response, "oauth_nonce"));
        assert_eq!(store.accounts().len(), 1);
    }

    #[tokio::test]
    async fn callback_returns_to_carried_path() {
        let (provider, _, state) = fixtures();
        provider.add_code("code-1", bundle("at-1", None, 3600));
        provider.add_identity("at-1", identity("cust-1", "ada@example.com"));
        let mut cookies = TRANSACTION.to_vec();
        cookies.push(("oauth_return_to", "/orders"));

        let response = router(state)
            .oneshot(request(
                "GET",
                "/auth/callback?code=code-1&state=state-1",
                &cookies,
            ))
            .await
            .unwrap();
        assert_eq!(location(&response), "/orders");
    }

    #[tokio::test]
    async fn rejected_code_redirects_with_auth_failed() {
        let (_, store, state) = fixtures();
        let response = router(state)
            .oneshot(request(
                "GET",
                "/auth/callback?code=used&state=state-1",
                &TRANSACTION,
            ))
            .await
            .unwrap();
        assert_eq!(location(&response), "/auth/login?error=auth_failed");
        assert!(store.accounts().is_empty());
    }

    #[tokio::test]
    async fn missing_default_role_is_500() {
        let (provider, store, state) = fixtures();
        store.set_default_role(Some("wholesale"));
        provider.add_code("code-1", bundle("at-1", None, 3600));
        provider.add_identity("at-1", identity("cust-1", "ada@example.com"));

        let response = router(state)
            .oneshot(request(
                "GET",
                "/auth/callback?code=code-1&state=state-1",
                &TRANSACTION,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn api_logout_revokes_and_clears_everything() {
        let (provider, store, state) = fixtures();
        provider.add_code("code-1", bundle("at-1", Some("rt-1"), 3600));
        provider.add_identity("at-1", identity("cust-1", "ada@example.com"));
        state
            .auth
            .authenticate_with_code("code-1", "verifier")
            .await
            .expect("login should succeed");
        state.cache.put("at-1", true);

        let response = router(state.clone())
            .oneshot(request(
                "POST",
                "/api/auth/logout",
                &[("access_token", "at-1"), ("id_token", "a.b.c")],
            ))
            .await
            .unwrap();

        for name in ["access_token", "refresh_token", "id_token"] {
            assert!(cleared(&response, name), "{name} should be cleared");
        }
        let body = json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["local_revoked"], true);
        let url = body["provider_logout_url"].as_str().expect("logout url");
        assert!(url.starts_with("https://idp.example.com/logout?id_token_hint=a.b.c"));
        assert!(store.issued(&token_digest("at-1")).is_some_and(|t| t.revoked));
        assert_eq!(state.cache.get("at-1"), None);
    }

    #[tokio::test]
    async fn logout_clears_cookies_even_when_store_is_down() {
        let (_, store, state) = fixtures();
        store.offline.store(true, Ordering::SeqCst);

        let response = router(state)
            .oneshot(request("GET", "/auth/logout", &[("access_token", "at-1")]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/");
        for name in ["access_token", "refresh_token", "id_token"] {
            assert!(cleared(&response, name), "{name} should be cleared");
        }
    }

    #[tokio::test]
    async fn refresh_endpoint_rotates_cookies() {
        let (provider, store, state) = fixtures();
        store.insert_account(account(Some("cust-1"), "ada@example.com", &["customer"]));
        provider.add_refresh("rt-1", bundle("at-2", Some("rt-2"), 3600));
        provider.add_identity("at-2", identity("cust-1", "ada@example.com"));

        let response = router(state)
            .oneshot(request("POST", "/api/auth/refresh", &[("refresh_token", "rt-1")]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            set_cookies(&response)
                .iter()
                .any(|c| c.starts_with("access_token=at-2"))
        );
        let body = json(response).await;
        assert_eq!(body["user"]["email"], "ada@example.com");
        assert!(body["expires_at"].is_string());
    }

    #[tokio::test]
    async fn refresh_endpoint_without_cookie_is_401() {
        let (_, _, state) = fixtures();
        let response = router(state)
            .oneshot(request("POST", "/api/auth/refresh", &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn me_returns_user_with_grants() {
        let (provider, store, state) = fixtures();
        store.insert_account(account(Some("cust-1"), "ada@example.com", &["customer"]));
        provider.add_identity("at-1", identity("cust-1", "ada@example.com"));

        let response = router(state)
            .oneshot(request("GET", "/api/auth/me", &[("access_token", "at-1")]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["refreshed"], false);
        assert!(
            body["user"]["permissions"]
                .as_array()
                .expect("permissions")
                .iter()
                .any(|p| p == "view_orders")
        );
    }

    #[tokio::test]
    async fn me_refreshes_invalid_session() {
        let (provider, store, state) = fixtures();
        store.insert_account(account(Some("cust-1"), "ada@example.com", &["customer"]));
        provider.add_refresh("rt-1", bundle("at-2", None, 3600));
        provider.add_identity("at-2", identity("cust-1", "ada@example.com"));

        let response = router(state)
            .oneshot(request(
                "GET",
                "/api/auth/me",
                &[("access_token", "at-expired"), ("refresh_token", "rt-1")],
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["refreshed"], true);
    }

    #[tokio::test]
    async fn me_without_session_is_401() {
        let (_, _, state) = fixtures();
        let response = router(state)
            .oneshot(request("GET", "/api/auth/me", &[("access_token", "nope")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
