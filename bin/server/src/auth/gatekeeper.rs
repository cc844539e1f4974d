//! Per-request gate in front of every page route.
//!
//! Each request walks an explicit state machine:
//!
//! ```text
//! Classify ─┬─ PublicPass
//!           ├─ RedirectLanding        (login page with a valid token)
//!           ├─ NoToken
//!           └─ Verify ─┬─ PermitCheck ─┬─ Allow
//!                      │               ├─ DenyPerm
//!                      │               └─ DenyAuth
//!                      ├─ Allow        (route declares no policy)
//!                      ├─ Refresh ─┬─ PermitCheck / Allow
//!                      │           └─ DenyAuth
//!                      └─ DenyAuth
//! ```
//!
//! Any error raised while verifying, refreshing or checking permissions
//! ends in `DenyAuth`.

use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use chrono::{Duration, Utc};
use shopgate_access::{AccessPolicy, AuthenticationError, RouteClass, Session, jwt};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{AppState, cookies};

/// Tokens this close to their `exp` claim are refreshed without asking the
/// provider first.
const EXPIRY_LEEWAY_SECONDS: i64 = 60;

/// States of the gate. The last five are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Classify,
    Verify,
    Refresh,
    PermitCheck,
    PublicPass,
    RedirectLanding,
    NoToken,
    Allow,
    DenyAuth,
    DenyPerm,
}

impl GateState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            Self::Classify | Self::Verify | Self::Refresh | Self::PermitCheck
        )
    }
}

/// Failures inside the gate. All of them deny authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// A state was entered without the data it needs.
    MissingContext { what: &'static str },
    Authentication(AuthenticationError),
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingContext { what } => write!(f, "gate state entered without {what}"),
            Self::Authentication(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for GateError {}

impl From<AuthenticationError> for GateError {
    fn from(err: AuthenticationError) -> Self {
        Self::Authentication(err)
    }
}

/// Access token the gate verified for this request.
///
/// After a refresh this is the new token, which the request's own cookies
/// do not carry yet.
#[derive(Debug, Clone)]
pub struct VerifiedAccessToken(pub String);

/// Session the gate already resolved for this request.
#[derive(Debug, Clone)]
pub struct VerifiedSession(pub Session);

/// Result of running the gate for one request.
#[derive(Debug, Clone)]
pub struct GateDecision {
    pub state: GateState,
    /// Every state visited, terminal state included.
    pub trail: Vec<GateState>,
    pub verified_token: Option<String>,
    pub session: Option<Session>,
    /// Set when a refresh produced new credentials that must be sent back.
    pub rotated: bool,
}

struct GateRun<'a> {
    app: &'a AppState,
    path: &'a str,
    policy: Option<&'a AccessPolicy>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    verified: bool,
    rotated: bool,
    session: Option<Session>,
}

impl<'a> GateRun<'a> {
    async fn step(&mut self, state: GateState) -> Result<GateState, GateError> {
        match state {
            GateState::Classify => Ok(self.classify().await),
            GateState::Verify => self.verify().await,
            GateState::Refresh => self.refresh().await,
            GateState::PermitCheck => self.permit_check().await,
            terminal => Ok(terminal),
        }
    }

    async fn classify(&mut self) -> GateState {
        match self.app.routes.classify(self.path) {
            RouteClass::Bypass => GateState::PublicPass,
            RouteClass::Public => {
                if self.path == self.app.access.login_path {
                    if let Some(token) = self.access_token.clone() {
                        if self.token_is_valid(&token).await {
                            return GateState::RedirectLanding;
                        }
                    }
                }
                GateState::PublicPass
            }
            RouteClass::Protected(policy) => {
                self.policy = Some(policy);
                if self.access_token.is_some() {
                    GateState::Verify
                } else {
                    GateState::NoToken
                }
            }
        }
    }

    async fn verify(&mut self) -> Result<GateState, GateError> {
        let token = self
            .access_token
            .clone()
            .ok_or(GateError::MissingContext {
                what: "an access token",
            })?;

        if self.token_is_valid(&token).await {
            self.verified = true;
            return Ok(self.after_verification());
        }
        if self.refresh_token.is_some() {
            Ok(GateState::Refresh)
        } else {
            Ok(GateState::DenyAuth)
        }
    }

    async fn refresh(&mut self) -> Result<GateState, GateError> {
        let refresh_token = self
            .refresh_token
            .clone()
            .ok_or(GateError::MissingContext {
                what: "a refresh token",
            })?;

        let auth = &self.app.auth;
        let outcome = self
            .app
            .refresh_flights
            .run(&refresh_token, || auth.refresh_session(&refresh_token))
            .await?;

        let Some(session) = outcome else {
            info!(path = self.path, "refresh refused; re-authentication required");
            return Ok(GateState::DenyAuth);
        };

        if let Some(stale) = &self.access_token {
            self.app.cache.invalidate(stale);
        }
        let fresh = session.tokens.access_token().to_string();
        self.app.cache.put(&fresh, true);
        self.access_token = Some(fresh);
        self.verified = true;
        self.rotated = true;
        self.session = Some(session);
        Ok(self.after_verification())
    }

    async fn permit_check(&mut self) -> Result<GateState, GateError> {
        let policy = self.policy.ok_or(GateError::MissingContext {
            what: "a route policy",
        })?;

        if self.session.is_none() {
            let token = self
                .access_token
                .clone()
                .ok_or(GateError::MissingContext {
                    what: "an access token",
                })?;
            self.session = self.app.auth.get_session_by_access_token(&token).await?;
        }
        let Some(session) = &self.session else {
            return Ok(GateState::DenyAuth);
        };

        match policy.evaluate(&session.user.grants()) {
            Ok(()) => Ok(GateState::Allow),
            Err(reason) => {
                debug!(path = self.path, user_id = %session.user.id(), %reason, "permission denied");
                Ok(GateState::DenyPerm)
            }
        }
    }

    fn after_verification(&self) -> GateState {
        match self.policy {
            Some(policy) if !policy.is_open() => GateState::PermitCheck,
            _ => GateState::Allow,
        }
    }

    /// Local expiry pre-check, then the cache, then a live round-trip whose
    /// result is cached.
    async fn token_is_valid(&self, token: &str) -> bool {
        if let Some(expires_at) = jwt::expiry_claim(token) {
            if expires_at - Utc::now() < Duration::seconds(EXPIRY_LEEWAY_SECONDS) {
                debug!("access token is at or near its exp claim");
                return false;
            }
        }
        if let Some(valid) = self.app.cache.get(token) {
            return valid;
        }
        let valid = self.app.auth.verify_access_token(token).await;
        self.app.cache.put(token, valid);
        valid
    }
}

/// Runs the gate for `path` with the request's cookies.
pub async fn evaluate(app: &AppState, path: &str, jar: &CookieJar) -> GateDecision {
    let mut run = GateRun {
        app,
        path,
        policy: None,
        access_token: cookies::value(jar, cookies::ACCESS_TOKEN),
        refresh_token: cookies::value(jar, cookies::REFRESH_TOKEN),
        verified: false,
        rotated: false,
        session: None,
    };

    let mut trail = Vec::new();
    let mut state = GateState::Classify;
    while !state.is_terminal() {
        trail.push(state);
        state = match run.step(state).await {
            Ok(next) => next,
            Err(e) => {
                warn!(path, error = %e, "gate failed; denying");
                GateState::DenyAuth
            }
        };
    }
    trail.push(state);

    GateDecision {
        state,
        trail,
        verified_token: run.access_token.filter(|_| run.verified),
        session: run.session,
        rotated: run.rotated,
    }
}

fn found(location: String) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

/// Login URL that returns the user to `path` afterwards.
#[must_use]
pub fn login_redirect(login_path: &str, path: &str) -> String {
    format!("{login_path}?redirect={}", urlencoding::encode(path))
}

/// Axum middleware applying the gate to every request.
pub async fn gate(
    State(app): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let decision = evaluate(&app, &path, &jar).await;
    debug!(path = %path, trail = ?decision.trail, "gate decision");

    match decision.state {
        GateState::PublicPass | GateState::Allow => {
            if let Some(token) = decision.verified_token {
                request.extensions_mut().insert(VerifiedAccessToken(token));
            }
            let rotated = decision
                .session
                .as_ref()
                .filter(|_| decision.rotated)
                .map(|s| s.tokens.clone());
            if let Some(session) = decision.session {
                request.extensions_mut().insert(VerifiedSession(session));
            }

            let response = next.run(request).await;
            match rotated {
                Some(tokens) => (app.cookies.set_credentials(jar, &tokens), response).into_response(),
                None => response,
            }
        }
        GateState::RedirectLanding => found(app.access.landing_path.clone()),
        GateState::NoToken => found(login_redirect(&app.access.login_path, &path)),
        GateState::DenyPerm => found(app.access.unauthorized_path.clone()),
        _ => (
            app.cookies.clear_credentials(jar),
            found(login_redirect(&app.access.login_path, &path)),
        )
            .into_response(),
    }
}
