//! Extractors for handlers that need the verified session.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use shopgate_access::Session;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::{
    AppState, cookies,
    gatekeeper::{VerifiedAccessToken, VerifiedSession},
};

/// Extractor for requiring an authenticated user.
///
/// Reuses the session or token the gate verified for this request. On routes
/// the gate does not cover (`/api/...`) it resolves the `access_token`
/// cookie itself.
pub struct RequireAuth(pub Session);

impl RequireAuth {
    /// Returns the session if the user holds `permission`.
    ///
    /// # Errors
    ///
    /// Returns `AuthRejection::Forbidden` when the permission is missing.
    pub fn require_permission(self, permission: &str) -> Result<Session, AuthRejection> {
        if self.0.user.has_permission(permission) {
            Ok(self.0)
        } else {
            debug!(user_id = %self.0.user.id(), permission, "permission missing");
            Err(AuthRejection::Forbidden)
        }
    }
}

impl<S> FromRequestParts<S> for RequireAuth
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(VerifiedSession(session)) = parts.extensions.get::<VerifiedSession>() {
            return Ok(RequireAuth(session.clone()));
        }

        let token = match parts.extensions.get::<VerifiedAccessToken>() {
            Some(VerifiedAccessToken(token)) => token.clone(),
            None => cookies::value(
                &CookieJar::from_headers(&parts.headers),
                cookies::ACCESS_TOKEN,
            )
            .ok_or(AuthRejection::NotAuthenticated)?,
        };

        let app_state = Arc::<AppState>::from_ref(state);
        match app_state.auth.get_session_by_access_token(&token).await {
            Ok(Some(session)) => Ok(RequireAuth(session)),
            Ok(None) => Err(AuthRejection::NotAuthenticated),
            Err(e) => {
                warn!(error = %e, "session lookup failed");
                Err(AuthRejection::InternalError)
            }
        }
    }
}

/// Rejection type for authentication extractors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    NotAuthenticated,
    Forbidden,
    InternalError,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self {
            Self::NotAuthenticated => (StatusCode::UNAUTHORIZED, "Not authenticated").into_response(),
            Self::Forbidden => (StatusCode::FORBIDDEN, "Access denied").into_response(),
            Self::InternalError => {
                error!("authentication extractor failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}
