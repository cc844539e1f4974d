//! Router assembly.
//!
//! Every page named in the route table gets a plain-text placeholder; the
//! storefront UI itself lives elsewhere. All routes sit behind the gate,
//! which lets `/api/` paths and static assets through untouched so the API
//! handlers can answer with 401/403 instead of redirects.

use axum::{
    Extension, Json, Router,
    extract::Query,
    http::{StatusCode, Uri},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use shopgate_access::LocalUser;
use shopgate_core::UserId;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::{
    AppState, AuthRejection, RequireAuth,
    gatekeeper::{VerifiedSession, gate},
    routes,
};

/// Pages with a dedicated handler.
const HANDLED_PAGES: [&str; 4] = ["/auth/login", "/auth/callback", "/auth/logout", "/unauthorized"];

/// Builds the application router over `state`.
pub fn router(state: Arc<AppState>) -> Router {
    let pages = state
        .routes
        .rules()
        .iter()
        .map(|rule| rule.pattern())
        .filter(|pattern| !HANDLED_PAGES.contains(pattern))
        .fold(Router::<Arc<AppState>>::new(), |router, pattern| {
            router.route(&axum_path(pattern), get(page))
        });

    pages
        .route("/auth/login", get(login_page))
        .route("/auth/login/start", get(routes::login_start))
        .route("/auth/callback", get(routes::callback))
        .route("/auth/logout", get(routes::logout))
        .route("/unauthorized", get(unauthorized_page))
        .route("/api/auth/logout", post(routes::logout_api))
        .route("/api/auth/refresh", post(routes::refresh))
        .route("/api/auth/me", get(routes::me))
        .route("/api/account/profile", get(profile))
        .route("/api/orders", get(orders))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), gate))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Rewrites `:param` segments into axum's `{param}` captures.
fn axum_path(pattern: &str) -> String {
    pattern
        .split('/')
        .map(|segment| match segment.strip_prefix(':') {
            Some(name) => format!("{{{name}}}"),
            None => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

async fn page(uri: Uri, session: Option<Extension<VerifiedSession>>) -> String {
    match session {
        Some(Extension(VerifiedSession(session))) => {
            format!("{}\nSigned in as {}", uri.path(), session.user.email())
        }
        None => uri.path().to_string(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct LoginPageQuery {
    error: Option<String>,
    logout: Option<String>,
    /// Page the gate turned the visitor away from.
    redirect: Option<String>,
}

/// Login start link, carrying the gate's `redirect` when it is local.
fn login_start_link(redirect: Option<&str>) -> String {
    match redirect.filter(|p| routes::is_local_path(p)) {
        Some(path) => format!("/auth/login/start?redirect={}", urlencoding::encode(path)),
        None => "/auth/login/start".to_string(),
    }
}

async fn login_page(Query(query): Query<LoginPageQuery>) -> String {
    let mut body = format!(
        "Sign in\n{}",
        login_start_link(query.redirect.as_deref())
    );
    if query.logout.as_deref() == Some("success") {
        body.push_str("\nYou have been signed out.");
    }
    if let Some(code) = query.error {
        body.push_str("\nSign-in failed: ");
        body.push_str(&code);
    }
    body
}

async fn unauthorized_page() -> (StatusCode, &'static str) {
    (
        StatusCode::FORBIDDEN,
        "You do not have permission to view this page.",
    )
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Page not found.")
}

async fn profile(auth: RequireAuth) -> Result<Json<LocalUser>, AuthRejection> {
    let session = auth.require_permission("view_profile")?;
    Ok(Json(session.user))
}

#[derive(Debug, Serialize)]
struct OrdersView {
    customer: UserId,
    orders: Vec<serde_json::Value>,
}

/// Order listing hook. Order data is owned by the commerce backend.
async fn orders(auth: RequireAuth) -> Result<impl IntoResponse, AuthRejection> {
    let session = auth.require_permission("view_orders")?;
    Ok(Json(OrdersView {
        customer: session.user.id(),
        orders: Vec::new(),
    }))
}
