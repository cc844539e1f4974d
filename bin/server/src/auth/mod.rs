//! Authentication and authorization for the storefront.
//!
//! This module provides:
//! - The OAuth2 Authorization Code + PKCE login against the identity provider
//! - Session resolution and refresh-token rotation ([`AuthService`])
//! - The per-request gate ([`gatekeeper::gate`]) enforcing route policies
//! - Extractors for handlers that need a verified session ([`RequireAuth`])
//!
//! # Session model
//!
//! There is no server-side session store. The provider's tokens live in
//! HttpOnly cookies and every protected request is verified against the
//! provider, bounded by a per-process [`TokenVerificationCache`]. Roles and
//! permissions come from the local RBAC tables on each resolution, so grant
//! changes apply on the next uncached request.

pub mod cache;
pub mod cookies;
pub mod db;
pub mod gatekeeper;
pub mod middleware;
pub mod provider;
pub mod routes;
pub mod service;
pub mod singleflight;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

use shopgate_access::RouteTable;
use std::sync::Arc;

use crate::config::{AccessConfig, SessionConfig};

pub use cache::TokenVerificationCache;
pub use cookies::CookiePolicy;
pub use middleware::{AuthRejection, RequireAuth};
pub use provider::{IdentityProvider, IdentityProviderClient};
pub use service::AuthService;
pub use singleflight::RefreshFlights;
pub use store::AccessStore;

/// Shared application state.
pub struct AppState {
    pub auth: AuthService,
    /// Used directly for login start and end-session URLs.
    pub provider: Arc<dyn IdentityProvider>,
    pub cache: TokenVerificationCache,
    pub refresh_flights: RefreshFlights,
    pub routes: RouteTable,
    pub cookies: CookiePolicy,
    pub access: AccessConfig,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn AccessStore>,
        redirect_uri: String,
        session: &SessionConfig,
        access: AccessConfig,
        routes: RouteTable,
    ) -> Self {
        let auth = AuthService::new(
            provider.clone(),
            store,
            redirect_uri,
            access.default_role.clone(),
        );
        Self {
            auth,
            provider,
            cache: TokenVerificationCache::new(chrono::Duration::seconds(
                session.verification_ttl_seconds,
            )),
            refresh_flights: RefreshFlights::new(),
            routes,
            cookies: CookiePolicy::from_config(session),
            access,
        }
    }
}
