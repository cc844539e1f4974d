//! shopgate web server.
//!
//! Fronts the storefront with OAuth2 Authorization Code + PKCE login,
//! cookie-carried provider sessions and a per-request role/permission gate.

pub mod app;
pub mod auth;
pub mod config;
pub mod error;
