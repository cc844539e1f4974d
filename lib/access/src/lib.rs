//! Access model for the shopgate storefront gate.
//!
//! This crate holds the I/O-free half of the gate:
//! - Roles and permissions (`PermissionModel`, `RoleSet`, `PermissionSet`)
//! - Route classification and policies (`RouteTable`, `AccessPolicy`)
//! - Local accounts and provider identities (`LocalUser`, `ProviderIdentity`)
//! - Credentials and sessions (`CredentialBundle`, `Session`, `LoginTransaction`)
//! - Provider configuration (`ProviderConfig`)
//! - Error types for authentication and authorization
//!
//! # Example
//!
//! ```
//! use shopgate_access::{PermissionModel, RouteClass, RouteTable};
//!
//! let model = PermissionModel::new()
//!     .with_role("customer", ["view_profile", "view_orders"])
//!     .with_role("admin", ["view_profile", "access_admin"]);
//!
//! let grants = model.effective(["customer"]);
//! let table = RouteTable::storefront();
//!
//! let RouteClass::Protected(policy) = table.classify("/dashboard") else {
//!     panic!("dashboard is protected");
//! };
//! assert!(policy.evaluate(&grants).is_ok());
//!
//! let RouteClass::Protected(policy) = table.classify("/admin") else {
//!     panic!("admin is protected");
//! };
//! assert!(policy.evaluate(&grants).is_err());
//! ```

pub mod error;
pub mod jwt;
pub mod permission;
pub mod policy;
pub mod provider;
pub mod session;
pub mod user;

pub use error::{
    AccountResolutionError, AuthExchangeError, AuthenticationError, AuthorizationError,
};
pub use permission::{Grants, PermissionModel, PermissionSet, RoleSet};
pub use policy::{AccessPolicy, RouteClass, RouteRule, RouteTable};
pub use provider::ProviderConfig;
pub use session::{CredentialBundle, LoginTransaction, Session};
pub use user::{LocalUser, ProviderIdentity};
