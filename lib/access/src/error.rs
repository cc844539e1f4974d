//! Error types for the access crate.
//!
//! The enums follow the failure classes of the gate:
//! - `AuthExchangeError`: the provider refused or could not complete a token exchange
//! - `AccountResolutionError`: a provider identity could not be mapped to a local account
//! - `AuthenticationError`: umbrella for everything that ends a login or session
//! - `AuthorizationError`: a valid session lacks the role or permission for an action

use std::fmt;

/// Failures from the authorization-code or refresh-token exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthExchangeError {
    /// The caller passed an empty code or verifier.
    InvalidInput { field: &'static str },
    /// The provider rejected the grant (expired or reused code, bad verifier).
    Rejected { code: String },
    /// The provider could not be reached or timed out.
    Transport { details: String },
    /// The token response could not be parsed or lacked an access token.
    MalformedResponse { details: String },
}

impl fmt::Display for AuthExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput { field } => write!(f, "{field} must not be empty"),
            Self::Rejected { code } => write!(f, "provider rejected the grant: {code}"),
            Self::Transport { details } => write!(f, "provider unreachable: {details}"),
            Self::MalformedResponse { details } => {
                write!(f, "malformed token response: {details}")
            }
        }
    }
}

impl std::error::Error for AuthExchangeError {}

/// Failures while resolving or creating the local account for an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountResolutionError {
    /// The role handed to new accounts does not exist in the RBAC store.
    DefaultRoleMissing { role: String },
    /// The provider returned no usable identity for the access token.
    MissingIdentity,
    /// The matched account has been deactivated.
    Deactivated,
    /// The account store failed.
    Store { details: String },
}

impl AccountResolutionError {
    /// Returns true for failures caused by deployment configuration rather
    /// than by the user or a transient fault.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::DefaultRoleMissing { .. })
    }
}

impl fmt::Display for AccountResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DefaultRoleMissing { role } => {
                write!(f, "default role '{role}' is not defined in the RBAC store")
            }
            Self::MissingIdentity => write!(f, "provider returned no customer identity"),
            Self::Deactivated => write!(f, "account is deactivated"),
            Self::Store { details } => write!(f, "account store error: {details}"),
        }
    }
}

impl std::error::Error for AccountResolutionError {}

/// Errors that end a login attempt or invalidate a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    Exchange(AuthExchangeError),
    AccountResolution(AccountResolutionError),
    /// The access token is expired, revoked or unknown to the provider.
    SessionInvalid,
}

impl AuthenticationError {
    /// Returns true when the failure is a deployment defect that must
    /// surface as a server error instead of a login redirect.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::AccountResolution(e) if e.is_configuration())
    }
}

impl From<AuthExchangeError> for AuthenticationError {
    fn from(err: AuthExchangeError) -> Self {
        Self::Exchange(err)
    }
}

impl From<AccountResolutionError> for AuthenticationError {
    fn from(err: AccountResolutionError) -> Self {
        Self::AccountResolution(err)
    }
}

impl fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exchange(e) => write!(f, "code exchange failed: {e}"),
            Self::AccountResolution(e) => write!(f, "account resolution failed: {e}"),
            Self::SessionInvalid => write!(f, "session is no longer valid"),
        }
    }
}

impl std::error::Error for AuthenticationError {}

/// Errors from evaluating a route or action policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    NotAuthenticated,
    /// None of the accepted roles is held.
    RoleRequired { accepted: Vec<String> },
    /// At least one required permission is missing.
    PermissionDenied { missing: Vec<String> },
}

impl fmt::Display for AuthorizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAuthenticated => write!(f, "user is not authenticated"),
            Self::RoleRequired { accepted } => {
                write!(f, "requires one of roles: {}", accepted.join(", "))
            }
            Self::PermissionDenied { missing } => {
                write!(f, "missing permissions: {}", missing.join(", "))
            }
        }
    }
}

impl std::error::Error for AuthorizationError {}
