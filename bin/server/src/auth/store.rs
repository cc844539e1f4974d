//! Persistence seam for accounts, RBAC, issued tokens and activity.
//!
//! [`PgAccessStore`](super::db::PgAccessStore) is the production
//! implementation. Tokens are only ever stored as [`token_digest`] values.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use shopgate_access::PermissionModel;
use shopgate_core::{Result, UserId};
use std::fmt;

/// Errors from the access store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The database rejected or failed a query.
    Database { details: String },
    /// A stored row could not be decoded.
    CorruptRecord { details: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database { details } => write!(f, "database error: {details}"),
            Self::CorruptRecord { details } => write!(f, "corrupt record: {details}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// A stored account with the names of the roles assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub id: UserId,
    pub external_id: Option<String>,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub roles: Vec<String>,
}

/// Fields for an account created on first login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub id: UserId,
    pub external_id: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Actions written to the activity log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Login,
    Logout,
    Refresh,
}

impl Activity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Logout => "logout",
            Self::Refresh => "refresh",
        }
    }
}

/// Storage operations used by the auth service.
#[async_trait]
pub trait AccessStore: Send + Sync {
    /// Loads every role with its permissions.
    async fn load_permission_model(&self) -> Result<PermissionModel, StoreError>;

    /// The role name configured for new accounts, if the store carries one.
    async fn default_role(&self) -> Result<Option<String>, StoreError>;

    async fn find_account_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<AccountRecord>, StoreError>;

    async fn find_account_by_email(&self, email: &str)
    -> Result<Option<AccountRecord>, StoreError>;

    /// Creates an account and assigns `role` in one transaction.
    async fn create_account(
        &self,
        account: &NewAccount,
        role: &str,
    ) -> Result<AccountRecord, StoreError>;

    /// Stamps the login time and, when given, records the external id.
    async fn record_login(
        &self,
        id: UserId,
        external_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn record_issued_token(
        &self,
        digest: &str,
        user: UserId,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Marks an issued token revoked. Returns the owning account when a
    /// not-yet-revoked record was found.
    async fn revoke_token(&self, digest: &str, at: DateTime<Utc>)
    -> Result<Option<UserId>, StoreError>;

    async fn is_revoked(&self, digest: &str) -> Result<bool, StoreError>;

    async fn record_activity(
        &self,
        user: UserId,
        activity: Activity,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Hex-encoded SHA-256 of a token.
#[must_use]
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
