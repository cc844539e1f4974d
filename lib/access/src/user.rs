//! Local storefront accounts and the identity the provider reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shopgate_core::UserId;

use crate::permission::{Grants, PermissionSet, RoleSet};

/// Customer identity as reported by the provider's identity query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIdentity {
    /// Provider-side customer id (e.g. `gid://shopify/Customer/42`).
    pub external_id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// A local account with its effective grants.
///
/// Accounts are created lazily on first login and never deleted by the gate;
/// deactivation is the `active` flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUser {
    id: UserId,
    external_id: Option<String>,
    email: String,
    first_name: Option<String>,
    last_name: Option<String>,
    active: bool,
    last_login_at: Option<DateTime<Utc>>,
    roles: RoleSet,
    permissions: PermissionSet,
}

impl LocalUser {
    /// Reconstitutes an account from storage with its effective grants.
    #[must_use]
    #[expect(clippy::too_many_arguments)]
    pub fn from_parts(
        id: UserId,
        external_id: Option<String>,
        email: String,
        first_name: Option<String>,
        last_name: Option<String>,
        active: bool,
        last_login_at: Option<DateTime<Utc>>,
        grants: Grants,
    ) -> Self {
        Self {
            id,
            external_id,
            email,
            first_name,
            last_name,
            active,
            last_login_at,
            roles: grants.roles,
            permissions: grants.permissions,
        }
    }

    #[must_use]
    pub fn id(&self) -> UserId {
        self.id
    }

    #[must_use]
    pub fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }

    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    #[must_use]
    pub fn first_name(&self) -> Option<&str> {
        self.first_name.as_deref()
    }

    #[must_use]
    pub fn last_name(&self) -> Option<&str> {
        self.last_name.as_deref()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn last_login_at(&self) -> Option<DateTime<Utc>> {
        self.last_login_at
    }

    #[must_use]
    pub fn roles(&self) -> &RoleSet {
        &self.roles
    }

    #[must_use]
    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }

    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    /// Effective grants, as evaluated by route policies.
    #[must_use]
    pub fn grants(&self) -> Grants {
        Grants {
            roles: self.roles.clone(),
            permissions: self.permissions.clone(),
        }
    }

    /// Decides whether a login with `identity` may record its external id on
    /// this account. An account that already carries a different external id
    /// is never rebound.
    #[must_use]
    pub fn external_id_backfill<'a>(&self, identity: &'a ProviderIdentity) -> Option<&'a str> {
        match self.external_id.as_deref() {
            None => Some(identity.external_id.as_str()),
            Some(_) => None,
        }
    }
}
