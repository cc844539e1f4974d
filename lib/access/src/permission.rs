//! Role and permission model.
//!
//! Permissions are flat strings granted indirectly through roles. A user's
//! effective permissions are the union of the permission sets of every role
//! they hold. A role whose permission set is empty, or that the model does not
//! know, grants nothing and does not count as held: a route that accepts only
//! such roles is unreachable rather than open.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Set of role names. Order and duplicates carry no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleSet(BTreeSet<String>);

impl RoleSet {
    #[must_use]
    pub fn contains(&self, role: &str) -> bool {
        self.0.contains(role)
    }

    /// Returns true if at least one of `accepted` is held.
    #[must_use]
    pub fn intersects<S: AsRef<str>>(&self, accepted: &[S]) -> bool {
        accepted.iter().any(|r| self.0.contains(r.as_ref()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for RoleSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Set of permission names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<String>);

impl PermissionSet {
    #[must_use]
    pub fn contains(&self, permission: &str) -> bool {
        self.0.contains(permission)
    }

    /// Returns the entries of `required` that are not in this set, in the
    /// order given. An empty result means the set contains all of them.
    #[must_use]
    pub fn missing<S: AsRef<str>>(&self, required: &[S]) -> Vec<String> {
        required
            .iter()
            .map(AsRef::as_ref)
            .filter(|p| !self.0.contains(*p))
            .map(str::to_string)
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Effective roles and permissions of one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grants {
    pub roles: RoleSet,
    pub permissions: PermissionSet,
}

/// Mapping of role name to the permissions that role grants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionModel {
    grants: BTreeMap<String, BTreeSet<String>>,
}

impl PermissionModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a role with its permissions, merging with any existing grants.
    #[must_use]
    pub fn with_role<I, S>(mut self, role: &str, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.grants.entry(role.to_string()).or_default();
        entry.extend(permissions.into_iter().map(Into::into));
        self
    }

    /// Records one role/permission pair. Used when loading join rows.
    pub fn grant(&mut self, role: &str, permission: Option<&str>) {
        let entry = self.grants.entry(role.to_string()).or_default();
        if let Some(permission) = permission {
            entry.insert(permission.to_string());
        }
    }

    /// Returns the permissions a role grants, or `None` for an unknown role.
    #[must_use]
    pub fn permissions_of(&self, role: &str) -> Option<&BTreeSet<String>> {
        self.grants.get(role)
    }

    /// Returns true if the role is known and grants at least one permission.
    #[must_use]
    pub fn is_resolvable(&self, role: &str) -> bool {
        self.grants.get(role).is_some_and(|p| !p.is_empty())
    }

    /// Returns true if the role exists in the model, even with no grants.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.grants.contains_key(role)
    }

    /// Computes effective grants for the roles a user holds.
    ///
    /// Roles that are unknown or grant nothing are dropped from the effective
    /// role set.
    #[must_use]
    pub fn effective<'a, I>(&self, held: I) -> Grants
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut grants = Grants::default();
        for role in held {
            match self.grants.get(role) {
                Some(permissions) if !permissions.is_empty() => {
                    grants.roles.0.insert(role.to_string());
                    grants.permissions.0.extend(permissions.iter().cloned());
                }
                _ => warn!(role, "role grants no permissions; ignoring"),
            }
        }
        grants
    }
}
