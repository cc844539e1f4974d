//! Route classification and access policies.
//!
//! A [`RouteTable`] maps request paths to one of three classes: paths the gate
//! never looks at (API and static assets), public pages, and protected pages
//! with an optional [`AccessPolicy`].
//!
//! Lookup order for a path:
//! 1. exact pattern match
//! 2. dynamic pattern match (`/orders/:id`), same segment count
//! 3. longest pattern that is a `/`-delimited prefix of the path
//!
//! Paths that match nothing are protected with no policy.

use crate::error::AuthorizationError;
use crate::permission::{Grants, PermissionModel};

/// Roles and permissions a route demands.
///
/// Roles are any-of: one accepted role suffices. Permissions are all-of.
/// An empty list passes its clause trivially.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl AccessPolicy {
    /// A policy requiring every listed permission and no particular role.
    #[must_use]
    pub fn requiring<P>(permissions: P) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
    {
        Self {
            roles: Vec::new(),
            permissions: permissions.into_iter().map(Into::into).collect(),
        }
    }

    /// Replaces the accepted roles.
    #[must_use]
    pub fn with_roles<R>(mut self, roles: R) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true if neither roles nor permissions are required.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.roles.is_empty() && self.permissions.is_empty()
    }

    /// Evaluates the policy against a user's effective grants.
    ///
    /// # Errors
    ///
    /// Returns `RoleRequired` when roles are declared and none is held, and
    /// `PermissionDenied` listing every required permission that is missing.
    pub fn evaluate(&self, grants: &Grants) -> Result<(), AuthorizationError> {
        if !self.roles.is_empty() && !grants.roles.intersects(&self.roles) {
            return Err(AuthorizationError::RoleRequired {
                accepted: self.roles.clone(),
            });
        }
        let missing = grants.permissions.missing(&self.permissions);
        if !missing.is_empty() {
            return Err(AuthorizationError::PermissionDenied { missing });
        }
        Ok(())
    }
}

/// One row of the route table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pattern: String,
    public: bool,
    policy: AccessPolicy,
}

impl RouteRule {
    #[must_use]
    pub fn public(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            public: true,
            policy: AccessPolicy::default(),
        }
    }

    #[must_use]
    pub fn protected(pattern: &str, policy: AccessPolicy) -> Self {
        Self {
            pattern: pattern.to_string(),
            public: false,
            policy,
        }
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    #[must_use]
    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    fn is_dynamic(&self) -> bool {
        self.pattern.split('/').any(|s| s.starts_with(':'))
    }

    fn matches_dynamic(&self, path: &str) -> bool {
        let mut pattern = self.pattern.split('/').filter(|s| !s.is_empty());
        let mut actual = path.split('/').filter(|s| !s.is_empty());
        loop {
            match (pattern.next(), actual.next()) {
                (None, None) => return true,
                (Some(p), Some(a)) if p.starts_with(':') || p == a => {}
                _ => return false,
            }
        }
    }

    fn is_prefix_of(&self, path: &str) -> bool {
        self.pattern != "/"
            && path
                .strip_prefix(self.pattern.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// How the gate treats a request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass<'a> {
    /// API endpoints and static assets; the gate passes them through untouched.
    Bypass,
    Public,
    /// Requires a valid session; the policy may be open.
    Protected(&'a AccessPolicy),
}

/// Ordered collection of route rules.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

static OPEN_POLICY: AccessPolicy = AccessPolicy {
    roles: Vec::new(),
    permissions: Vec::new(),
};

impl RouteTable {
    #[must_use]
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self { rules }
    }

    #[must_use]
    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    /// Classifies a request path.
    #[must_use]
    pub fn classify(&self, path: &str) -> RouteClass<'_> {
        if path.starts_with("/api/") || path.contains('.') {
            return RouteClass::Bypass;
        }
        match self.lookup(path) {
            Some(rule) if rule.public => RouteClass::Public,
            Some(rule) => RouteClass::Protected(&rule.policy),
            None => RouteClass::Protected(&OPEN_POLICY),
        }
    }

    fn lookup(&self, path: &str) -> Option<&RouteRule> {
        let trimmed = match path.trim_end_matches('/') {
            "" => "/",
            p => p,
        };
        self.rules
            .iter()
            .find(|r| r.pattern == trimmed)
            .or_else(|| {
                self.rules
                    .iter()
                    .find(|r| r.is_dynamic() && r.matches_dynamic(trimmed))
            })
            .or_else(|| {
                self.rules
                    .iter()
                    .filter(|r| !r.is_dynamic() && r.is_prefix_of(trimmed))
                    .max_by_key(|r| r.pattern.len())
            })
    }

    /// Lists `(pattern, role)` pairs where a rule accepts a role that the
    /// model cannot resolve to any permission.
    #[must_use]
    pub fn unresolvable_roles<'a>(&'a self, model: &PermissionModel) -> Vec<(&'a str, &'a str)> {
        self.rules
            .iter()
            .flat_map(|rule| {
                rule.policy
                    .roles
                    .iter()
                    .filter(|role| !model.is_resolvable(role))
                    .map(move |role| (rule.pattern.as_str(), role.as_str()))
            })
            .collect()
    }

    /// The storefront's built-in route table.
    #[must_use]
    pub fn storefront() -> Self {
        let staff = ["manager", "admin"];
        let needs = |permissions: &[&str]| AccessPolicy::requiring(permissions.iter().copied());
        Self::new(vec![
            RouteRule::public("/"),
            RouteRule::public("/store"),
            RouteRule::public("/store/collections"),
            RouteRule::public("/store/search"),
            RouteRule::public("/store/product/:handle"),
            RouteRule::public("/store/collections/:handle"),
            RouteRule::public("/auth/login"),
            RouteRule::public("/auth/callback"),
            RouteRule::public("/404"),
            RouteRule::public("/500"),
            RouteRule::public("/unauthorized"),
            RouteRule::public("/auth/logout"),
            RouteRule::protected("/dashboard", needs(&["view_profile"])),
            RouteRule::protected("/profile", needs(&["view_profile", "update_profile"])),
            RouteRule::protected("/orders", needs(&["view_orders"])),
            RouteRule::protected("/orders/:id", needs(&["view_orders"])),
            RouteRule::protected("/addresses", needs(&["view_addresses", "manage_addresses"])),
            RouteRule::protected("/store/cart", needs(&["manage_cart"])),
            RouteRule::protected(
                "/analytics",
                needs(&["view_analytics"]).with_roles(["vip_customer"]),
            ),
            RouteRule::protected(
                "/vip-offers",
                AccessPolicy::default().with_roles(["vip_customer"]),
            ),
            RouteRule::protected(
                "/support",
                needs(&["view_all_orders"]).with_roles(["support", "manager", "admin"]),
            ),
            RouteRule::protected("/support/tickets", needs(&["view_all_orders"])),
            RouteRule::protected("/support/customers", needs(&["view_all_orders"])),
            RouteRule::protected("/support/logs", needs(&["view_logs"])),
            RouteRule::protected("/admin", needs(&["access_admin"]).with_roles(staff)),
            RouteRule::protected("/admin/users", needs(&["manage_users"])),
            RouteRule::protected(
                "/admin/roles",
                needs(&["manage_roles"]).with_roles(["admin"]),
            ),
            RouteRule::protected("/admin/products", needs(&["manage_products"])),
            RouteRule::protected(
                "/admin/analytics",
                needs(&["view_analytics"]).with_roles(staff),
            ),
            RouteRule::protected("/admin/events", needs(&["manage_events"]).with_roles(staff)),
            RouteRule::protected("/manage-inventory", needs(&["manage_inventory"])),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{PermissionSet, RoleSet};

    fn grants(roles: &[&str], permissions: &[&str]) -> Grants {
        Grants {
            roles: roles.iter().copied().collect::<RoleSet>(),
            permissions: permissions.iter().copied().collect::<PermissionSet>(),
        }
    }

    #[test]
    fn open_policy_admits_anyone() {
        assert!(AccessPolicy::default().evaluate(&Grants::default()).is_ok());
    }

    #[test]
    fn roles_are_any_of() {
        let policy = AccessPolicy::default().with_roles(["manager", "admin"]);
        assert!(policy.evaluate(&grants(&["admin"], &[])).is_ok());
        assert!(matches!(
            policy.evaluate(&grants(&["support"], &[])),
            Err(AuthorizationError::RoleRequired { .. })
        ));
    }

    #[test]
    fn permissions_are_all_of() {
        let policy = AccessPolicy::requiring(["view_profile", "update_profile"]);
        assert!(
            policy
                .evaluate(&grants(&[], &["update_profile", "view_profile", "x"]))
                .is_ok()
        );
        assert_eq!(
            policy.evaluate(&grants(&[], &["view_profile"])),
            Err(AuthorizationError::PermissionDenied {
                missing: vec!["update_profile".to_string()],
            })
        );
    }

    #[test]
    fn role_check_applies_even_when_permissions_pass() {
        let policy = AccessPolicy::requiring(["manage_roles"]).with_roles(["admin"]);
        let result = policy.evaluate(&grants(&["support"], &["manage_roles"]));
        assert!(matches!(result, Err(AuthorizationError::RoleRequired { .. })));
    }

    #[test]
    fn api_and_asset_paths_bypass_the_gate() {
        let table = RouteTable::storefront();
        assert_eq!(table.classify("/api/auth/me"), RouteClass::Bypass);
        assert_eq!(table.classify("/favicon.ico"), RouteClass::Bypass);
    }

    #[test]
    fn exact_public_routes() {
        let table = RouteTable::storefront();
        assert_eq!(table.classify("/"), RouteClass::Public);
        assert_eq!(table.classify("/auth/login"), RouteClass::Public);
        assert_eq!(table.classify("/store/search/"), RouteClass::Public);
    }

    #[test]
    fn dynamic_segments_match_one_segment() {
        let table = RouteTable::storefront();
        assert_eq!(table.classify("/store/product/blue-shirt"), RouteClass::Public);
        match table.classify("/orders/1001") {
            RouteClass::Protected(policy) => {
                assert_eq!(policy.permissions, vec!["view_orders".to_string()]);
            }
            other => panic!("expected protected, got {other:?}"),
        }
    }

    #[test]
    fn exact_protected_route_beats_public_prefix() {
        let table = RouteTable::storefront();
        assert!(matches!(
            table.classify("/store/cart"),
            RouteClass::Protected(p) if p.permissions == vec!["manage_cart".to_string()]
        ));
    }

    #[test]
    fn longest_prefix_applies_to_nested_paths() {
        let table = RouteTable::storefront();
        assert_eq!(table.classify("/store/anything/else"), RouteClass::Public);
        match table.classify("/admin/users/42") {
            RouteClass::Protected(policy) => {
                assert_eq!(policy.permissions, vec!["manage_users".to_string()]);
            }
            other => panic!("expected protected, got {other:?}"),
        }
    }

    #[test]
    fn root_is_not_a_prefix_of_everything() {
        let table = RouteTable::storefront();
        assert!(matches!(
            table.classify("/somewhere-unlisted"),
            RouteClass::Protected(p) if p.is_open()
        ));
    }

    #[test]
    fn logout_is_public() {
        let table = RouteTable::storefront();
        assert_eq!(table.classify("/auth/logout"), RouteClass::Public);
    }

    #[test]
    fn reports_roles_without_grants() {
        let table = RouteTable::new(vec![RouteRule::protected(
            "/vip-offers",
            AccessPolicy::default().with_roles(["vip_customer", "admin"]),
        )]);
        let model = PermissionModel::new()
            .with_role("admin", ["access_admin"])
            .with_role("vip_customer", Vec::<String>::new());
        assert_eq!(
            table.unresolvable_roles(&model),
            vec![("/vip-offers", "vip_customer")]
        );
    }
}
