//! Authorization requirements and the named-policy catalog.
//!
//! Callers normally construct a [`Requirement`] directly. Operations that are
//! still declared with a policy string (a permission name, a comma-joined list
//! of permission names, or a role/policy name) go through [`PolicyCatalog`].

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::permissions::{CATALOG, PermissionCatalog};
use crate::roles::KNOWN_ROLES;
use crate::{PermissionName, RoleName};

/// Policy name that maps to [`Requirement::TenantScope`] by default.
pub const TENANT_SCOPE_POLICY: &str = "TenantScope";

const SEPARATOR: char = ',';

/// What an operation demands of the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "names", rename_all = "snake_case")]
pub enum Requirement {
    /// At least one of these permissions.
    AnyPermission(BTreeSet<PermissionName>),
    /// At least one of these roles.
    AnyRole(BTreeSet<RoleName>),
    /// An assignment covering the request's `X-Tenant-Id` / `X-Project-Id`.
    TenantScope,
}

impl Requirement {
    pub fn any_permission<I, P>(names: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PermissionName>,
    {
        Self::AnyPermission(names.into_iter().map(Into::into).collect())
    }

    pub fn any_role<I, R>(names: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<RoleName>,
    {
        Self::AnyRole(names.into_iter().map(Into::into).collect())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::AnyPermission(_) => "any_permission",
            Self::AnyRole(_) => "any_role",
            Self::TenantScope => "tenant_scope",
        }
    }

    /// Human-readable required set, for decision logs.
    pub fn describe(&self) -> Vec<String> {
        match self {
            Self::AnyPermission(set) => set.iter().map(|p| p.as_str().to_string()).collect(),
            Self::AnyRole(set) => set.iter().map(|r| r.as_str().to_string()).collect(),
            Self::TenantScope => vec![TENANT_SCOPE_POLICY.to_string()],
        }
    }
}

/// Turns policy strings into requirements.
///
/// Resolution order:
/// 1. a string containing `,` is a list of permission names (any-of);
/// 2. a declared permission name (case-insensitive) is a single-permission
///    requirement;
/// 3. otherwise the name is looked up among registered named policies.
///
/// Unknown names resolve to `None`; callers must deny.
#[derive(Debug, Clone)]
pub struct PolicyCatalog {
    permissions: &'static PermissionCatalog,
    named: HashMap<String, Requirement>,
}

impl PolicyCatalog {
    /// Catalog with no named policies.
    pub fn new(permissions: &'static PermissionCatalog) -> Self {
        Self {
            permissions,
            named: HashMap::new(),
        }
    }

    /// Every known role as a role policy, plus `TenantScope`.
    pub fn with_defaults() -> Self {
        let mut catalog = Self::new(&CATALOG);
        for role in KNOWN_ROLES {
            catalog.register(*role, Requirement::any_role([*role]));
        }
        catalog.register(TENANT_SCOPE_POLICY, Requirement::TenantScope);
        catalog
    }

    pub fn register(&mut self, name: impl AsRef<str>, requirement: Requirement) {
        self.named
            .insert(name.as_ref().trim().to_ascii_lowercase(), requirement);
    }

    pub fn resolve(&self, policy: &str) -> Option<Requirement> {
        let policy = policy.trim();
        if policy.is_empty() {
            return None;
        }

        if policy.contains(SEPARATOR) {
            let names: BTreeSet<PermissionName> = policy
                .split(SEPARATOR)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    self.permissions
                        .canonical(s)
                        .unwrap_or_else(|| PermissionName::new(s.to_string()))
                })
                .collect();
            return (!names.is_empty()).then_some(Requirement::AnyPermission(names));
        }

        if let Some(name) = self.permissions.canonical(policy) {
            return Some(Requirement::AnyPermission(BTreeSet::from([name])));
        }

        self.named.get(&policy.to_ascii_lowercase()).cloned()
    }
}

impl Default for PolicyCatalog {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::{MANAGE_ORDERS, VIEW_ORDERS};
    use crate::roles::OPERATOR;

    #[test]
    fn comma_list_is_any_of_not_a_literal_name() {
        let catalog = PolicyCatalog::with_defaults();
        assert_eq!(
            catalog.resolve("ViewOrders,ManageOrders"),
            Some(Requirement::any_permission([VIEW_ORDERS, MANAGE_ORDERS]))
        );
        assert_eq!(
            catalog.resolve(" vieworders , ,ManageOrders "),
            Some(Requirement::any_permission([VIEW_ORDERS, MANAGE_ORDERS]))
        );
    }

    #[test]
    fn list_of_only_separators_resolves_to_nothing() {
        assert_eq!(PolicyCatalog::with_defaults().resolve(", ,"), None);
    }

    #[test]
    fn single_declared_permission_is_case_insensitive() {
        let catalog = PolicyCatalog::with_defaults();
        assert_eq!(
            catalog.resolve("VIEWORDERS"),
            Some(Requirement::any_permission([VIEW_ORDERS]))
        );
    }

    #[test]
    fn other_names_fall_back_to_named_policies() {
        let catalog = PolicyCatalog::with_defaults();
        assert_eq!(
            catalog.resolve("operator"),
            Some(Requirement::any_role([OPERATOR]))
        );
        assert_eq!(catalog.resolve("TenantScope"), Some(Requirement::TenantScope));
        assert_eq!(catalog.resolve("DropEverything"), None);
        assert_eq!(catalog.resolve(""), None);
    }

    #[test]
    fn registered_policies_are_resolvable() {
        let mut catalog = PolicyCatalog::new(&CATALOG);
        assert_eq!(catalog.resolve("Auditors"), None);
        catalog.register("Auditors", Requirement::any_role(["Auditor"]));
        assert_eq!(
            catalog.resolve("auditors"),
            Some(Requirement::any_role(["Auditor"]))
        );
    }
}
