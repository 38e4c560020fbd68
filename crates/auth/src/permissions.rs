use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are opaque names (e.g. "ViewOrders"). Matching is
/// case-insensitive everywhere a decision is made.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionName(Cow<'static, str>);

impl PermissionName {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl core::fmt::Display for PermissionName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for PermissionName {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Declared permissions
// ─────────────────────────────────────────────────────────────────────────────

pub const VIEW_PROJECTS: &str = "ViewProjects";
pub const MANAGE_PROJECTS: &str = "ManageProjects";
pub const VIEW_SCHEMAS: &str = "ViewSchemas";
pub const MANAGE_SCHEMAS: &str = "ManageSchemas";
pub const VIEW_FIELD_MAPPINGS: &str = "ViewFieldMappings";
pub const MANAGE_FIELD_MAPPINGS: &str = "ManageFieldMappings";
pub const VIEW_BATCHES: &str = "ViewBatches";
pub const MANAGE_BATCHES: &str = "ManageBatches";
pub const UPLOAD_DOCUMENTS: &str = "UploadDocuments";
pub const VIEW_ORDERS: &str = "ViewOrders";
pub const MANAGE_ORDERS: &str = "ManageOrders";
pub const MANAGE_TENANTS: &str = "ManageTenants";
pub const MANAGE_USERS: &str = "ManageUsers";
pub const MANAGE_ROLES: &str = "ManageRoles";

/// Permission definition (for audit/display and store seeding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PermissionDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
}

const DEFINITIONS: &[PermissionDefinition] = &[
    def(VIEW_PROJECTS, "View projects", "projects"),
    def(MANAGE_PROJECTS, "Create/update/delete projects", "projects"),
    def(VIEW_SCHEMAS, "View extraction schemas", "schemas"),
    def(MANAGE_SCHEMAS, "Create/update/delete extraction schemas", "schemas"),
    def(VIEW_FIELD_MAPPINGS, "View field mappings", "schemas"),
    def(MANAGE_FIELD_MAPPINGS, "Create/update/delete field mappings", "schemas"),
    def(VIEW_BATCHES, "View document batches", "batches"),
    def(MANAGE_BATCHES, "Create/update/delete document batches", "batches"),
    def(UPLOAD_DOCUMENTS, "Upload documents into a batch", "batches"),
    def(VIEW_ORDERS, "View extraction orders", "orders"),
    def(MANAGE_ORDERS, "Create/cancel extraction orders", "orders"),
    def(MANAGE_TENANTS, "Create/deactivate tenants", "system"),
    def(MANAGE_USERS, "Provision/deactivate users", "system"),
    def(MANAGE_ROLES, "Grant/revoke role assignments", "system"),
];

const fn def(
    name: &'static str,
    description: &'static str,
    category: &'static str,
) -> PermissionDefinition {
    PermissionDefinition {
        name,
        description,
        category,
    }
}

/// Registry of every permission name the system recognizes.
///
/// Built once from the declared constants; lookups are case-insensitive and
/// return the canonical spelling.
#[derive(Debug)]
pub struct PermissionCatalog {
    by_lowercase: HashMap<String, &'static PermissionDefinition>,
}

/// Process-wide catalog of declared permissions.
pub static CATALOG: LazyLock<PermissionCatalog> =
    LazyLock::new(|| PermissionCatalog::from_definitions(DEFINITIONS));

impl PermissionCatalog {
    pub fn from_definitions(definitions: &'static [PermissionDefinition]) -> Self {
        let by_lowercase = definitions
            .iter()
            .map(|d| (d.name.to_ascii_lowercase(), d))
            .collect();
        Self { by_lowercase }
    }

    pub fn lookup(&self, name: &str) -> Option<&'static PermissionDefinition> {
        self.by_lowercase
            .get(&name.trim().to_ascii_lowercase())
            .copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Canonical permission name for `name`, if declared.
    pub fn canonical(&self, name: &str) -> Option<PermissionName> {
        self.lookup(name).map(|d| PermissionName::new(d.name))
    }

    /// All definitions, sorted by name.
    pub fn definitions(&self) -> Vec<&'static PermissionDefinition> {
        let mut defs: Vec<_> = self.by_lowercase.values().copied().collect();
        defs.sort_by_key(|d| d.name);
        defs
    }

    pub fn len(&self) -> usize {
        self.by_lowercase.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_lowercase.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive_and_canonical() {
        assert_eq!(
            CATALOG.canonical("vieworders"),
            Some(PermissionName::new(VIEW_ORDERS))
        );
        assert!(CATALOG.contains("MANAGEBATCHES"));
        assert!(!CATALOG.contains("ViewOrders,ManageOrders"));
        assert!(!CATALOG.contains("DropDatabase"));
    }

    #[test]
    fn names_are_unique() {
        assert_eq!(CATALOG.len(), DEFINITIONS.len());
    }

    #[test]
    fn definitions_are_sorted() {
        let names: Vec<_> = CATALOG.definitions().iter().map(|d| d.name).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
