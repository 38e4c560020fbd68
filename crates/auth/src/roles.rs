use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// The role that grants access across every tenant when held at global scope.
pub const GLOBAL_ROLE: &str = "GlobalAdmin";
pub const TENANT_ADMIN: &str = "TenantAdmin";
pub const PROJECT_MANAGER: &str = "ProjectManager";
pub const OPERATOR: &str = "Operator";
pub const VIEWER: &str = "Viewer";

/// Role names declared by convention; each also becomes a named policy.
pub const KNOWN_ROLES: &[&str] = &[GLOBAL_ROLE, TENANT_ADMIN, PROJECT_MANAGER, OPERATOR, VIEWER];

/// Role identifier used for RBAC.
///
/// Role names are unique case-insensitively, so equality checks during
/// evaluation go through [`RoleName::matches`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleName(Cow<'static, str>);

impl RoleName {
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

impl core::fmt::Display for RoleName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for RoleName {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}
