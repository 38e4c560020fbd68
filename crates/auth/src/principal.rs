use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use tessera_core::{RoleId, ScopeTier, UserId};

use crate::{PermissionName, RoleName};

/// Outcome of identity resolution: the internal user plus the key the
/// resolution went through (used to address the access cache).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    pub user_id: UserId,
    pub key: String,
}

/// One active role assignment together with the permissions its role grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveAssignment {
    pub role_id: RoleId,
    pub role: RoleName,
    pub scope: ScopeTier,
    pub permissions: BTreeSet<PermissionName>,
}

/// A user's effective access: every active assignment in load order.
///
/// An empty bundle is the fail-closed value (missing or inactive user).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessBundle {
    pub user_id: UserId,
    pub assignments: Vec<EffectiveAssignment>,
}

impl AccessBundle {
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            assignments: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Union of permission names across all assignments, lowercased.
    pub fn permission_names(&self) -> BTreeSet<String> {
        self.assignments
            .iter()
            .flat_map(|a| a.permissions.iter())
            .map(|p| p.as_str().to_ascii_lowercase())
            .collect()
    }

    pub fn role_names(&self) -> BTreeSet<String> {
        self.assignments
            .iter()
            .map(|a| a.role.as_str().to_string())
            .collect()
    }

    /// Holds `global_role` at global scope. Other roles at global scope do
    /// not count.
    pub fn has_global_role(&self, global_role: &str) -> bool {
        self.assignments
            .iter()
            .any(|a| a.scope.is_global() && a.role.matches(global_role))
    }
}
