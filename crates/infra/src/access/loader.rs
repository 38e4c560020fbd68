use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, warn};

use tessera_auth::{AccessBundle, EffectiveAssignment, PermissionName, RoleName};
use tessera_core::{RoleId, UserId};

use crate::call::CallContext;
use crate::error::StoreError;
use crate::store::{AssignmentRow, IdentityStore};

/// Loads a user's effective, scoped access.
///
/// Only active users, roles, permissions and tenants contribute. A missing or
/// inactive user yields an empty bundle.
pub struct AccessLoader {
    store: Arc<dyn IdentityStore>,
}

impl AccessLoader {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    pub async fn load(&self, user_id: UserId, ctx: &CallContext) -> Result<AccessBundle, StoreError> {
        match ctx.run("user_by_id", self.store.user_by_id(user_id)).await? {
            Some(user) if user.active => {}
            Some(_) => {
                warn!(user_id = %user_id, "user is inactive; loading empty access bundle");
                return Ok(AccessBundle::empty(user_id));
            }
            None => {
                warn!(user_id = %user_id, "user not found; loading empty access bundle");
                return Ok(AccessBundle::empty(user_id));
            }
        }

        let rows = ctx
            .run(
                "assignments_for_user",
                self.store.assignments_for_user(user_id),
            )
            .await?;
        let rows: Vec<AssignmentRow> = rows.into_iter().filter(contributes).collect();

        let role_ids: Vec<RoleId> = rows
            .iter()
            .map(|r| r.role.id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let grants = ctx
            .run("grants_for_roles", self.store.grants_for_roles(&role_ids))
            .await?;

        let mut by_role: BTreeMap<RoleId, BTreeSet<PermissionName>> = BTreeMap::new();
        for grant in grants.into_iter().filter(|g| g.permission.active) {
            by_role
                .entry(grant.role_id)
                .or_default()
                .insert(PermissionName::new(grant.permission.name));
        }

        let assignments = rows
            .into_iter()
            .filter_map(|row| {
                let scope = match row.assignment.scope() {
                    Ok(scope) => scope,
                    Err(e) => {
                        warn!(user_id = %user_id, role = %row.role.name, error = %e, "dropping malformed role assignment");
                        return None;
                    }
                };
                Some(EffectiveAssignment {
                    role_id: row.role.id,
                    permissions: by_role.get(&row.role.id).cloned().unwrap_or_default(),
                    role: RoleName::new(row.role.name),
                    scope,
                })
            })
            .collect::<Vec<_>>();

        debug!(user_id = %user_id, assignments = assignments.len(), "access bundle loaded");
        Ok(AccessBundle {
            user_id,
            assignments,
        })
    }
}

/// Inactive roles contribute nothing; scoped rows also need an active tenant.
fn contributes(row: &AssignmentRow) -> bool {
    if !row.role.active {
        return false;
    }
    match row.assignment.tenant_id {
        Some(_) => row.tenant_active == Some(true),
        None => true,
    }
}
