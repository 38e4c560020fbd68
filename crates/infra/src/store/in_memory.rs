use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tessera_core::{
    Entity, Permission, PermissionId, Role, RoleId, RolePermission, SchemaDefinition, SchemaId,
    Tenant, TenantId, User, UserId, UserRoleAssignment,
};

use super::{AssignmentRow, IdentityStore, RoleGrant, SchemaCatalog, TenantDirectory, TenantRecord};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    users: BTreeMap<UserId, User>,
    roles: BTreeMap<RoleId, Role>,
    permissions: BTreeMap<PermissionId, Permission>,
    role_permissions: Vec<RolePermission>,
    /// Keyed by assignment id to keep load order stable.
    assignments: BTreeMap<i64, UserRoleAssignment>,
    tenants: BTreeMap<TenantId, Tenant>,
    schemas: BTreeMap<SchemaId, SchemaDefinition>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

fn upsert<T: Entity>(table: &mut BTreeMap<T::Id, T>, row: T) -> T::Id {
    let id = row.id();
    table.insert(id, row);
    id
}

/// In-memory identity store, tenant directory and schema catalog.
///
/// Intended for tests/dev. Failure and latency injection let tests drive
/// the fail-closed paths.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    state: RwLock<State>,
    failing: AtomicBool,
    latency: RwLock<Option<Duration>>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent query fail with a backend error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay every query (drives deadline tests).
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut l) = self.latency.write() {
            *l = latency;
        }
    }

    async fn enter(&self, operation: &'static str) -> Result<(), StoreError> {
        let latency = self.latency.read().map(|l| *l).unwrap_or(None);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::backend(operation, "injected failure"));
        }
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> T) -> Result<T, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(f(&state))
    }

    fn write<T>(&self, f: impl FnOnce(&mut State) -> T) -> Result<T, StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::LockPoisoned)?;
        Ok(f(&mut state))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Administration (seeding)
    // ─────────────────────────────────────────────────────────────────────

    pub fn add_user(
        &self,
        email: &str,
        display_name: &str,
        external_identity_id: Option<&str>,
    ) -> Result<UserId, StoreError> {
        self.write(|s| {
            let id = UserId::new(s.next_id());
            upsert(
                &mut s.users,
                User {
                    id,
                    external_identity_id: external_identity_id.map(str::to_string),
                    email: email.to_string(),
                    display_name: display_name.to_string(),
                    active: true,
                },
            )
        })
    }

    pub fn add_role(&self, name: &str) -> Result<RoleId, StoreError> {
        self.write(|s| {
            if s.roles.values().any(|r| r.name.eq_ignore_ascii_case(name)) {
                return Err(StoreError::Conflict(format!("role '{name}' exists")));
            }
            let id = RoleId::new(s.next_id());
            Ok(upsert(
                &mut s.roles,
                Role {
                    id,
                    name: name.to_string(),
                    active: true,
                    service_principal: false,
                },
            ))
        })?
    }

    pub fn add_permission(&self, name: &str) -> Result<PermissionId, StoreError> {
        self.write(|s| {
            if s.permissions.values().any(|p| p.name.eq_ignore_ascii_case(name)) {
                return Err(StoreError::Conflict(format!("permission '{name}' exists")));
            }
            let id = PermissionId::new(s.next_id());
            Ok(upsert(
                &mut s.permissions,
                Permission {
                    id,
                    name: name.to_string(),
                    description: None,
                    active: true,
                },
            ))
        })?
    }

    pub fn grant_permission(&self, role_id: RoleId, permission_id: PermissionId) -> Result<(), StoreError> {
        self.write(|s| {
            let edge = RolePermission {
                role_id,
                permission_id,
            };
            if !s.role_permissions.contains(&edge) {
                s.role_permissions.push(edge);
            }
        })
    }

    pub fn assign(&self, assignment: UserRoleAssignment) -> Result<(), StoreError> {
        self.write(|s| {
            let id = s.next_id();
            s.assignments.insert(id, assignment);
        })
    }

    /// Hard-delete matching assignment rows.
    pub fn revoke(&self, assignment: UserRoleAssignment) -> Result<usize, StoreError> {
        self.write(|s| {
            let before = s.assignments.len();
            s.assignments.retain(|_, a| *a != assignment);
            before - s.assignments.len()
        })
    }

    pub fn set_user_active(&self, id: UserId, active: bool) -> Result<(), StoreError> {
        self.write(|s| s.users.get_mut(&id).map(|u| u.active = active))?
            .ok_or_else(|| StoreError::Conflict(format!("user {id} not found")))
    }

    pub fn set_role_active(&self, id: RoleId, active: bool) -> Result<(), StoreError> {
        self.write(|s| s.roles.get_mut(&id).map(|r| r.active = active))?
            .ok_or_else(|| StoreError::Conflict(format!("role {id} not found")))
    }

    pub fn set_permission_active(&self, id: PermissionId, active: bool) -> Result<(), StoreError> {
        self.write(|s| s.permissions.get_mut(&id).map(|p| p.active = active))?
            .ok_or_else(|| StoreError::Conflict(format!("permission {id} not found")))
    }

    pub fn role_permission_count(&self) -> usize {
        self.read(|s| s.role_permissions.len()).unwrap_or(0)
    }

    /// Seed an already provisioned tenant.
    pub fn add_tenant(&self, identifier: &str, name: &str, locator: &str) -> Result<TenantId, StoreError> {
        self.write(|s| {
            let id = TenantId::new(s.next_id());
            upsert(
                &mut s.tenants,
                Tenant {
                    id,
                    identifier: identifier.to_string(),
                    name: name.to_string(),
                    datastore_locator: locator.to_string(),
                    active: true,
                    provisioned_at: Some(Utc::now()),
                    schema_version: 0,
                },
            )
        })
    }

    pub fn tenant_count(&self) -> usize {
        self.read(|s| s.tenants.len()).unwrap_or(0)
    }

    pub fn add_schema(&self, mut schema: SchemaDefinition) -> Result<SchemaId, StoreError> {
        self.write(|s| {
            schema.id = SchemaId::new(s.next_id());
            upsert(&mut s.schemas, schema)
        })
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.enter("user_by_id").await?;
        self.read(|s| s.users.get(&id).cloned())
    }

    async fn user_by_external_id(&self, external_id: &str) -> Result<Option<User>, StoreError> {
        self.enter("user_by_external_id").await?;
        self.read(|s| {
            s.users
                .values()
                .find(|u| {
                    u.external_identity_id
                        .as_deref()
                        .is_some_and(|e| e.eq_ignore_ascii_case(external_id))
                })
                .cloned()
        })
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.enter("user_by_email").await?;
        self.read(|s| {
            s.users
                .values()
                .find(|u| u.email.eq_ignore_ascii_case(email))
                .cloned()
        })
    }

    async fn assignments_for_user(&self, user_id: UserId) -> Result<Vec<AssignmentRow>, StoreError> {
        self.enter("assignments_for_user").await?;
        self.read(|s| {
            s.assignments
                .values()
                .filter(|a| a.user_id == user_id)
                .filter_map(|a| {
                    let role = s.roles.get(&a.role_id)?.clone();
                    let tenant_active = a
                        .tenant_id
                        .and_then(|t| s.tenants.get(&t))
                        .map(|t| t.active);
                    Some(AssignmentRow {
                        assignment: *a,
                        role,
                        tenant_active,
                    })
                })
                .collect()
        })
    }

    async fn grants_for_roles(&self, role_ids: &[RoleId]) -> Result<Vec<RoleGrant>, StoreError> {
        self.enter("grants_for_roles").await?;
        self.read(|s| {
            s.role_permissions
                .iter()
                .filter(|edge| role_ids.contains(&edge.role_id))
                .filter_map(|edge| {
                    s.permissions.get(&edge.permission_id).map(|p| RoleGrant {
                        role_id: edge.role_id,
                        permission: p.clone(),
                    })
                })
                .collect()
        })
    }
}

#[async_trait]
impl TenantDirectory for InMemoryIdentityStore {
    async fn tenant_by_identifier(&self, identifier: &str) -> Result<Option<Tenant>, StoreError> {
        self.enter("tenant_by_identifier").await?;
        self.read(|s| {
            s.tenants
                .values()
                .find(|t| t.identifier.eq_ignore_ascii_case(identifier))
                .cloned()
        })
    }

    async fn tenant_by_locator(&self, locator: &str) -> Result<Option<Tenant>, StoreError> {
        self.enter("tenant_by_locator").await?;
        self.read(|s| {
            s.tenants
                .values()
                .find(|t| t.datastore_locator == locator)
                .cloned()
        })
    }

    async fn insert_tenant(&self, record: TenantRecord) -> Result<Tenant, StoreError> {
        self.enter("insert_tenant").await?;
        self.write(|s| {
            if s
                .tenants
                .values()
                .any(|t| t.identifier.eq_ignore_ascii_case(&record.identifier))
            {
                return Err(StoreError::Conflict(format!(
                    "tenant '{}' exists",
                    record.identifier
                )));
            }
            let tenant = Tenant {
                id: TenantId::new(s.next_id()),
                identifier: record.identifier,
                name: record.name,
                datastore_locator: record.datastore_locator,
                active: true,
                provisioned_at: None,
                schema_version: 0,
            };
            upsert(&mut s.tenants, tenant.clone());
            Ok(tenant)
        })?
    }

    async fn delete_tenant(&self, id: TenantId) -> Result<bool, StoreError> {
        self.enter("delete_tenant").await?;
        self.write(|s| s.tenants.remove(&id).is_some())
    }

    async fn set_tenant_active(&self, id: TenantId, active: bool) -> Result<(), StoreError> {
        self.enter("set_tenant_active").await?;
        self.write(|s| {
            if let Some(t) = s.tenants.get_mut(&id) {
                t.active = active;
            }
        })
    }

    async fn record_provisioning(
        &self,
        id: TenantId,
        provisioned_at: DateTime<Utc>,
        schema_version: i32,
    ) -> Result<(), StoreError> {
        self.enter("record_provisioning").await?;
        self.write(|s| {
            if let Some(t) = s.tenants.get_mut(&id) {
                t.provisioned_at = Some(provisioned_at);
                t.schema_version = schema_version;
            }
        })
    }
}

#[async_trait]
impl SchemaCatalog for InMemoryIdentityStore {
    async fn schema(&self, id: SchemaId) -> Result<Option<SchemaDefinition>, StoreError> {
        self.enter("schema").await?;
        self.read(|s| s.schemas.get(&id).cloned())
    }
}
