//! Identity store boundary.
//!
//! These traits describe only the query shapes the access engine and the
//! tenant registry need. Filtering by active flags is the caller's job, so
//! every backend returns raw rows.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryIdentityStore;
pub use postgres::PgIdentityStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tessera_core::{
    Permission, Role, RoleId, SchemaDefinition, SchemaId, Tenant, TenantId, User, UserId,
    UserRoleAssignment,
};

use crate::error::StoreError;

/// A role assignment joined with its role and, for scoped rows, its tenant's
/// active flag (`None` when the tenant row is missing or the row is global).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentRow {
    pub assignment: UserRoleAssignment,
    pub role: Role,
    pub tenant_active: Option<bool>,
}

/// A role -> permission edge joined with the permission record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGrant {
    pub role_id: RoleId,
    pub permission: Permission,
}

/// Tenant row to insert (the store assigns the id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantRecord {
    pub identifier: String,
    pub name: String,
    pub datastore_locator: String,
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn user_by_external_id(&self, external_id: &str) -> Result<Option<User>, StoreError>;

    /// Case-insensitive email lookup.
    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Assignments of one user, ordered by assignment id.
    async fn assignments_for_user(&self, user_id: UserId)
    -> Result<Vec<AssignmentRow>, StoreError>;

    async fn grants_for_roles(&self, role_ids: &[RoleId]) -> Result<Vec<RoleGrant>, StoreError>;
}

#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Lookup by external identifier regardless of the active flag.
    async fn tenant_by_identifier(&self, identifier: &str) -> Result<Option<Tenant>, StoreError>;

    async fn tenant_by_locator(&self, locator: &str) -> Result<Option<Tenant>, StoreError>;

    async fn insert_tenant(&self, record: TenantRecord) -> Result<Tenant, StoreError>;

    /// Hard delete; only used to compensate a failed provisioning.
    async fn delete_tenant(&self, id: TenantId) -> Result<bool, StoreError>;

    async fn set_tenant_active(&self, id: TenantId, active: bool) -> Result<(), StoreError>;

    async fn record_provisioning(
        &self,
        id: TenantId,
        provisioned_at: DateTime<Utc>,
        schema_version: i32,
    ) -> Result<(), StoreError>;
}

/// Shared schema catalog that new tenants copy definitions from.
#[async_trait]
pub trait SchemaCatalog: Send + Sync {
    async fn schema(&self, id: SchemaId) -> Result<Option<SchemaDefinition>, StoreError>;
}
