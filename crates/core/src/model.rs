//! Identity and tenancy records.
//!
//! These mirror the rows of the identity store. Users, roles, permissions and
//! tenants are soft-deleted through their `active` flag; role assignments are
//! hard-deleted on revoke.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::DomainError;
use crate::id::{PermissionId, ProjectId, RoleId, SchemaId, TenantId, UserId};

// ─────────────────────────────────────────────────────────────────────────────
// Identity
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Federated directory object id (e.g. the `oid` claim).
    pub external_identity_id: Option<String>,
    pub email: String,
    pub display_name: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    /// Unique, compared case-insensitively.
    pub name: String,
    pub active: bool,
    pub service_principal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
}

/// Role <-> Permission edge.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RolePermission {
    pub role_id: RoleId,
    pub permission_id: PermissionId,
}

// ─────────────────────────────────────────────────────────────────────────────
// Scoped role assignment
// ─────────────────────────────────────────────────────────────────────────────

/// Which tier a role assignment applies to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum ScopeTier {
    Global,
    Tenant { tenant_id: TenantId },
    Project { tenant_id: TenantId, project_id: ProjectId },
}

impl ScopeTier {
    /// Derive the tier from the nullable `(tenant, project)` pair of a row.
    ///
    /// A project without a tenant is not a valid tier.
    pub fn from_parts(
        tenant_id: Option<TenantId>,
        project_id: Option<ProjectId>,
    ) -> Result<Self, DomainError> {
        match (tenant_id, project_id) {
            (None, None) => Ok(Self::Global),
            (Some(tenant_id), None) => Ok(Self::Tenant { tenant_id }),
            (Some(tenant_id), Some(project_id)) => Ok(Self::Project {
                tenant_id,
                project_id,
            }),
            (None, Some(project_id)) => Err(DomainError::validation(format!(
                "project {project_id} assigned without a tenant"
            ))),
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        match self {
            Self::Global => None,
            Self::Tenant { tenant_id } | Self::Project { tenant_id, .. } => Some(*tenant_id),
        }
    }

    pub fn project_id(&self) -> Option<ProjectId> {
        match self {
            Self::Project { project_id, .. } => Some(*project_id),
            _ => None,
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Self::Global)
    }
}

impl core::fmt::Display for ScopeTier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Tenant { tenant_id } => write!(f, "tenant:{tenant_id}"),
            Self::Project {
                tenant_id,
                project_id,
            } => write!(f, "project:{tenant_id}/{project_id}"),
        }
    }
}

/// `(user, role, tenant?, project?)` row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserRoleAssignment {
    pub user_id: UserId,
    pub role_id: RoleId,
    pub tenant_id: Option<TenantId>,
    pub project_id: Option<ProjectId>,
}

impl UserRoleAssignment {
    pub fn global(user_id: UserId, role_id: RoleId) -> Self {
        Self {
            user_id,
            role_id,
            tenant_id: None,
            project_id: None,
        }
    }

    pub fn tenant(user_id: UserId, role_id: RoleId, tenant_id: TenantId) -> Self {
        Self {
            user_id,
            role_id,
            tenant_id: Some(tenant_id),
            project_id: None,
        }
    }

    pub fn project(
        user_id: UserId,
        role_id: RoleId,
        tenant_id: TenantId,
        project_id: ProjectId,
    ) -> Self {
        Self {
            user_id,
            role_id,
            tenant_id: Some(tenant_id),
            project_id: Some(project_id),
        }
    }

    pub fn scope(&self) -> Result<ScopeTier, DomainError> {
        ScopeTier::from_parts(self.tenant_id, self.project_id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tenancy
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    /// Stable external key (the value carried by `X-Tenant-Id`).
    pub identifier: String,
    pub name: String,
    /// Connection descriptor of the tenant's dedicated datastore.
    pub datastore_locator: String,
    pub active: bool,
    pub provisioned_at: Option<DateTime<Utc>>,
    pub schema_version: i32,
}

/// Input for tenant creation (the store assigns the id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTenant {
    pub identifier: String,
    pub name: String,
    /// Explicit database name; the tenant identifier is used when absent.
    pub database_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub data_type: String,
    pub required: bool,
    pub position: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub id: SchemaId,
    /// Unique per datastore, compared case-insensitively.
    pub name: String,
    pub description: Option<String>,
    pub fields: Vec<FieldDefinition>,
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> UserId {
        self.id
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

impl Entity for Role {
    type Id = RoleId;

    fn id(&self) -> RoleId {
        self.id
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

impl Entity for Permission {
    type Id = PermissionId;

    fn id(&self) -> PermissionId {
        self.id
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

impl Entity for Tenant {
    type Id = TenantId;

    fn id(&self) -> TenantId {
        self.id
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

impl Entity for SchemaDefinition {
    type Id = SchemaId;

    fn id(&self) -> SchemaId {
        self.id
    }
}
