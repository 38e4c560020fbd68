//! `tessera-core` — identity and tenancy building blocks shared by every crate.
//!
//! This crate contains **pure data** primitives (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;
pub mod model;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{PermissionId, ProjectId, RoleId, SchemaId, TenantId, UserId};
pub use model::{
    FieldDefinition, NewTenant, Permission, Role, RolePermission, SchemaDefinition, ScopeTier,
    Tenant, User, UserRoleAssignment,
};
