//! `tessera-auth` — pure authorization boundary (fail closed).
//!
//! This crate is intentionally decoupled from HTTP and storage: callers hand
//! it an already loaded [`AccessBundle`] and receive a [`Decision`].

pub mod authorize;
pub mod claims;
pub mod permissions;
pub mod principal;
pub mod requirement;
pub mod roles;

pub use authorize::{
    AccessError, Decision, ScopeContext, TenantHeader, evaluate_permissions, evaluate_roles,
    evaluate_scope,
};
pub use claims::{IdentityClaim, PrincipalClaims};
pub use permissions::{CATALOG, PermissionCatalog, PermissionName};
pub use principal::{AccessBundle, EffectiveAssignment, ResolvedIdentity};
pub use requirement::{PolicyCatalog, Requirement};
pub use roles::RoleName;
