use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;

use tessera_core::{ScopeTier, TenantId};

use crate::{AccessBundle, PermissionName, RoleName};

/// Why a decision was denied.
///
/// Everything up to `StoreFailure` is an error condition that the engine
/// converts into a deny; `NotGranted` and `UnknownPolicy` are ordinary
/// negative outcomes.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AccessError {
    #[error("unauthenticated principal")]
    Unauthenticated,

    #[error("no user matches the principal's claims")]
    UnresolvedIdentity,

    #[error("inactive subject: {0}")]
    InactiveSubject(String),

    #[error("missing scope context: {0}")]
    MissingScopeContext(String),

    #[error("store failure: {0}")]
    StoreFailure(String),

    #[error("not granted: {0}")]
    NotGranted(String),

    #[error("unknown policy '{0}'")]
    UnknownPolicy(String),
}

impl AccessError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::UnresolvedIdentity => "unresolved_identity",
            Self::InactiveSubject(_) => "inactive_subject",
            Self::MissingScopeContext(_) => "missing_scope_context",
            Self::StoreFailure(_) => "store_failure",
            Self::NotGranted(_) => "not_granted",
            Self::UnknownPolicy(_) => "unknown_policy",
        }
    }
}

/// Binary policy decision. There is no third state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Decision {
    Allow,
    Deny(AccessError),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn is_denied(&self) -> bool {
        !self.is_allowed()
    }

    pub fn deny_reason(&self) -> Option<&AccessError> {
        match self {
            Self::Allow => None,
            Self::Deny(e) => Some(e),
        }
    }

    pub fn outcome(&self) -> &'static str {
        if self.is_allowed() { "allow" } else { "deny" }
    }
}

impl From<Result<(), AccessError>> for Decision {
    fn from(value: Result<(), AccessError>) -> Self {
        match value {
            Ok(()) => Self::Allow,
            Err(e) => Self::Deny(e),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Permission check
// ─────────────────────────────────────────────────────────────────────────────

/// Any-of permission check: allow when the user holds at least one of
/// `required` (case-insensitive).
pub fn evaluate_permissions(bundle: &AccessBundle, required: &BTreeSet<PermissionName>) -> Decision {
    if required.is_empty() {
        return Decision::Deny(AccessError::NotGranted(
            "empty permission requirement".to_string(),
        ));
    }

    let held = bundle.permission_names();
    if required
        .iter()
        .any(|p| held.contains(&p.as_str().to_ascii_lowercase()))
    {
        Decision::Allow
    } else {
        Decision::Deny(AccessError::NotGranted(format!(
            "none of {:?} held",
            required.iter().map(PermissionName::as_str).collect::<Vec<_>>()
        )))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Role check
// ─────────────────────────────────────────────────────────────────────────────

/// Role check.
///
/// `global_role` only counts when held at global scope (no tenant, no
/// project). Any other role counts at whatever scope it was granted.
pub fn evaluate_roles(
    bundle: &AccessBundle,
    required: &BTreeSet<RoleName>,
    global_role: &str,
) -> Decision {
    if required.is_empty() {
        return Decision::Deny(AccessError::NotGranted("empty role requirement".to_string()));
    }

    for role in required {
        let satisfied = if role.matches(global_role) {
            bundle
                .assignments
                .iter()
                .any(|a| a.role.matches(role.as_str()) && a.scope == ScopeTier::Global)
        } else {
            bundle
                .assignments
                .iter()
                .any(|a| a.role.matches(role.as_str()))
        };

        if satisfied {
            return Decision::Allow;
        }
    }

    Decision::Deny(AccessError::NotGranted(format!(
        "none of roles {:?} held",
        required.iter().map(RoleName::as_str).collect::<Vec<_>>()
    )))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tenant/project scope check
// ─────────────────────────────────────────────────────────────────────────────

/// State of the `X-Tenant-Id` header after lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantHeader {
    Absent,
    /// Present, but no active tenant carries this identifier.
    Unresolved(String),
    Resolved { identifier: String, tenant_id: TenantId },
}

/// Request scope as seen by the scope evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeContext {
    pub tenant: TenantHeader,
    /// Raw `X-Project-Id` value.
    pub project: Option<String>,
}

impl ScopeContext {
    pub fn tenant_id(&self) -> Option<TenantId> {
        match &self.tenant {
            TenantHeader::Resolved { tenant_id, .. } => Some(*tenant_id),
            _ => None,
        }
    }

    fn project_matches(&self, project_id: tessera_core::ProjectId) -> bool {
        self.project.as_deref() == Some(project_id.to_string().as_str())
    }
}

/// Walk assignments in load order; the first one that covers the request wins.
///
/// Global scope is only meaningful for `global_role`; any other role held at
/// global scope covers no tenant.
pub fn evaluate_scope(bundle: &AccessBundle, ctx: &ScopeContext, global_role: &str) -> Decision {
    let request_tenant = ctx.tenant_id();

    for assignment in &bundle.assignments {
        let granted = match assignment.scope {
            ScopeTier::Global => assignment.role.matches(global_role),
            ScopeTier::Tenant { tenant_id } => request_tenant == Some(tenant_id),
            ScopeTier::Project {
                tenant_id,
                project_id,
            } => request_tenant == Some(tenant_id) && ctx.project_matches(project_id),
        };

        if granted {
            return Decision::Allow;
        }
    }

    let reason = if bundle.is_empty() {
        AccessError::NotGranted("no active role assignments".to_string())
    } else {
        match &ctx.tenant {
            TenantHeader::Absent => {
                AccessError::MissingScopeContext("X-Tenant-Id header missing".to_string())
            }
            TenantHeader::Unresolved(identifier) => {
                AccessError::MissingScopeContext(format!("tenant '{identifier}' not found"))
            }
            TenantHeader::Resolved { identifier, .. } => AccessError::NotGranted(format!(
                "no assignment covers tenant '{identifier}' project {:?}",
                ctx.project
            )),
        }
    };

    Decision::Deny(reason)
}
