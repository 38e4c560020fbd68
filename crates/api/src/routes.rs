//! Introspection endpoints for debugging access decisions.

use std::sync::Arc;

use axum::{Extension, Json, Router, http::StatusCode, routing::get};
use serde::Serialize;

use tessera_auth::permissions::PermissionDefinition;
use tessera_auth::{CATALOG, Requirement};
use tessera_infra::AuthorizationEngine;

use crate::context::AccessContext;
use crate::middleware::{AuthzState, guard};

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// `/health` is public; `/access/*` requires tenant scope.
pub fn router(engine: Arc<AuthorizationEngine>) -> Router {
    let protected = Router::new()
        .route("/access/me", get(whoami))
        .route("/access/permissions", get(list_permissions));

    Router::new()
        .route("/health", get(health))
        .merge(guard(
            protected,
            AuthzState::require(engine, Requirement::TenantScope),
        ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /access/me
pub async fn whoami(Extension(access): Extension<AccessContext>) -> Json<AccessContext> {
    Json(access)
}

#[derive(Debug, Serialize)]
pub struct PermissionList {
    pub permissions: Vec<&'static PermissionDefinition>,
}

/// GET /access/permissions - every permission name the system declares
pub async fn list_permissions() -> Json<PermissionList> {
    Json(PermissionList {
        permissions: CATALOG.definitions(),
    })
}
