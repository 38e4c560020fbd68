use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, HeaderName, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use tessera_auth::{AccessError, PrincipalClaims, Requirement};
use tessera_infra::{AccessRequest, AuthorizationEngine, Verdict};

use crate::context::AccessContext;

pub const TENANT_HEADER: HeaderName = HeaderName::from_static("x-tenant-id");
pub const PROJECT_HEADER: HeaderName = HeaderName::from_static("x-project-id");

#[derive(Clone)]
enum Guard {
    Requirement(Arc<Requirement>),
    Policy(Arc<str>),
}

/// Engine plus the requirement one group of routes enforces.
#[derive(Clone)]
pub struct AuthzState {
    engine: Arc<AuthorizationEngine>,
    guard: Guard,
}

impl AuthzState {
    pub fn require(engine: Arc<AuthorizationEngine>, requirement: Requirement) -> Self {
        Self {
            engine,
            guard: Guard::Requirement(Arc::new(requirement)),
        }
    }

    /// Policy string resolved per request through the engine's catalog.
    pub fn require_policy(engine: Arc<AuthorizationEngine>, policy: impl AsRef<str>) -> Self {
        Self {
            engine,
            guard: Guard::Policy(Arc::from(policy.as_ref())),
        }
    }

    async fn decide(&self, req: &AccessRequest) -> Verdict {
        match &self.guard {
            Guard::Requirement(requirement) => self.engine.authorize(req, requirement).await,
            Guard::Policy(policy) => self.engine.authorize_policy(req, policy).await,
        }
    }
}

/// Enforce the state's requirement on every request.
///
/// Expects upstream authentication to have put [`PrincipalClaims`] into the
/// request extensions. Missing or unauthenticated principal: 401. Any deny:
/// 403. On allow an [`AccessContext`] is inserted for handlers.
pub async fn authorize_middleware(
    State(state): State<AuthzState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let claims = req
        .extensions()
        .get::<PrincipalClaims>()
        .filter(|c| c.authenticated)
        .cloned()
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let access = AccessRequest {
        claims,
        tenant_header: header_value(req.headers(), &TENANT_HEADER),
        project_header: header_value(req.headers(), &PROJECT_HEADER),
        call: None,
    };

    let verdict = state.decide(&access).await;
    match (verdict.decision.deny_reason(), verdict.user_id) {
        (None, Some(user_id)) => {
            req.extensions_mut()
                .insert(AccessContext::new(user_id, verdict.tenant_id));
            Ok(next.run(req).await)
        }
        (Some(AccessError::Unauthenticated), _) => Err(StatusCode::UNAUTHORIZED),
        (reason, _) => {
            debug!(reason = ?reason.map(AccessError::kind), "request forbidden");
            Err(StatusCode::FORBIDDEN)
        }
    }
}

fn header_value(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Put every route of `router` behind `state`'s requirement.
pub fn guard<S>(router: Router<S>, state: AuthzState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.route_layer(axum::middleware::from_fn_with_state(
        state,
        authorize_middleware,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_headers_are_treated_as_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(TENANT_HEADER, "  ".parse().unwrap());
        headers.insert(PROJECT_HEADER, " 42 ".parse().unwrap());
        assert_eq!(header_value(&headers, &TENANT_HEADER), None);
        assert_eq!(header_value(&headers, &PROJECT_HEADER), Some("42".to_string()));
    }
}
