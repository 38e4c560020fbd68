use std::sync::Arc;

use axum::{
    Extension, Router,
    body::Body,
    http::{Request, StatusCode},
    routing::get,
};
use tower::ServiceExt;

use tessera_api::{AccessContext, AuthzState, guard, routes};
use tessera_auth::permissions::{MANAGE_ORDERS, VIEW_ORDERS};
use tessera_auth::roles::OPERATOR;
use tessera_auth::{PrincipalClaims, Requirement};
use tessera_core::{ProjectId, UserRoleAssignment};
use tessera_infra::bootstrap::{Backends, assemble};
use tessera_infra::store::InMemoryIdentityStore;
use tessera_infra::tenancy::InMemoryDatastores;
use tessera_infra::{AuthorizationEngine, EngineConfig};

fn engine() -> Arc<AuthorizationEngine> {
    let store = Arc::new(InMemoryIdentityStore::new());
    let alice = store.add_user("alice@co.com", "Alice", None).unwrap();
    let bob = store.add_user("bob@co.com", "Bob", None).unwrap();
    let operator = store.add_role(OPERATOR).unwrap();
    let view = store.add_permission(VIEW_ORDERS).unwrap();
    store.grant_permission(operator, view).unwrap();
    let acme = store.add_tenant("acme", "Acme", "postgres://db/tenant_acme").unwrap();
    store.add_tenant("other-tenant", "Other", "postgres://db/tenant_other").unwrap();
    store.assign(UserRoleAssignment::tenant(alice, operator, acme)).unwrap();
    store
        .assign(UserRoleAssignment::project(bob, operator, acme, ProjectId::new(7)))
        .unwrap();

    let services = assemble(
        &EngineConfig::default(),
        Backends::in_memory(store, Arc::new(InMemoryDatastores::new())),
    )
    .unwrap();
    services.engine
}

fn claims(email: &str) -> PrincipalClaims {
    PrincipalClaims::authenticated([("preferred_username", format!("live.com#{email}"))])
}

fn request(principal: Option<PrincipalClaims>, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder().uri("/orders");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let mut req = builder.body(Body::empty()).unwrap();
    if let Some(principal) = principal {
        req.extensions_mut().insert(principal);
    }
    req
}

fn orders_app(state: AuthzState) -> Router {
    guard(
        Router::new().route(
            "/orders",
            get(|Extension(access): Extension<AccessContext>| async move {
                access.user_id().to_string()
            }),
        ),
        state,
    )
}

#[tokio::test]
async fn allowed_request_reaches_the_handler_with_context() {
    let engine = engine();
    let app = orders_app(AuthzState::require_policy(engine, "ViewOrders,ManageOrders"));

    let res = app
        .oneshot(request(Some(claims("alice@co.com")), &[("X-Tenant-Id", "acme")]))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_or_anonymous_principal_is_unauthorized() {
    let engine = engine();
    let app = orders_app(AuthzState::require(engine, Requirement::TenantScope));

    let res = app.clone().oneshot(request(None, &[])).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = app
        .oneshot(request(Some(PrincipalClaims::anonymous()), &[]))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn denied_requests_are_forbidden() {
    let engine = engine();

    let scope = orders_app(AuthzState::require(engine.clone(), Requirement::TenantScope));
    let res = scope
        .clone()
        .oneshot(request(Some(claims("alice@co.com")), &[("X-Tenant-Id", "other-tenant")]))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = scope
        .clone()
        .oneshot(request(Some(claims("mallory@co.com")), &[("X-Tenant-Id", "acme")]))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let manage = orders_app(AuthzState::require(
        engine,
        Requirement::any_permission([MANAGE_ORDERS]),
    ));
    let res = manage
        .oneshot(request(Some(claims("alice@co.com")), &[]))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn project_scope_comes_from_the_project_header() {
    let engine = engine();
    let app = orders_app(AuthzState::require(engine, Requirement::TenantScope));

    let ok = app
        .clone()
        .oneshot(request(
            Some(claims("bob@co.com")),
            &[("X-Tenant-Id", "acme"), ("X-Project-Id", "7")],
        ))
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);

    let wrong_project = app
        .oneshot(request(
            Some(claims("bob@co.com")),
            &[("X-Tenant-Id", "acme"), ("X-Project-Id", "8")],
        ))
        .await
        .unwrap();
    assert_eq!(wrong_project.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_policy_is_forbidden() {
    let engine = engine();
    let app = orders_app(AuthzState::require_policy(engine, "NoSuchPolicy"));
    let res = app
        .oneshot(request(Some(claims("alice@co.com")), &[]))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn introspection_router_guards_access_routes() {
    let app = routes::router(engine());

    let health = Request::builder().uri("/health").body(Body::empty()).unwrap();
    assert_eq!(app.clone().oneshot(health).await.unwrap().status(), StatusCode::OK);

    let mut me = Request::builder()
        .uri("/access/me")
        .header("x-tenant-id", "acme")
        .body(Body::empty())
        .unwrap();
    me.extensions_mut().insert(claims("alice@co.com"));
    assert_eq!(app.clone().oneshot(me).await.unwrap().status(), StatusCode::OK);

    let anonymous = Request::builder()
        .uri("/access/permissions")
        .body(Body::empty())
        .unwrap();
    assert_eq!(
        app.oneshot(anonymous).await.unwrap().status(),
        StatusCode::UNAUTHORIZED
    );
}
