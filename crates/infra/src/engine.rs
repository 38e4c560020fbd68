//! Authorization engine: the single decision point requests go through.
//!
//! Every failure on the way to a decision (unauthenticated principal,
//! unresolvable identity, store errors, expired deadlines) becomes
//! `Decision::Deny`. Nothing here returns an error to the caller.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use tessera_auth::roles::GLOBAL_ROLE;
use tessera_auth::{
    AccessBundle, AccessError, Decision, PermissionName, PolicyCatalog, PrincipalClaims,
    Requirement, ResolvedIdentity, RoleName, ScopeContext, TenantHeader, evaluate_permissions,
    evaluate_roles, evaluate_scope,
};
use tessera_core::{TenantId, UserId};

use crate::access::{AccessCache, IdentityResolver, Resolution};
use crate::call::CallContext;
use crate::error::StoreError;
use crate::store::TenantDirectory;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(2000);

/// One inbound authorization question.
#[derive(Debug, Clone, Default)]
pub struct AccessRequest {
    pub claims: PrincipalClaims,
    /// Raw `X-Tenant-Id` value.
    pub tenant_header: Option<String>,
    /// Raw `X-Project-Id` value.
    pub project_header: Option<String>,
    /// Caller-supplied budget; the engine's default timeout applies otherwise.
    pub call: Option<CallContext>,
}

impl AccessRequest {
    pub fn new(claims: PrincipalClaims) -> Self {
        Self {
            claims,
            ..Self::default()
        }
    }

    pub fn with_tenant(mut self, identifier: impl Into<String>) -> Self {
        self.tenant_header = Some(identifier.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project_header = Some(project.into());
        self
    }

    pub fn with_call(mut self, call: CallContext) -> Self {
        self.call = Some(call);
        self
    }
}

/// Decision plus whatever the engine learned on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub decision: Decision,
    pub user_id: Option<UserId>,
    pub tenant_id: Option<TenantId>,
}

impl Verdict {
    fn deny(reason: AccessError) -> Self {
        Self {
            decision: Decision::Deny(reason),
            user_id: None,
            tenant_id: None,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.decision.is_allowed()
    }
}

pub struct AuthorizationEngine {
    resolver: IdentityResolver,
    access: AccessCache,
    tenants: Arc<dyn TenantDirectory>,
    policies: PolicyCatalog,
    global_role: String,
    store_timeout: Duration,
}

impl AuthorizationEngine {
    pub fn new(
        resolver: IdentityResolver,
        access: AccessCache,
        tenants: Arc<dyn TenantDirectory>,
        policies: PolicyCatalog,
    ) -> Self {
        Self {
            resolver,
            access,
            tenants,
            policies,
            global_role: GLOBAL_ROLE.to_string(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_global_role(mut self, role: impl Into<String>) -> Self {
        self.global_role = role.into();
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn policies(&self) -> &PolicyCatalog {
        &self.policies
    }

    fn call_for(&self, req: &AccessRequest) -> CallContext {
        req.call
            .clone()
            .unwrap_or_else(|| CallContext::with_timeout(self.store_timeout))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Pipeline stages
    // ─────────────────────────────────────────────────────────────────────

    pub async fn resolve_identity(
        &self,
        claims: &PrincipalClaims,
        ctx: &CallContext,
    ) -> Result<ResolvedIdentity, AccessError> {
        match self.resolver.resolve(claims, ctx).await {
            Ok(Resolution::Resolved(identity)) => Ok(identity),
            Ok(Resolution::Unauthenticated) => Err(AccessError::Unauthenticated),
            Ok(Resolution::Unresolved) => Err(AccessError::UnresolvedIdentity),
            Ok(Resolution::Inactive(identity)) => {
                Err(AccessError::InactiveSubject(format!("user {}", identity.user_id)))
            }
            Err(e) => Err(store_failure("identity resolution", &e)),
        }
    }

    /// Resolve the principal and load (or fetch cached) effective access.
    pub async fn effective_access(
        &self,
        req: &AccessRequest,
    ) -> Result<(ResolvedIdentity, AccessBundle), AccessError> {
        let ctx = self.call_for(req);
        self.load(req, &ctx).await
    }

    async fn load(
        &self,
        req: &AccessRequest,
        ctx: &CallContext,
    ) -> Result<(ResolvedIdentity, AccessBundle), AccessError> {
        let identity = self.resolve_identity(&req.claims, ctx).await?;
        let bundle = self
            .access
            .get_or_load(&identity, ctx)
            .await
            .map_err(|e| store_failure("access load", &e))?;
        Ok((identity, bundle))
    }

    async fn scope_context(
        &self,
        req: &AccessRequest,
        ctx: &CallContext,
    ) -> Result<ScopeContext, AccessError> {
        let project = req
            .project_header
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        let Some(identifier) = req
            .tenant_header
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
        else {
            return Ok(ScopeContext {
                tenant: TenantHeader::Absent,
                project,
            });
        };

        let tenant = ctx
            .run(
                "tenant_by_identifier",
                self.tenants.tenant_by_identifier(identifier),
            )
            .await
            .map_err(|e| store_failure("tenant lookup", &e))?;

        let tenant = match tenant {
            Some(t) if t.active => TenantHeader::Resolved {
                identifier: t.identifier,
                tenant_id: t.id,
            },
            _ => TenantHeader::Unresolved(identifier.to_string()),
        };
        Ok(ScopeContext { tenant, project })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Decisions
    // ─────────────────────────────────────────────────────────────────────

    pub async fn check_permission(
        &self,
        req: &AccessRequest,
        required: &BTreeSet<PermissionName>,
    ) -> Verdict {
        self.authorize(req, &Requirement::AnyPermission(required.clone()))
            .await
    }

    pub async fn check_role(&self, req: &AccessRequest, required: &BTreeSet<RoleName>) -> Verdict {
        self.authorize(req, &Requirement::AnyRole(required.clone()))
            .await
    }

    pub async fn check_scope(&self, req: &AccessRequest) -> Verdict {
        self.authorize(req, &Requirement::TenantScope).await
    }

    /// Resolve a policy string through the catalog, then decide. Unknown
    /// policies deny.
    pub async fn authorize_policy(&self, req: &AccessRequest, policy: &str) -> Verdict {
        match self.policies.resolve(policy) {
            Some(requirement) => self.authorize(req, &requirement).await,
            None => {
                let verdict = Verdict::deny(AccessError::UnknownPolicy(policy.to_string()));
                warn!(policy = %policy, outcome = "deny", reason = "unknown_policy", "authorization decision");
                verdict
            }
        }
    }

    pub async fn authorize(&self, req: &AccessRequest, requirement: &Requirement) -> Verdict {
        let ctx = self.call_for(req);

        let (identity, bundle) = match self.load(req, &ctx).await {
            Ok(loaded) => loaded,
            Err(reason) => {
                let verdict = Verdict::deny(reason);
                log_decision(None, requirement, None, &verdict);
                return verdict;
            }
        };

        let mut tenant_id = None;
        let decision = match requirement {
            Requirement::AnyPermission(required) => evaluate_permissions(&bundle, required),
            Requirement::AnyRole(required) => evaluate_roles(&bundle, required, &self.global_role),
            // A global assignment already covers every scope.
            Requirement::TenantScope if bundle.has_global_role(&self.global_role) => Decision::Allow,
            Requirement::TenantScope => match self.scope_context(req, &ctx).await {
                Ok(scope) => {
                    tenant_id = scope.tenant_id();
                    evaluate_scope(&bundle, &scope, &self.global_role)
                }
                Err(reason) => Decision::Deny(reason),
            },
        };

        let verdict = Verdict {
            decision,
            user_id: Some(identity.user_id),
            tenant_id,
        };
        log_decision(Some(&identity), requirement, Some(&bundle), &verdict);
        verdict
    }

    /// Drop the cached bundle for an identity key (`email:...`, `oid:...`,
    /// `uid:...`).
    pub async fn invalidate(&self, identity_key: &str) -> Result<(), StoreError> {
        let ctx = CallContext::with_timeout(self.store_timeout);
        self.access.invalidate(identity_key, &ctx).await
    }
}

fn store_failure(stage: &str, err: &StoreError) -> AccessError {
    AccessError::StoreFailure(format!("{stage}: {err}"))
}

fn log_decision(
    identity: Option<&ResolvedIdentity>,
    requirement: &Requirement,
    bundle: Option<&AccessBundle>,
    verdict: &Verdict,
) {
    let principal = identity.map(|i| i.key.as_str()).unwrap_or("-");
    let required = requirement.describe();
    let resolved: Vec<String> = match (requirement, bundle) {
        (Requirement::AnyRole(_), Some(b)) => b.role_names().into_iter().collect(),
        (_, Some(b)) => b.permission_names().into_iter().collect(),
        (_, None) => Vec::new(),
    };

    match verdict.decision.deny_reason() {
        None => info!(
            principal = %principal,
            requirement = requirement.kind(),
            required = ?required,
            resolved = ?resolved,
            tenant_id = ?verdict.tenant_id,
            outcome = "allow",
            "authorization decision"
        ),
        Some(reason @ AccessError::StoreFailure(_)) => error!(
            principal = %principal,
            requirement = requirement.kind(),
            required = ?required,
            outcome = "deny",
            reason = reason.kind(),
            error = %reason,
            "authorization decision"
        ),
        Some(reason) => warn!(
            principal = %principal,
            requirement = requirement.kind(),
            required = ?required,
            resolved = ?resolved,
            outcome = "deny",
            reason = reason.kind(),
            detail = %reason,
            "authorization decision"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessLoader;
    use crate::cache::InMemoryCacheStore;
    use crate::store::InMemoryIdentityStore;
    use tessera_auth::claims::default_provider_prefixes;
    use tessera_auth::permissions::{MANAGE_ORDERS, VIEW_ORDERS};
    use tessera_auth::roles::OPERATOR;
    use tessera_core::{PermissionId, ProjectId, UserRoleAssignment};

    struct World {
        store: Arc<InMemoryIdentityStore>,
        cache: Arc<InMemoryCacheStore>,
        engine: AuthorizationEngine,
        alice: UserId,
        operator: tessera_core::RoleId,
        view_orders: PermissionId,
        acme: TenantId,
    }

    fn world() -> World {
        let store = Arc::new(InMemoryIdentityStore::new());
        let alice = store.add_user("alice@co.com", "Alice", None).unwrap();
        let operator = store.add_role(OPERATOR).unwrap();
        let view_orders = store.add_permission(VIEW_ORDERS).unwrap();
        store.grant_permission(operator, view_orders).unwrap();
        let acme = store.add_tenant("acme", "Acme", "postgres://db/tenant_acme").unwrap();
        store.add_tenant("other-tenant", "Other", "postgres://db/tenant_other").unwrap();
        store.assign(UserRoleAssignment::tenant(alice, operator, acme)).unwrap();

        let cache = Arc::new(InMemoryCacheStore::new());
        let engine = engine_over(store.clone(), cache.clone());
        World {
            store,
            cache,
            engine,
            alice,
            operator,
            view_orders,
            acme,
        }
    }

    fn engine_over(store: Arc<InMemoryIdentityStore>, cache: Arc<InMemoryCacheStore>) -> AuthorizationEngine {
        let access = AccessCache::new(
            AccessLoader::new(store.clone()),
            cache,
            Duration::from_secs(300),
            2,
        );
        AuthorizationEngine::new(
            IdentityResolver::new(store.clone(), default_provider_prefixes()),
            access,
            store,
            PolicyCatalog::with_defaults(),
        )
    }

    fn alice() -> AccessRequest {
        AccessRequest::new(PrincipalClaims::authenticated([(
            "preferred_username",
            "alice@co.com",
        )]))
    }

    fn perms(names: &[&'static str]) -> BTreeSet<PermissionName> {
        names.iter().map(|n| PermissionName::new(*n)).collect()
    }

    #[tokio::test]
    async fn alice_can_view_orders_in_acme() {
        let w = world();
        let req = alice().with_tenant("acme");

        let perm = w.engine.check_permission(&req, &perms(&[VIEW_ORDERS])).await;
        assert!(perm.is_allowed());
        assert_eq!(perm.user_id, Some(w.alice));

        let scope = w.engine.check_scope(&req).await;
        assert!(scope.is_allowed());
        assert_eq!(scope.tenant_id, Some(w.acme));
    }

    #[tokio::test]
    async fn alice_is_out_of_scope_in_another_tenant() {
        let w = world();
        let verdict = w.engine.check_scope(&alice().with_tenant("other-tenant")).await;
        assert!(matches!(
            verdict.decision,
            Decision::Deny(AccessError::NotGranted(_))
        ));

        let missing = w.engine.check_scope(&alice()).await;
        assert!(matches!(
            missing.decision,
            Decision::Deny(AccessError::MissingScopeContext(_))
        ));

        let unknown = w.engine.check_scope(&alice().with_tenant("ghost")).await;
        assert!(matches!(
            unknown.decision,
            Decision::Deny(AccessError::MissingScopeContext(_))
        ));
    }

    #[tokio::test]
    async fn unresolved_principal_is_denied_everywhere() {
        let w = world();
        let req = AccessRequest::new(PrincipalClaims::authenticated([(
            "preferred_username",
            "mallory@evil.com",
        )]))
        .with_tenant("acme");

        for verdict in [
            w.engine.check_permission(&req, &perms(&[VIEW_ORDERS])).await,
            w.engine.check_role(&req, &BTreeSet::from([RoleName::new(OPERATOR)])).await,
            w.engine.check_scope(&req).await,
        ] {
            assert_eq!(verdict.decision, Decision::Deny(AccessError::UnresolvedIdentity));
            assert_eq!(verdict.user_id, None);
        }
    }

    #[tokio::test]
    async fn anonymous_and_inactive_principals_are_denied() {
        let w = world();
        let anon = w
            .engine
            .check_permission(&AccessRequest::new(PrincipalClaims::anonymous()), &perms(&[VIEW_ORDERS]))
            .await;
        assert_eq!(anon.decision, Decision::Deny(AccessError::Unauthenticated));

        w.store.set_user_active(w.alice, false).unwrap();
        let inactive = w.engine.check_permission(&alice(), &perms(&[VIEW_ORDERS])).await;
        assert!(matches!(
            inactive.decision,
            Decision::Deny(AccessError::InactiveSubject(_))
        ));
    }

    #[tokio::test]
    async fn comma_policy_is_any_of() {
        let w = world();
        let verdict = w
            .engine
            .authorize_policy(&alice(), "ManageOrders,ViewOrders")
            .await;
        assert!(verdict.is_allowed());

        let denied = w.engine.authorize_policy(&alice(), MANAGE_ORDERS).await;
        assert!(denied.decision.is_denied());

        let unknown = w.engine.authorize_policy(&alice(), "NoSuchPolicy").await;
        assert_eq!(
            unknown.decision,
            Decision::Deny(AccessError::UnknownPolicy("NoSuchPolicy".into()))
        );
    }

    #[tokio::test]
    async fn role_policy_matches_at_tenant_scope() {
        let w = world();
        assert!(w.engine.authorize_policy(&alice(), OPERATOR).await.is_allowed());
        assert!(w.engine.authorize_policy(&alice(), GLOBAL_ROLE).await.decision.is_denied());
    }

    #[tokio::test]
    async fn global_admin_passes_scope_without_headers() {
        let w = world();
        let admin = w.store.add_role(GLOBAL_ROLE).unwrap();
        let root = w.store.add_user("root@co.com", "Root", None).unwrap();
        w.store.assign(UserRoleAssignment::global(root, admin)).unwrap();

        let req = AccessRequest::new(PrincipalClaims::authenticated([("uid", root.to_string())]));
        assert!(w.engine.check_scope(&req).await.is_allowed());
        assert!(w.engine.check_scope(&req.clone().with_tenant("ghost").with_project("9")).await.is_allowed());
        assert!(
            w.engine
                .check_role(&req, &BTreeSet::from([RoleName::new(GLOBAL_ROLE)]))
                .await
                .is_allowed()
        );
    }

    #[tokio::test]
    async fn non_global_role_at_global_scope_grants_no_tenant() {
        let w = world();
        let eve_id = w.store.add_user("eve@co.com", "Eve", None).unwrap();
        w.store.assign(UserRoleAssignment::global(eve_id, w.operator)).unwrap();

        let eve = AccessRequest::new(PrincipalClaims::authenticated([("uid", eve_id.to_string())]));
        for req in [
            eve.clone().with_tenant("other-tenant"),
            eve.clone().with_tenant("acme").with_project("9"),
        ] {
            let verdict = w.engine.check_scope(&req).await;
            assert!(matches!(
                verdict.decision,
                Decision::Deny(AccessError::NotGranted(_))
            ));
        }
        assert!(matches!(
            w.engine.check_scope(&eve).await.decision,
            Decision::Deny(AccessError::MissingScopeContext(_))
        ));
    }

    #[tokio::test]
    async fn project_assignment_requires_both_headers() {
        let w = world();
        let bob = w.store.add_user("bob@co.com", "Bob", None).unwrap();
        w.store
            .assign(UserRoleAssignment::project(bob, w.operator, w.acme, ProjectId::new(42)))
            .unwrap();
        let bob_req = || {
            AccessRequest::new(PrincipalClaims::authenticated([("email", "bob@co.com")]))
        };

        assert!(w.engine.check_scope(&bob_req().with_tenant("acme").with_project("42")).await.is_allowed());
        assert!(w.engine.check_scope(&bob_req().with_tenant("acme").with_project("43")).await.decision.is_denied());
        assert!(w.engine.check_scope(&bob_req().with_tenant("acme")).await.decision.is_denied());
        assert!(w.engine.check_scope(&bob_req().with_tenant("other-tenant").with_project("42")).await.decision.is_denied());
    }

    #[tokio::test]
    async fn deactivated_permission_disappears_after_invalidation() {
        let w = world();
        let req = alice();
        assert!(w.engine.check_permission(&req, &perms(&[VIEW_ORDERS])).await.is_allowed());

        w.store.set_permission_active(w.view_orders, false).unwrap();
        w.engine.invalidate("email:alice@co.com").await.unwrap();

        let verdict = w.engine.check_permission(&req, &perms(&[VIEW_ORDERS])).await;
        assert!(verdict.decision.is_denied());
        assert_eq!(w.store.role_permission_count(), 1);
    }

    #[tokio::test]
    async fn store_failure_denies() {
        let w = world();
        w.store.set_failing(true);
        let verdict = w.engine.check_permission(&alice(), &perms(&[VIEW_ORDERS])).await;
        assert!(matches!(
            verdict.decision,
            Decision::Deny(AccessError::StoreFailure(_))
        ));
    }

    #[tokio::test]
    async fn deadline_expiry_denies() {
        let w = world();
        let engine = engine_over(w.store.clone(), w.cache.clone())
            .with_store_timeout(Duration::from_millis(20));
        w.store.set_latency(Some(Duration::from_millis(200)));

        let verdict = engine.check_permission(&alice(), &perms(&[VIEW_ORDERS])).await;
        assert!(matches!(
            verdict.decision,
            Decision::Deny(AccessError::StoreFailure(_))
        ));
    }

    #[tokio::test]
    async fn cancelled_request_denies() {
        let w = world();
        let call = CallContext::with_timeout(Duration::from_secs(1));
        call.cancel();
        let verdict = w
            .engine
            .check_permission(&alice().with_call(call), &perms(&[VIEW_ORDERS]))
            .await;
        assert!(matches!(
            verdict.decision,
            Decision::Deny(AccessError::StoreFailure(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_evaluations_share_the_cache() {
        let w = world();
        let req = alice().with_tenant("acme");
        let required = perms(&[VIEW_ORDERS]);
        let roles = BTreeSet::from([RoleName::new(OPERATOR)]);
        let (perm, scope, role) = tokio::join!(
            w.engine.check_permission(&req, &required),
            w.engine.check_scope(&req),
            w.engine.check_role(&req, &roles),
        );
        assert!(perm.is_allowed() && scope.is_allowed() && role.is_allowed());
        assert_eq!(w.cache.len(), 1);
    }
}
