use serde::Serialize;

use tessera_core::{TenantId, UserId};

/// Who the request was authorized for.
///
/// Inserted into request extensions by the authorization middleware on
/// Allow; handlers behind the middleware can rely on it being present.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct AccessContext {
    user_id: UserId,
    tenant_id: Option<TenantId>,
}

impl AccessContext {
    pub fn new(user_id: UserId, tenant_id: Option<TenantId>) -> Self {
        Self { user_id, tenant_id }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Set only when the decision resolved the `X-Tenant-Id` header.
    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }
}
