use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use tessera_core::{Tenant, TenantId};

use super::{DatastoreFactory, DatastoreLocator, TenantDatastore};
use crate::call::CallContext;
use crate::error::{ProvisioningError, StoreError};
use crate::store::TenantDirectory;

/// Hands out the datastore handle for a tenant.
///
/// Handles are opened from the tenant's stored locator on first use and
/// kept per tenant id for the life of the router. A handle is never returned
/// for any tenant other than the one it was opened for.
pub struct DatastoreRouter {
    factory: Arc<dyn DatastoreFactory>,
    directory: Arc<dyn TenantDirectory>,
    handles: RwLock<HashMap<TenantId, Arc<dyn TenantDatastore>>>,
}

impl DatastoreRouter {
    pub fn new(factory: Arc<dyn DatastoreFactory>, directory: Arc<dyn TenantDirectory>) -> Self {
        Self {
            factory,
            directory,
            handles: RwLock::new(HashMap::new()),
        }
    }

    fn cached(&self, id: TenantId) -> Result<Option<Arc<dyn TenantDatastore>>, StoreError> {
        let handles = self.handles.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(handles.get(&id).cloned())
    }

    pub async fn handle_for(&self, tenant: &Tenant) -> Result<Arc<dyn TenantDatastore>, ProvisioningError> {
        if !tenant.active {
            return Err(ProvisioningError::TenantInactive(tenant.identifier.clone()));
        }
        if let Some(handle) = self.cached(tenant.id)? {
            return Ok(handle);
        }

        let locator = DatastoreLocator::from_url(&tenant.datastore_locator)?;
        let opened = self.factory.open(&locator).await?;
        debug!(tenant_id = %tenant.id, database = %locator.database(), "tenant datastore opened");

        let mut handles = self.handles.write().map_err(|_| StoreError::LockPoisoned)?;
        // A concurrent open may have won; keep whichever landed first.
        Ok(handles.entry(tenant.id).or_insert(opened).clone())
    }

    /// Resolve an active tenant by identifier, then route to its datastore.
    pub async fn handle_for_identifier(
        &self,
        identifier: &str,
        ctx: &CallContext,
    ) -> Result<Arc<dyn TenantDatastore>, ProvisioningError> {
        let tenant = ctx
            .run(
                "tenant_by_identifier",
                self.directory.tenant_by_identifier(identifier.trim()),
            )
            .await?
            .filter(|t| t.active)
            .ok_or_else(|| ProvisioningError::TenantNotFound(identifier.to_string()))?;
        self.handle_for(&tenant).await
    }

    /// Forget the cached handle (tenant deactivated or relocated).
    pub fn evict(&self, id: TenantId) -> bool {
        self.handles
            .write()
            .map(|mut handles| handles.remove(&id).is_some())
            .unwrap_or(false)
    }

    pub fn cached_handles(&self) -> usize {
        self.handles.read().map(|h| h.len()).unwrap_or(0)
    }
}
