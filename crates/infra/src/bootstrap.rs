//! Wiring: configuration in, ready-to-share services out.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing::info;

use tessera_auth::PolicyCatalog;

use crate::access::{AccessCache, AccessLoader, IdentityResolver};
use crate::cache::{CacheStore, InMemoryCacheStore};
use crate::config::EngineConfig;
use crate::engine::AuthorizationEngine;
use crate::error::ProvisioningError;
use crate::store::{IdentityStore, InMemoryIdentityStore, PgIdentityStore, SchemaCatalog, TenantDirectory};
use crate::tenancy::{
    DatastoreFactory, DatastoreProvisioner, DatastoreRouter, InMemoryDatastores, LocatorTemplate,
    PgDatastoreFactory, PgProvisioner, TenantRegistry,
};

#[derive(Clone)]
pub struct Services {
    pub engine: Arc<AuthorizationEngine>,
    pub registry: Arc<TenantRegistry>,
}

/// Backends the services are assembled from.
pub struct Backends {
    pub identity: Arc<dyn IdentityStore>,
    pub directory: Arc<dyn TenantDirectory>,
    pub catalog: Arc<dyn SchemaCatalog>,
    pub cache: Arc<dyn CacheStore>,
    pub provisioner: Arc<dyn DatastoreProvisioner>,
    pub factory: Arc<dyn DatastoreFactory>,
}

impl Backends {
    /// Everything in process memory; the same store serves identity, tenants
    /// and the schema catalog.
    pub fn in_memory(store: Arc<InMemoryIdentityStore>, datastores: Arc<InMemoryDatastores>) -> Self {
        Self {
            identity: store.clone(),
            directory: store.clone(),
            catalog: store,
            cache: Arc::new(InMemoryCacheStore::new()),
            provisioner: datastores.clone(),
            factory: datastores,
        }
    }
}

pub fn assemble(config: &EngineConfig, backends: Backends) -> Result<Services, ProvisioningError> {
    let template = LocatorTemplate::new(config.tenancy.locator_template.clone())?;

    let resolver = IdentityResolver::new(
        backends.identity.clone(),
        config.engine.identity_prefixes.clone(),
    );
    let access = AccessCache::new(
        AccessLoader::new(backends.identity),
        backends.cache,
        config.cache.ttl(),
        config.cache.write_attempts,
    );
    let engine = AuthorizationEngine::new(
        resolver,
        access,
        backends.directory.clone(),
        PolicyCatalog::with_defaults(),
    )
    .with_global_role(config.engine.global_role.clone())
    .with_store_timeout(config.engine.store_timeout());

    let router = Arc::new(DatastoreRouter::new(
        backends.factory,
        backends.directory.clone(),
    ));
    let registry = TenantRegistry::new(
        backends.directory,
        backends.catalog,
        backends.provisioner,
        router,
        template,
    );

    Ok(Services {
        engine: Arc::new(engine),
        registry: Arc::new(registry),
    })
}

/// Connect to Postgres (and Redis when configured), make sure the shared
/// tables exist, and assemble the services.
pub async fn connect(config: &EngineConfig) -> anyhow::Result<Services> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    let store = Arc::new(PgIdentityStore::new(pool));
    store.ensure_schema().await?;

    let admin = PgPoolOptions::new()
        .max_connections(1)
        .connect_lazy(&config.tenancy.admin_database_url)?;

    let backends = Backends {
        identity: store.clone(),
        directory: store.clone(),
        catalog: store,
        cache: cache_store(config)?,
        provisioner: Arc::new(PgProvisioner::new(admin)),
        factory: Arc::new(PgDatastoreFactory::new(config.tenancy.tenant_max_connections)),
    };

    let services = assemble(config, backends)?;
    info!("tessera services ready");
    Ok(services)
}

#[cfg(feature = "redis")]
fn cache_store(config: &EngineConfig) -> anyhow::Result<Arc<dyn CacheStore>> {
    if let Some(url) = &config.redis.url {
        let store = crate::cache::RedisCacheStore::new(url, config.redis.key_prefix.clone())?;
        info!("using redis access cache");
        return Ok(Arc::new(store));
    }
    Ok(Arc::new(InMemoryCacheStore::new()))
}

#[cfg(not(feature = "redis"))]
fn cache_store(config: &EngineConfig) -> anyhow::Result<Arc<dyn CacheStore>> {
    if config.redis.url.is_some() {
        tracing::warn!("redis.url is set but the `redis` feature is disabled; using in-process cache");
    }
    Ok(Arc::new(InMemoryCacheStore::new()))
}
