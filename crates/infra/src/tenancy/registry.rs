//! Tenant lifecycle: lookup, creation with provisioning, schema copy,
//! deactivation.
//!
//! Creation and provisioning form a compensating pair: when provisioning
//! fails the freshly inserted tenant record is deleted again, so a tenant
//! row exists only for a datastore that was successfully prepared.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, instrument, warn};

use tessera_core::{NewTenant, SchemaId, Tenant};

use super::{DatastoreLocator, DatastoreProvisioner, DatastoreRouter, LocatorTemplate};
use crate::call::CallContext;
use crate::error::{ProvisioningError, StoreError};
use crate::store::{SchemaCatalog, TenantDirectory, TenantRecord};

const MAX_IDENTIFIER_LEN: usize = 100;

pub struct TenantRegistry {
    directory: Arc<dyn TenantDirectory>,
    catalog: Arc<dyn SchemaCatalog>,
    provisioner: Arc<dyn DatastoreProvisioner>,
    router: Arc<DatastoreRouter>,
    template: LocatorTemplate,
}

impl TenantRegistry {
    pub fn new(
        directory: Arc<dyn TenantDirectory>,
        catalog: Arc<dyn SchemaCatalog>,
        provisioner: Arc<dyn DatastoreProvisioner>,
        router: Arc<DatastoreRouter>,
        template: LocatorTemplate,
    ) -> Self {
        Self {
            directory,
            catalog,
            provisioner,
            router,
            template,
        }
    }

    pub fn router(&self) -> &Arc<DatastoreRouter> {
        &self.router
    }

    /// Active tenant by identifier.
    pub async fn resolve_tenant(
        &self,
        identifier: &str,
        ctx: &CallContext,
    ) -> Result<Tenant, ProvisioningError> {
        ctx.run(
            "tenant_by_identifier",
            self.directory.tenant_by_identifier(identifier.trim()),
        )
        .await?
        .filter(|t| t.active)
        .ok_or_else(|| ProvisioningError::TenantNotFound(identifier.to_string()))
    }

    pub fn build_locator(
        &self,
        identifier: &str,
        database_override: Option<&str>,
    ) -> Result<DatastoreLocator, ProvisioningError> {
        self.template.build(identifier, database_override)
    }

    /// Ensure the tenant's datastore exists and is migrated, then record the
    /// outcome. Safe to repeat.
    #[instrument(skip(self, tenant, ctx), fields(tenant = %tenant.identifier))]
    pub async fn provision(
        &self,
        tenant: &Tenant,
        ctx: &CallContext,
    ) -> Result<i32, ProvisioningError> {
        let locator = DatastoreLocator::from_url(&tenant.datastore_locator)?;

        let created = ctx
            .run("ensure_datastore", self.provisioner.ensure_datastore(&locator))
            .await?;
        let version = ctx
            .run("migrate_datastore", self.provisioner.migrate(&locator))
            .await?;
        ctx.run(
            "record_provisioning",
            self.directory
                .record_provisioning(tenant.id, Utc::now(), version),
        )
        .await?;

        info!(
            database = %locator.database(),
            created,
            schema_version = version,
            "tenant datastore provisioned"
        );
        Ok(version)
    }

    #[instrument(skip(self, new_tenant, ctx), fields(tenant = %new_tenant.identifier))]
    pub async fn create_tenant(
        &self,
        new_tenant: NewTenant,
        ctx: &CallContext,
    ) -> Result<Tenant, ProvisioningError> {
        let identifier = validate_identifier(&new_tenant.identifier)?;

        let existing = ctx
            .run(
                "tenant_by_identifier",
                self.directory.tenant_by_identifier(identifier),
            )
            .await?;
        if existing.is_some() {
            return Err(ProvisioningError::TenantExists(identifier.to_string()));
        }

        let locator = self.build_locator(identifier, new_tenant.database_name.as_deref())?;
        let owner = ctx
            .run(
                "tenant_by_locator",
                self.directory.tenant_by_locator(locator.url()),
            )
            .await?;
        if let Some(owner) = owner {
            warn!(owner = %owner.identifier, database = %locator.database(), "datastore already assigned");
            return Err(ProvisioningError::LocatorInUse(locator.database().to_string()));
        }

        let record = TenantRecord {
            identifier: identifier.to_string(),
            name: new_tenant.name.trim().to_string(),
            datastore_locator: locator.url().to_string(),
        };
        let mut tenant = ctx
            .run("insert_tenant", self.directory.insert_tenant(record))
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => ProvisioningError::TenantExists(identifier.to_string()),
                other => other.into(),
            })?;

        match self.provision(&tenant, ctx).await {
            Ok(version) => {
                tenant.schema_version = version;
                tenant.provisioned_at = Some(Utc::now());
                info!(tenant_id = %tenant.id, "tenant created");
                Ok(tenant)
            }
            Err(cause) => {
                warn!(tenant_id = %tenant.id, error = %cause, "provisioning failed; removing tenant record");
                self.compensate(&tenant, cause).await
            }
        }
    }

    /// Delete the record of a tenant whose provisioning failed. Runs on its
    /// own budget: the request's context may be the reason provisioning
    /// failed.
    async fn compensate(
        &self,
        tenant: &Tenant,
        cause: ProvisioningError,
    ) -> Result<Tenant, ProvisioningError> {
        match self.directory.delete_tenant(tenant.id).await {
            Ok(_) => Err(cause),
            Err(e) => {
                error!(tenant_id = %tenant.id, error = %e, "compensating delete failed");
                Err(ProvisioningError::RollbackFailed {
                    identifier: tenant.identifier.clone(),
                    cause: format!("{cause}; delete failed: {e}"),
                })
            }
        }
    }

    /// Copy a schema and its fields from the shared catalog into a tenant
    /// datastore. Rejected, with nothing written, if the tenant already has a
    /// schema of that name.
    #[instrument(skip(self, ctx), fields(schema_id = %source))]
    pub async fn copy_schema_definition(
        &self,
        source: SchemaId,
        target_identifier: &str,
        ctx: &CallContext,
    ) -> Result<SchemaId, ProvisioningError> {
        let tenant = self.resolve_tenant(target_identifier, ctx).await?;
        let schema = ctx
            .run("catalog_schema", self.catalog.schema(source))
            .await?
            .ok_or(ProvisioningError::SchemaNotFound(source))?;

        let handle = self.router.handle_for(&tenant).await?;
        // Early answer only; a concurrent copy that slips past this check is
        // rejected by the datastore's unique name index as `SchemaExists`.
        let existing = ctx
            .run("schema_by_name", handle.schema_by_name(&schema.name))
            .await?;
        if existing.is_some() {
            return Err(ProvisioningError::SchemaExists(schema.name));
        }

        let id = ctx
            .run("import_schema", handle.import_schema(&schema))
            .await?;
        info!(
            tenant = %tenant.identifier,
            schema = %schema.name,
            fields = schema.fields.len(),
            "schema definition copied"
        );
        Ok(id)
    }

    /// Soft delete; the router drops its cached handle.
    pub async fn deactivate_tenant(
        &self,
        identifier: &str,
        ctx: &CallContext,
    ) -> Result<(), ProvisioningError> {
        let tenant = ctx
            .run(
                "tenant_by_identifier",
                self.directory.tenant_by_identifier(identifier.trim()),
            )
            .await?
            .ok_or_else(|| ProvisioningError::TenantNotFound(identifier.to_string()))?;

        ctx.run(
            "set_tenant_active",
            self.directory.set_tenant_active(tenant.id, false),
        )
        .await?;
        self.router.evict(tenant.id);
        info!(tenant = %tenant.identifier, "tenant deactivated");
        Ok(())
    }
}

fn validate_identifier(raw: &str) -> Result<&str, ProvisioningError> {
    let identifier = raw.trim();
    if identifier.is_empty() {
        return Err(ProvisioningError::InvalidIdentifier("empty".to_string()));
    }
    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(ProvisioningError::InvalidIdentifier(format!(
            "longer than {MAX_IDENTIFIER_LEN} bytes"
        )));
    }
    if identifier.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ProvisioningError::InvalidIdentifier(format!(
            "'{identifier}' contains whitespace"
        )));
    }
    Ok(identifier)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::InMemoryIdentityStore;
    use crate::tenancy::{InMemoryDatastores, TenantDatastore};
    use crate::tenancy::migrations::CURRENT_SCHEMA_VERSION;
    use tessera_core::{FieldDefinition, SchemaDefinition};

    struct Fixture {
        store: Arc<InMemoryIdentityStore>,
        dbs: Arc<InMemoryDatastores>,
        registry: TenantRegistry,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryIdentityStore::new());
        let dbs = Arc::new(InMemoryDatastores::new());
        let router = Arc::new(DatastoreRouter::new(dbs.clone(), store.clone()));
        let registry = TenantRegistry::new(
            store.clone(),
            store.clone(),
            dbs.clone(),
            router,
            LocatorTemplate::new("postgres://u:p@db:5432/{database}").unwrap(),
        );
        Fixture {
            store,
            dbs,
            registry,
        }
    }

    fn ctx() -> CallContext {
        CallContext::with_timeout(Duration::from_secs(1))
    }

    fn new_tenant(identifier: &str) -> NewTenant {
        NewTenant {
            identifier: identifier.to_string(),
            name: format!("{identifier} inc"),
            database_name: None,
        }
    }

    fn orders_schema() -> SchemaDefinition {
        SchemaDefinition {
            id: SchemaId::new(0),
            name: "Orders".into(),
            description: Some("purchase orders".into()),
            fields: vec![
                FieldDefinition {
                    name: "number".into(),
                    data_type: "text".into(),
                    required: true,
                    position: 0,
                },
                FieldDefinition {
                    name: "total".into(),
                    data_type: "numeric".into(),
                    required: false,
                    position: 1,
                },
            ],
        }
    }

    #[tokio::test]
    async fn create_tenant_provisions_and_records() {
        let f = fixture();
        let tenant = f.registry.create_tenant(new_tenant("Acme"), &ctx()).await.unwrap();

        assert_eq!(tenant.datastore_locator, "postgres://u:p@db:5432/tenant_acme");
        assert_eq!(tenant.schema_version, CURRENT_SCHEMA_VERSION);
        assert!(f.dbs.exists("tenant_acme"));

        let stored = f.registry.resolve_tenant("Acme", &ctx()).await.unwrap();
        assert_eq!(stored.schema_version, CURRENT_SCHEMA_VERSION);
        assert!(stored.provisioned_at.is_some());
    }

    #[tokio::test]
    async fn failed_provisioning_removes_the_record() {
        let f = fixture();
        f.dbs.set_fail_migrate(true);

        let err = f.registry.create_tenant(new_tenant("acme"), &ctx()).await.unwrap_err();
        assert!(matches!(err, ProvisioningError::Migration { .. }));
        assert_eq!(f.store.tenant_count(), 0);
        assert!(matches!(
            f.registry.resolve_tenant("acme", &ctx()).await,
            Err(ProvisioningError::TenantNotFound(_))
        ));

        f.dbs.set_fail_migrate(false);
        f.dbs.set_fail_ensure(true);
        assert!(f.registry.create_tenant(new_tenant("acme"), &ctx()).await.is_err());
        assert_eq!(f.store.tenant_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_identifier_and_locator_are_rejected() {
        let f = fixture();
        f.registry.create_tenant(new_tenant("acme"), &ctx()).await.unwrap();

        assert_eq!(
            f.registry.create_tenant(new_tenant("ACME"), &ctx()).await,
            Err(ProvisioningError::TenantExists("ACME".into()))
        );

        let mut sharing = new_tenant("acme2");
        sharing.database_name = Some("tenant_acme".into());
        assert_eq!(
            f.registry.create_tenant(sharing, &ctx()).await,
            Err(ProvisioningError::LocatorInUse("tenant_acme".into()))
        );
        assert_eq!(f.store.tenant_count(), 1);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_any_write() {
        let f = fixture();
        assert!(matches!(
            f.registry.create_tenant(new_tenant("  "), &ctx()).await,
            Err(ProvisioningError::InvalidIdentifier(_))
        ));
        let mut bad_db = new_tenant("acme");
        bad_db.database_name = Some("Robert'); DROP".into());
        assert!(matches!(
            f.registry.create_tenant(bad_db, &ctx()).await,
            Err(ProvisioningError::InvalidLocator(_))
        ));
        assert_eq!(f.store.tenant_count(), 0);
    }

    #[tokio::test]
    async fn provision_is_idempotent() {
        let f = fixture();
        let tenant = f.registry.create_tenant(new_tenant("acme"), &ctx()).await.unwrap();
        assert_eq!(
            f.registry.provision(&tenant, &ctx()).await.unwrap(),
            CURRENT_SCHEMA_VERSION
        );
    }

    #[tokio::test]
    async fn schema_copy_is_rejected_when_name_exists() {
        let f = fixture();
        f.registry.create_tenant(new_tenant("acme"), &ctx()).await.unwrap();
        let source = f.store.add_schema(orders_schema()).unwrap();

        f.registry
            .copy_schema_definition(source, "acme", &ctx())
            .await
            .unwrap();
        let handle = f.registry.router().handle_for_identifier("acme", &ctx()).await.unwrap();
        let copied = handle.schema_by_name("orders").await.unwrap().unwrap();
        assert_eq!(copied.fields.len(), 2);

        assert_eq!(
            f.registry.copy_schema_definition(source, "acme", &ctx()).await,
            Err(ProvisioningError::SchemaExists("Orders".into()))
        );
        assert_eq!(f.dbs.datastore("tenant_acme").unwrap().schema_count(), 1);

        assert_eq!(
            f.registry
                .copy_schema_definition(SchemaId::new(4040), "acme", &ctx())
                .await,
            Err(ProvisioningError::SchemaNotFound(SchemaId::new(4040)))
        );
    }

    #[tokio::test]
    async fn concurrent_copies_of_one_schema_import_once() {
        let f = fixture();
        f.registry.create_tenant(new_tenant("acme"), &ctx()).await.unwrap();
        let source = f.store.add_schema(orders_schema()).unwrap();

        let (ctx_a, ctx_b) = (ctx(), ctx());
        let (a, b) = tokio::join!(
            f.registry.copy_schema_definition(source, "acme", &ctx_a),
            f.registry.copy_schema_definition(source, "acme", &ctx_b),
        );
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|r| *r == Err(ProvisioningError::SchemaExists("Orders".into())))
        );
        assert_eq!(f.dbs.datastore("tenant_acme").unwrap().schema_count(), 1);
    }

    #[tokio::test]
    async fn deactivated_tenants_stop_resolving() {
        let f = fixture();
        f.registry.create_tenant(new_tenant("acme"), &ctx()).await.unwrap();
        f.registry.router().handle_for_identifier("acme", &ctx()).await.unwrap();
        assert_eq!(f.registry.router().cached_handles(), 1);

        f.registry.deactivate_tenant("acme", &ctx()).await.unwrap();
        assert_eq!(f.registry.router().cached_handles(), 0);
        assert!(matches!(
            f.registry.resolve_tenant("acme", &ctx()).await,
            Err(ProvisioningError::TenantNotFound(_))
        ));
        assert!(matches!(
            f.registry.deactivate_tenant("ghost", &ctx()).await,
            Err(ProvisioningError::TenantNotFound(_))
        ));
    }
}
