use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use tessera_core::{SchemaDefinition, SchemaId};

use super::migrations::CURRENT_SCHEMA_VERSION;
use super::{DatastoreFactory, DatastoreLocator, DatastoreProvisioner, TenantDatastore};
use crate::error::{ProvisioningError, StoreError};

/// One tenant database held in memory.
#[derive(Debug)]
pub struct InMemoryDatastore {
    database: String,
    version: RwLock<i32>,
    schemas: RwLock<Vec<SchemaDefinition>>,
    next_id: AtomicI64,
}

impl InMemoryDatastore {
    fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            version: RwLock::new(0),
            schemas: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(0),
        }
    }

    pub fn schema_count(&self) -> usize {
        self.schemas.read().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl TenantDatastore for InMemoryDatastore {
    fn database(&self) -> &str {
        &self.database
    }

    async fn schema_version(&self) -> Result<i32, StoreError> {
        self.version
            .read()
            .map(|v| *v)
            .map_err(|_| StoreError::LockPoisoned)
    }

    async fn schema_by_name(&self, name: &str) -> Result<Option<SchemaDefinition>, StoreError> {
        let schemas = self.schemas.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(schemas
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn import_schema(&self, schema: &SchemaDefinition) -> Result<SchemaId, ProvisioningError> {
        let mut schemas = self.schemas.write().map_err(|_| StoreError::LockPoisoned)?;
        if schemas.iter().any(|s| s.name.eq_ignore_ascii_case(&schema.name)) {
            return Err(ProvisioningError::SchemaExists(schema.name.clone()));
        }
        let id = SchemaId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        schemas.push(SchemaDefinition {
            id,
            ..schema.clone()
        });
        Ok(id)
    }
}

/// In-memory database server: provisioner and handle factory in one.
///
/// Intended for tests/dev. Failure injection drives the compensating
/// rollback paths.
#[derive(Debug, Default)]
pub struct InMemoryDatastores {
    databases: RwLock<HashMap<String, Arc<InMemoryDatastore>>>,
    fail_ensure: AtomicBool,
    fail_migrate: AtomicBool,
    opened: AtomicUsize,
}

impl InMemoryDatastores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_ensure(&self, fail: bool) {
        self.fail_ensure.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_migrate(&self, fail: bool) {
        self.fail_migrate.store(fail, Ordering::SeqCst);
    }

    pub fn datastore(&self, database: &str) -> Option<Arc<InMemoryDatastore>> {
        self.databases
            .read()
            .ok()
            .and_then(|dbs| dbs.get(database).cloned())
    }

    pub fn exists(&self, database: &str) -> bool {
        self.datastore(database).is_some()
    }

    /// Number of handles opened through [`DatastoreFactory::open`].
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatastoreProvisioner for InMemoryDatastores {
    async fn ensure_datastore(&self, locator: &DatastoreLocator) -> Result<bool, ProvisioningError> {
        if self.fail_ensure.load(Ordering::SeqCst) {
            return Err(ProvisioningError::datastore(locator.database(), "injected failure"));
        }
        let mut dbs = self.databases.write().map_err(|_| StoreError::LockPoisoned)?;
        if dbs.contains_key(locator.database()) {
            return Ok(false);
        }
        dbs.insert(
            locator.database().to_string(),
            Arc::new(InMemoryDatastore::new(locator.database())),
        );
        Ok(true)
    }

    async fn migrate(&self, locator: &DatastoreLocator) -> Result<i32, ProvisioningError> {
        if self.fail_migrate.load(Ordering::SeqCst) {
            return Err(ProvisioningError::migration(locator.database(), "injected failure"));
        }
        let db = self
            .datastore(locator.database())
            .ok_or_else(|| ProvisioningError::datastore(locator.database(), "database does not exist"))?;
        let mut version = db.version.write().map_err(|_| StoreError::LockPoisoned)?;
        *version = (*version).max(CURRENT_SCHEMA_VERSION);
        Ok(*version)
    }
}

#[async_trait]
impl DatastoreFactory for InMemoryDatastores {
    async fn open(
        &self,
        locator: &DatastoreLocator,
    ) -> Result<Arc<dyn TenantDatastore>, ProvisioningError> {
        let db = self
            .datastore(locator.database())
            .ok_or_else(|| ProvisioningError::datastore(locator.database(), "database does not exist"))?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        let handle: Arc<dyn TenantDatastore> = db;
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenancy::LocatorTemplate;
    use tessera_core::FieldDefinition;

    fn locator() -> DatastoreLocator {
        LocatorTemplate::new("mem://{database}")
            .unwrap()
            .build("acme", None)
            .unwrap()
    }

    fn schema(name: &str) -> SchemaDefinition {
        SchemaDefinition {
            id: SchemaId::new(9),
            name: name.to_string(),
            description: None,
            fields: vec![FieldDefinition {
                name: "sku".into(),
                data_type: "text".into(),
                required: true,
                position: 0,
            }],
        }
    }

    #[tokio::test]
    async fn ensure_and_migrate_are_idempotent() {
        let dbs = InMemoryDatastores::new();
        assert!(dbs.ensure_datastore(&locator()).await.unwrap());
        assert!(!dbs.ensure_datastore(&locator()).await.unwrap());
        assert_eq!(dbs.migrate(&locator()).await.unwrap(), CURRENT_SCHEMA_VERSION);
        assert_eq!(dbs.migrate(&locator()).await.unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn opening_a_missing_database_fails() {
        let dbs = InMemoryDatastores::new();
        assert!(matches!(
            dbs.open(&locator()).await,
            Err(ProvisioningError::Datastore { .. })
        ));
    }

    #[tokio::test]
    async fn duplicate_schema_names_are_rejected() {
        let dbs = InMemoryDatastores::new();
        dbs.ensure_datastore(&locator()).await.unwrap();
        let handle = dbs.open(&locator()).await.unwrap();

        handle.import_schema(&schema("Orders")).await.unwrap();
        assert_eq!(
            handle.import_schema(&schema("ORDERS")).await,
            Err(ProvisioningError::SchemaExists("ORDERS".into()))
        );
        assert_eq!(dbs.datastore("tenant_acme").unwrap().schema_count(), 1);
    }
}
