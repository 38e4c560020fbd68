//! Tenant datastore handles.
//!
//! A handle is scoped to exactly one tenant database. Handles are opened by a
//! [`DatastoreFactory`] from the tenant's stored locator and cached by the
//! router; nothing here ever touches another tenant's database.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::instrument;

use tessera_core::{FieldDefinition, SchemaDefinition, SchemaId};

use super::DatastoreLocator;
use crate::error::{ProvisioningError, StoreError, map_sqlx_error};

#[async_trait]
pub trait TenantDatastore: Send + Sync {
    fn database(&self) -> &str;

    /// Highest applied migration version (0 when unmigrated).
    async fn schema_version(&self) -> Result<i32, StoreError>;

    /// Case-insensitive lookup.
    async fn schema_by_name(&self, name: &str) -> Result<Option<SchemaDefinition>, StoreError>;

    /// Insert a schema and its fields atomically. A schema with the same
    /// name (case-insensitive) fails with `SchemaExists` and writes nothing.
    async fn import_schema(&self, schema: &SchemaDefinition) -> Result<SchemaId, ProvisioningError>;
}

#[async_trait]
pub trait DatastoreFactory: Send + Sync {
    async fn open(
        &self,
        locator: &DatastoreLocator,
    ) -> Result<Arc<dyn TenantDatastore>, ProvisioningError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Postgres
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PgTenantDatastore {
    database: String,
    pool: PgPool,
}

impl PgTenantDatastore {
    pub fn new(database: impl Into<String>, pool: PgPool) -> Self {
        Self {
            database: database.into(),
            pool,
        }
    }

    async fn fields_of(&self, schema_id: i64) -> Result<Vec<FieldDefinition>, StoreError> {
        let rows = sqlx::query(
            "SELECT name, data_type, required, position FROM schema_fields \
             WHERE schema_id = $1 ORDER BY position, name",
        )
        .bind(schema_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("schema_fields", e))?;

        rows.iter()
            .map(field_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("schema_fields", e))
    }
}

fn field_from_row(row: &PgRow) -> Result<FieldDefinition, sqlx::Error> {
    Ok(FieldDefinition {
        name: row.try_get("name")?,
        data_type: row.try_get("data_type")?,
        required: row.try_get("required")?,
        position: row.try_get("position")?,
    })
}

#[async_trait]
impl TenantDatastore for PgTenantDatastore {
    fn database(&self) -> &str {
        &self.database
    }

    #[instrument(skip(self), fields(database = %self.database))]
    async fn schema_version(&self) -> Result<i32, StoreError> {
        let row = sqlx::query("SELECT COALESCE(MAX(version), 0) AS version FROM schema_migrations")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("schema_version", e))?;
        row.try_get("version")
            .map_err(|e| map_sqlx_error("schema_version", e))
    }

    #[instrument(skip(self), fields(database = %self.database))]
    async fn schema_by_name(&self, name: &str) -> Result<Option<SchemaDefinition>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, description FROM schemas WHERE lower(name) = lower($1)",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("schema_by_name", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let decode = |e: sqlx::Error| map_sqlx_error("schema_by_name", e);
        let id: i64 = row.try_get("id").map_err(decode)?;
        Ok(Some(SchemaDefinition {
            id: SchemaId::new(id),
            name: row.try_get("name").map_err(decode)?,
            description: row.try_get("description").map_err(decode)?,
            fields: self.fields_of(id).await?,
        }))
    }

    #[instrument(skip(self, schema), fields(database = %self.database, schema = %schema.name))]
    async fn import_schema(&self, schema: &SchemaDefinition) -> Result<SchemaId, ProvisioningError> {
        let exists = |e: sqlx::Error| match map_sqlx_error("import_schema", e) {
            StoreError::Conflict(_) => ProvisioningError::SchemaExists(schema.name.clone()),
            other => ProvisioningError::Store(other),
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query(
            "INSERT INTO schemas (name, description, source_schema_id) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(&schema.name)
        .bind(&schema.description)
        .bind(schema.id.get())
        .fetch_one(&mut *tx)
        .await
        .map_err(exists)?;
        let id: i64 = row
            .try_get("id")
            .map_err(|e| map_sqlx_error("import_schema", e))?;

        for field in &schema.fields {
            sqlx::query(
                "INSERT INTO schema_fields (schema_id, name, data_type, required, position) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(id)
            .bind(&field.name)
            .bind(&field.data_type)
            .bind(field.required)
            .bind(field.position)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("import_schema_field", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(SchemaId::new(id))
    }
}

/// Opens lazily connected pools; no connection is made until first use.
#[derive(Debug, Clone)]
pub struct PgDatastoreFactory {
    max_connections: u32,
}

impl PgDatastoreFactory {
    pub fn new(max_connections: u32) -> Self {
        Self {
            max_connections: max_connections.max(1),
        }
    }
}

#[async_trait]
impl DatastoreFactory for PgDatastoreFactory {
    async fn open(
        &self,
        locator: &DatastoreLocator,
    ) -> Result<Arc<dyn TenantDatastore>, ProvisioningError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect_lazy(locator.url())
            .map_err(|e| ProvisioningError::datastore(locator.database(), e))?;
        Ok(Arc::new(PgTenantDatastore::new(locator.database(), pool)))
    }
}
