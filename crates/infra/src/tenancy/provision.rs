//! Creating and migrating tenant datastores.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info, instrument};

use super::DatastoreLocator;
use super::migrations::{CURRENT_SCHEMA_VERSION, MIGRATIONS_TABLE, pending};
use crate::error::ProvisioningError;

/// Serializes concurrent migrations of one tenant database.
const MIGRATION_LOCK_KEY: i64 = 0x7e55_e7a0;

/// Both steps are idempotent: running them against an existing, fully
/// migrated datastore changes nothing.
#[async_trait]
pub trait DatastoreProvisioner: Send + Sync {
    /// Returns `true` when the database had to be created.
    async fn ensure_datastore(&self, locator: &DatastoreLocator) -> Result<bool, ProvisioningError>;

    /// Apply pending migrations in one transaction; returns the resulting
    /// schema version.
    async fn migrate(&self, locator: &DatastoreLocator) -> Result<i32, ProvisioningError>;
}

/// Provisions tenant databases on the Postgres server reachable through the
/// admin pool.
#[derive(Debug, Clone)]
pub struct PgProvisioner {
    admin: PgPool,
}

impl PgProvisioner {
    pub fn new(admin: PgPool) -> Self {
        Self { admin }
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl DatastoreProvisioner for PgProvisioner {
    #[instrument(skip(self, locator), fields(database = %locator.database()))]
    async fn ensure_datastore(&self, locator: &DatastoreLocator) -> Result<bool, ProvisioningError> {
        let database = locator.database();
        let exists = sqlx::query("SELECT 1 FROM pg_database WHERE datname = $1")
            .bind(database)
            .fetch_optional(&self.admin)
            .await
            .map_err(|e| ProvisioningError::datastore(database, e))?
            .is_some();
        if exists {
            debug!("datastore already exists");
            return Ok(false);
        }

        // CREATE DATABASE cannot run inside a transaction or take bind params.
        let ddl = format!("CREATE DATABASE {}", quote_identifier(database));
        match sqlx::query(&ddl).execute(&self.admin).await {
            Ok(_) => {
                info!("datastore created");
                Ok(true)
            }
            // duplicate_database: lost a race with a concurrent provisioner
            Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some("42P04") => Ok(false),
            Err(e) => Err(ProvisioningError::datastore(database, e)),
        }
    }

    #[instrument(skip(self, locator), fields(database = %locator.database()))]
    async fn migrate(&self, locator: &DatastoreLocator) -> Result<i32, ProvisioningError> {
        let database = locator.database();
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(locator.url())
            .await
            .map_err(|e| ProvisioningError::datastore(database, e))?;

        let result = migrate_pool(&pool, database).await;
        pool.close().await;
        result
    }
}

async fn migrate_pool(pool: &PgPool, database: &str) -> Result<i32, ProvisioningError> {
    let fail = |e: sqlx::Error| ProvisioningError::migration(database, e);

    let mut tx = pool.begin().await.map_err(fail)?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(&mut *tx)
        .await
        .map_err(fail)?;
    sqlx::query(MIGRATIONS_TABLE)
        .execute(&mut *tx)
        .await
        .map_err(fail)?;

    let applied: i32 = sqlx::query("SELECT COALESCE(MAX(version), 0) AS version FROM schema_migrations")
        .fetch_one(&mut *tx)
        .await
        .map_err(fail)?
        .try_get("version")
        .map_err(fail)?;

    for migration in pending(applied) {
        for statement in migration.statements {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(fail)?;
        }
        sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
            .bind(migration.version)
            .bind(migration.name)
            .execute(&mut *tx)
            .await
            .map_err(fail)?;
        info!(version = migration.version, name = migration.name, "migration applied");
    }

    tx.commit().await.map_err(fail)?;
    Ok(applied.max(CURRENT_SCHEMA_VERSION))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_identifier("tenant_acme"), "\"tenant_acme\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }
}
