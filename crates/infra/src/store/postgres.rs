//! Postgres-backed identity store.
//!
//! One pool serves the shared (non-tenant) database: users, roles,
//! permissions, assignments, tenants and the shared schema catalog. Tenant
//! datastores live elsewhere (see `tenancy::datastore`).
//!
//! Every query filters only by key; active flags are returned as-is and
//! interpreted by the loader.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use tessera_core::{
    FieldDefinition, Permission, PermissionId, ProjectId, Role, RoleId, SchemaDefinition,
    SchemaId, Tenant, TenantId, User, UserId, UserRoleAssignment,
};

use super::{AssignmentRow, IdentityStore, RoleGrant, SchemaCatalog, TenantDirectory, TenantRecord};
use crate::error::{StoreError, map_sqlx_error};

/// DDL for the shared database, applied by [`PgIdentityStore::ensure_schema`].
pub const IDENTITY_SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        external_identity_id TEXT UNIQUE,
        email TEXT NOT NULL,
        display_name TEXT NOT NULL,
        active BOOLEAN NOT NULL DEFAULT TRUE
    )"#,
    "CREATE UNIQUE INDEX IF NOT EXISTS users_email_lower ON users (lower(email))",
    r#"CREATE TABLE IF NOT EXISTS roles (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        active BOOLEAN NOT NULL DEFAULT TRUE,
        service_principal BOOLEAN NOT NULL DEFAULT FALSE
    )"#,
    "CREATE UNIQUE INDEX IF NOT EXISTS roles_name_lower ON roles (lower(name))",
    r#"CREATE TABLE IF NOT EXISTS permissions (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        description TEXT,
        active BOOLEAN NOT NULL DEFAULT TRUE
    )"#,
    r#"CREATE TABLE IF NOT EXISTS role_permissions (
        role_id BIGINT NOT NULL REFERENCES roles (id),
        permission_id BIGINT NOT NULL REFERENCES permissions (id),
        PRIMARY KEY (role_id, permission_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS tenants (
        id BIGSERIAL PRIMARY KEY,
        identifier TEXT NOT NULL,
        name TEXT NOT NULL,
        datastore_locator TEXT NOT NULL UNIQUE,
        active BOOLEAN NOT NULL DEFAULT TRUE,
        provisioned_at TIMESTAMPTZ,
        schema_version INTEGER NOT NULL DEFAULT 0
    )"#,
    "CREATE UNIQUE INDEX IF NOT EXISTS tenants_identifier_lower ON tenants (lower(identifier))",
    r#"CREATE TABLE IF NOT EXISTS user_role_assignments (
        id BIGSERIAL PRIMARY KEY,
        user_id BIGINT NOT NULL REFERENCES users (id),
        role_id BIGINT NOT NULL REFERENCES roles (id),
        tenant_id BIGINT REFERENCES tenants (id),
        project_id BIGINT,
        CHECK (project_id IS NULL OR tenant_id IS NOT NULL)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS catalog_schemas (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT
    )"#,
    r#"CREATE TABLE IF NOT EXISTS catalog_schema_fields (
        schema_id BIGINT NOT NULL REFERENCES catalog_schemas (id),
        name TEXT NOT NULL,
        data_type TEXT NOT NULL,
        required BOOLEAN NOT NULL DEFAULT FALSE,
        position INTEGER NOT NULL,
        PRIMARY KEY (schema_id, name)
    )"#,
];

#[derive(Debug, Clone)]
pub struct PgIdentityStore {
    pool: Arc<PgPool>,
}

impl PgIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the shared tables if they do not exist (single transaction).
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        for statement in IDENTITY_SCHEMA {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn fetch_user(&self, operation: &'static str, sql: &str, bind: UserKey<'_>) -> Result<Option<User>, StoreError> {
        let query = sqlx::query(sql);
        let query = match bind {
            UserKey::Id(id) => query.bind(id.get()),
            UserKey::Text(text) => query.bind(text),
        };
        let row = query
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        row.map(|r| user_from_row(&r).map_err(|e| map_sqlx_error(operation, e)))
            .transpose()
    }
}

enum UserKey<'a> {
    Id(UserId),
    Text(&'a str),
}

const USER_COLUMNS: &str = "id, external_identity_id, email, display_name, active";

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: UserId::new(row.try_get("id")?),
        external_identity_id: row.try_get("external_identity_id")?,
        email: row.try_get("email")?,
        display_name: row.try_get("display_name")?,
        active: row.try_get("active")?,
    })
}

fn tenant_from_row(row: &PgRow) -> Result<Tenant, sqlx::Error> {
    Ok(Tenant {
        id: TenantId::new(row.try_get("id")?),
        identifier: row.try_get("identifier")?,
        name: row.try_get("name")?,
        datastore_locator: row.try_get("datastore_locator")?,
        active: row.try_get("active")?,
        provisioned_at: row.try_get("provisioned_at")?,
        schema_version: row.try_get("schema_version")?,
    })
}

const TENANT_COLUMNS: &str =
    "id, identifier, name, datastore_locator, active, provisioned_at, schema_version";

#[async_trait]
impl IdentityStore for PgIdentityStore {
    #[instrument(skip(self), fields(user_id = %id))]
    async fn user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        self.fetch_user("user_by_id", &sql, UserKey::Id(id)).await
    }

    #[instrument(skip(self))]
    async fn user_by_external_id(&self, external_id: &str) -> Result<Option<User>, StoreError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(external_identity_id) = lower($1)"
        );
        self.fetch_user("user_by_external_id", &sql, UserKey::Text(external_id))
            .await
    }

    #[instrument(skip(self))]
    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)");
        self.fetch_user("user_by_email", &sql, UserKey::Text(email)).await
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn assignments_for_user(&self, user_id: UserId) -> Result<Vec<AssignmentRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                a.user_id,
                a.role_id,
                a.tenant_id,
                a.project_id,
                r.name AS role_name,
                r.active AS role_active,
                r.service_principal,
                t.active AS tenant_active
            FROM user_role_assignments a
            JOIN roles r ON r.id = a.role_id
            LEFT JOIN tenants t ON t.id = a.tenant_id
            WHERE a.user_id = $1
            ORDER BY a.id ASC
            "#,
        )
        .bind(user_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("assignments_for_user", e))?;

        rows.iter()
            .map(|row| {
                let role_id = RoleId::new(row.try_get("role_id")?);
                Ok(AssignmentRow {
                    assignment: UserRoleAssignment {
                        user_id: UserId::new(row.try_get("user_id")?),
                        role_id,
                        tenant_id: row.try_get::<Option<i64>, _>("tenant_id")?.map(TenantId::new),
                        project_id: row
                            .try_get::<Option<i64>, _>("project_id")?
                            .map(ProjectId::new),
                    },
                    role: Role {
                        id: role_id,
                        name: row.try_get("role_name")?,
                        active: row.try_get("role_active")?,
                        service_principal: row.try_get("service_principal")?,
                    },
                    tenant_active: row.try_get("tenant_active")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| map_sqlx_error("assignments_for_user", e))
    }

    #[instrument(skip(self), fields(role_count = role_ids.len()))]
    async fn grants_for_roles(&self, role_ids: &[RoleId]) -> Result<Vec<RoleGrant>, StoreError> {
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = role_ids.iter().map(RoleId::get).collect();

        let rows = sqlx::query(
            r#"
            SELECT rp.role_id, p.id, p.name, p.description, p.active
            FROM role_permissions rp
            JOIN permissions p ON p.id = rp.permission_id
            WHERE rp.role_id = ANY($1)
            ORDER BY rp.role_id, p.name
            "#,
        )
        .bind(&ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("grants_for_roles", e))?;

        rows.iter()
            .map(|row| {
                Ok(RoleGrant {
                    role_id: RoleId::new(row.try_get("role_id")?),
                    permission: Permission {
                        id: PermissionId::new(row.try_get("id")?),
                        name: row.try_get("name")?,
                        description: row.try_get("description")?,
                        active: row.try_get("active")?,
                    },
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| map_sqlx_error("grants_for_roles", e))
    }
}

#[async_trait]
impl TenantDirectory for PgIdentityStore {
    #[instrument(skip(self))]
    async fn tenant_by_identifier(&self, identifier: &str) -> Result<Option<Tenant>, StoreError> {
        let sql = format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE lower(identifier) = lower($1)");
        let row = sqlx::query(&sql)
            .bind(identifier)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("tenant_by_identifier", e))?;
        row.map(|r| tenant_from_row(&r).map_err(|e| map_sqlx_error("tenant_by_identifier", e)))
            .transpose()
    }

    #[instrument(skip(self, locator))]
    async fn tenant_by_locator(&self, locator: &str) -> Result<Option<Tenant>, StoreError> {
        let sql = format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE datastore_locator = $1");
        let row = sqlx::query(&sql)
            .bind(locator)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("tenant_by_locator", e))?;
        row.map(|r| tenant_from_row(&r).map_err(|e| map_sqlx_error("tenant_by_locator", e)))
            .transpose()
    }

    #[instrument(skip(self, record), fields(identifier = %record.identifier))]
    async fn insert_tenant(&self, record: TenantRecord) -> Result<Tenant, StoreError> {
        let sql = format!(
            "INSERT INTO tenants (identifier, name, datastore_locator) VALUES ($1, $2, $3) RETURNING {TENANT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&record.identifier)
            .bind(&record.name)
            .bind(&record.datastore_locator)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_tenant", e))?;
        tenant_from_row(&row).map_err(|e| map_sqlx_error("insert_tenant", e))
    }

    #[instrument(skip(self), fields(tenant_id = %id))]
    async fn delete_tenant(&self, id: TenantId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM tenants WHERE id = $1")
            .bind(id.get())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_tenant", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(tenant_id = %id))]
    async fn set_tenant_active(&self, id: TenantId, active: bool) -> Result<(), StoreError> {
        sqlx::query("UPDATE tenants SET active = $2 WHERE id = $1")
            .bind(id.get())
            .bind(active)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_tenant_active", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %id))]
    async fn record_provisioning(
        &self,
        id: TenantId,
        provisioned_at: DateTime<Utc>,
        schema_version: i32,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE tenants SET provisioned_at = $2, schema_version = $3 WHERE id = $1")
            .bind(id.get())
            .bind(provisioned_at)
            .bind(schema_version)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("record_provisioning", e))?;
        Ok(())
    }
}

#[async_trait]
impl SchemaCatalog for PgIdentityStore {
    #[instrument(skip(self), fields(schema_id = %id))]
    async fn schema(&self, id: SchemaId) -> Result<Option<SchemaDefinition>, StoreError> {
        let Some(row) = sqlx::query("SELECT id, name, description FROM catalog_schemas WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("schema", e))?
        else {
            return Ok(None);
        };

        let field_rows = sqlx::query(
            r#"
            SELECT name, data_type, required, position
            FROM catalog_schema_fields
            WHERE schema_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("schema_fields", e))?;

        let decode = || -> Result<SchemaDefinition, sqlx::Error> {
            let fields = field_rows
                .iter()
                .map(|f| {
                    Ok(FieldDefinition {
                        name: f.try_get("name")?,
                        data_type: f.try_get("data_type")?,
                        required: f.try_get("required")?,
                        position: f.try_get("position")?,
                    })
                })
                .collect::<Result<Vec<_>, sqlx::Error>>()?;
            Ok(SchemaDefinition {
                id: SchemaId::new(row.try_get("id")?),
                name: row.try_get("name")?,
                description: row.try_get("description")?,
                fields,
            })
        };

        decode().map(Some).map_err(|e| map_sqlx_error("schema", e))
    }
}
