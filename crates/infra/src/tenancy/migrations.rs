//! Versioned DDL for tenant datastores.

/// Bookkeeping table, created before any versioned step runs.
pub const MIGRATIONS_TABLE: &str = r#"CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
)"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    pub version: i32,
    pub name: &'static str,
    pub statements: &'static [&'static str],
}

/// Ordered by version; versions are never reused.
pub const TENANT_MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_schemas",
        statements: &[
            r#"CREATE TABLE IF NOT EXISTS schemas (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                source_schema_id BIGINT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"#,
            "CREATE UNIQUE INDEX IF NOT EXISTS schemas_name_lower ON schemas (lower(name))",
        ],
    },
    Migration {
        version: 2,
        name: "create_schema_fields",
        statements: &[r#"CREATE TABLE IF NOT EXISTS schema_fields (
                schema_id BIGINT NOT NULL REFERENCES schemas (id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                data_type TEXT NOT NULL,
                required BOOLEAN NOT NULL DEFAULT FALSE,
                position INTEGER NOT NULL,
                PRIMARY KEY (schema_id, name)
            )"#],
    },
];

pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Steps newer than `applied`, in order.
pub fn pending(applied: i32) -> impl Iterator<Item = &'static Migration> {
    TENANT_MIGRATIONS.iter().filter(move |m| m.version > applied)
}
