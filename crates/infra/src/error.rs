//! Infrastructure error model.
//!
//! `StoreError` covers the identity store and the cache store (the decision
//! path converts it into a deny). `ProvisioningError` is the explicit failure
//! value of the tenant-datastore workflows.

use thiserror::Error;

use tessera_core::SchemaId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{operation} failed: {message}")]
    Backend {
        operation: &'static str,
        message: String,
    },

    #[error("failed to decode {what}: {message}")]
    Decode { what: &'static str, message: String },

    #[error("{0} cancelled")]
    Cancelled(&'static str),

    #[error("{0} exceeded its deadline")]
    DeadlineExceeded(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    pub fn backend(operation: &'static str, err: impl core::fmt::Display) -> Self {
        Self::Backend {
            operation,
            message: err.to_string(),
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Cancelled(_) | Self::DeadlineExceeded(_))
    }
}

/// Map SQLx errors onto `StoreError`.
///
/// | SQLx error | StoreError |
/// |------------|------------|
/// | Database (unique violation `23505`) | `Conflict` |
/// | ColumnDecode / Decode / ColumnNotFound | `Decode` |
/// | anything else (pool closed, io, tls, ...) | `Backend` |
pub(crate) fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            StoreError::Conflict(format!("{operation}: {}", db.message()))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Decode {
                what: operation,
                message: err.to_string(),
            }
        }
        _ => StoreError::backend(operation, err),
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProvisioningError {
    #[error("tenant '{0}' not found")]
    TenantNotFound(String),

    #[error("tenant '{0}' is inactive")]
    TenantInactive(String),

    #[error("tenant '{0}' already exists")]
    TenantExists(String),

    #[error("invalid tenant identifier: {0}")]
    InvalidIdentifier(String),

    #[error("invalid datastore locator: {0}")]
    InvalidLocator(String),

    #[error("datastore '{0}' is already assigned to another tenant")]
    LocatorInUse(String),

    #[error("datastore '{database}' unavailable: {message}")]
    Datastore { database: String, message: String },

    #[error("migration of '{database}' failed: {message}")]
    Migration { database: String, message: String },

    #[error("schema {0} not found in the shared catalog")]
    SchemaNotFound(SchemaId),

    #[error("schema '{0}' already exists in the tenant datastore")]
    SchemaExists(String),

    #[error("rollback of tenant '{identifier}' failed after: {cause}")]
    RollbackFailed { identifier: String, cause: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProvisioningError {
    pub(crate) fn datastore(database: &str, err: impl core::fmt::Display) -> Self {
        Self::Datastore {
            database: database.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn migration(database: &str, err: impl core::fmt::Display) -> Self {
        Self::Migration {
            database: database.to_string(),
            message: err.to_string(),
        }
    }
}
