//! Tenant registry and per-tenant datastore routing.
//!
//! identifier -> [`TenantRegistry`] -> locator -> [`DatastoreProvisioner`]
//! (create + migrate) and [`DatastoreRouter`] -> [`TenantDatastore`] handle.

pub mod datastore;
pub mod in_memory;
pub mod locator;
pub mod migrations;
pub mod provision;
pub mod registry;
pub mod router;

pub use datastore::{DatastoreFactory, PgDatastoreFactory, PgTenantDatastore, TenantDatastore};
pub use in_memory::{InMemoryDatastore, InMemoryDatastores};
pub use locator::{DatastoreLocator, LocatorTemplate};
pub use provision::{DatastoreProvisioner, PgProvisioner};
pub use registry::TenantRegistry;
pub use router::DatastoreRouter;
