//! Infrastructure layer: stores, caches, the authorization engine and tenant
//! datastore management.

pub mod access;
pub mod bootstrap;
pub mod cache;
pub mod call;
pub mod config;
pub mod engine;
pub mod error;
pub mod store;
pub mod tenancy;

pub use bootstrap::{Backends, Services};
pub use call::CallContext;
pub use config::EngineConfig;
pub use engine::{AccessRequest, AuthorizationEngine, Verdict};
pub use error::{ProvisioningError, StoreError};
