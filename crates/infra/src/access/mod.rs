//! Principal -> effective access pipeline.
//!
//! claims -> [`IdentityResolver`] -> [`AccessCache`] -> [`AccessLoader`] -> `AccessBundle`

pub mod cache;
pub mod loader;
pub mod resolver;

pub use cache::AccessCache;
pub use loader::AccessLoader;
pub use resolver::{IdentityResolver, Resolution};
