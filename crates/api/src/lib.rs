//! HTTP surface: axum middleware that enforces access requirements, plus a
//! small introspection router.

pub mod context;
pub mod middleware;
pub mod routes;

pub use context::AccessContext;
pub use middleware::{AuthzState, authorize_middleware, guard};
