use std::sync::Arc;

use tracing::debug;

use tessera_auth::{IdentityClaim, PrincipalClaims, ResolvedIdentity};

use crate::call::CallContext;
use crate::error::StoreError;
use crate::store::IdentityStore;

/// Result of identity resolution. Anything but `Resolved` must be denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Unauthenticated,
    Unresolved,
    Inactive(ResolvedIdentity),
    Resolved(ResolvedIdentity),
}

/// Maps request claims onto an internal user.
///
/// Priority: internal id claim, directory object id, then each username-like
/// claim in turn. A candidate that names no user falls through to the next.
pub struct IdentityResolver {
    store: Arc<dyn IdentityStore>,
    provider_prefixes: Vec<String>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn IdentityStore>, provider_prefixes: Vec<String>) -> Self {
        Self {
            store,
            provider_prefixes,
        }
    }

    pub async fn resolve(
        &self,
        claims: &PrincipalClaims,
        ctx: &CallContext,
    ) -> Result<Resolution, StoreError> {
        if !claims.authenticated {
            return Ok(Resolution::Unauthenticated);
        }

        for candidate in claims.identity_candidates(&self.provider_prefixes) {
            let user = match &candidate {
                IdentityClaim::InternalId(id) => {
                    ctx.run("user_by_id", self.store.user_by_id(*id)).await?
                }
                IdentityClaim::ObjectId(oid) => {
                    ctx.run("user_by_external_id", self.store.user_by_external_id(oid))
                        .await?
                }
                IdentityClaim::Username(name) => {
                    ctx.run("user_by_email", self.store.user_by_email(name)).await?
                }
            };

            let Some(user) = user else {
                debug!(candidate = %candidate.cache_key(), "identity candidate did not match");
                continue;
            };

            let identity = ResolvedIdentity {
                user_id: user.id,
                key: candidate.cache_key(),
            };
            debug!(user_id = %user.id, key = %identity.key, active = user.active, "identity resolved");

            return Ok(if user.active {
                Resolution::Resolved(identity)
            } else {
                Resolution::Inactive(identity)
            });
        }

        Ok(Resolution::Unresolved)
    }
}
