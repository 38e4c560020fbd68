use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use tessera_auth::{AccessBundle, ResolvedIdentity};

use super::AccessLoader;
use crate::cache::CacheStore;
use crate::call::CallContext;
use crate::error::StoreError;

const KEY_PREFIX: &str = "access:";

/// Read-through cache in front of [`AccessLoader`].
///
/// Miss: load, attempt the write at most `write_attempts` times, return the
/// freshly loaded bundle whether or not the write landed. Cache read
/// failures and undecodable entries count as misses.
pub struct AccessCache {
    loader: AccessLoader,
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
    write_attempts: u32,
}

impl AccessCache {
    pub fn new(
        loader: AccessLoader,
        cache: Arc<dyn CacheStore>,
        ttl: Duration,
        write_attempts: u32,
    ) -> Self {
        Self {
            loader,
            cache,
            ttl,
            write_attempts: write_attempts.max(1),
        }
    }

    pub fn loader(&self) -> &AccessLoader {
        &self.loader
    }

    pub fn cache_key(identity_key: &str) -> String {
        format!("{KEY_PREFIX}{identity_key}")
    }

    pub async fn get_or_load(
        &self,
        identity: &ResolvedIdentity,
        ctx: &CallContext,
    ) -> Result<AccessBundle, StoreError> {
        let key = Self::cache_key(&identity.key);

        if let Some(bundle) = self.lookup(&key, identity, ctx).await {
            debug!(user_id = %identity.user_id, key = %key, "access cache hit");
            return Ok(bundle);
        }

        let bundle = self.loader.load(identity.user_id, ctx).await?;
        self.populate(&key, &bundle, ctx).await;
        Ok(bundle)
    }

    pub async fn invalidate(&self, identity_key: &str, ctx: &CallContext) -> Result<(), StoreError> {
        let key = Self::cache_key(identity_key);
        ctx.run("cache_delete", self.cache.delete(&key)).await
    }

    async fn lookup(
        &self,
        key: &str,
        identity: &ResolvedIdentity,
        ctx: &CallContext,
    ) -> Option<AccessBundle> {
        let payload = match ctx.run("cache_get", self.cache.get(key)).await {
            Ok(payload) => payload?,
            Err(e) => {
                warn!(key = %key, error = %e, "access cache read failed; treating as miss");
                return None;
            }
        };

        match serde_json::from_str::<AccessBundle>(&payload) {
            Ok(bundle) if bundle.user_id == identity.user_id => Some(bundle),
            Ok(bundle) => {
                warn!(
                    key = %key,
                    cached_user = %bundle.user_id,
                    resolved_user = %identity.user_id,
                    "cached bundle belongs to another user; ignoring"
                );
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "undecodable access cache entry; ignoring");
                None
            }
        }
    }

    async fn populate(&self, key: &str, bundle: &AccessBundle, ctx: &CallContext) {
        let payload = match serde_json::to_string(bundle) {
            Ok(p) => p,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to encode access bundle; not caching");
                return;
            }
        };

        for attempt in 1..=self.write_attempts {
            match ctx
                .run("cache_set", self.cache.set(key, payload.clone(), self.ttl))
                .await
            {
                Ok(()) => return,
                Err(e) if e.is_interrupted() => {
                    warn!(key = %key, attempt, error = %e, "access cache write interrupted");
                    return;
                }
                Err(e) => {
                    warn!(key = %key, attempt, error = %e, "access cache write failed");
                }
            }
        }

        warn!(key = %key, attempts = self.write_attempts, "giving up on access cache write");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheStore;
    use crate::store::InMemoryIdentityStore;
    use tessera_auth::roles::VIEWER;
    use tessera_core::{UserId, UserRoleAssignment};

    fn ctx() -> CallContext {
        CallContext::with_timeout(Duration::from_secs(1))
    }

    struct Fixture {
        store: Arc<InMemoryIdentityStore>,
        cache: Arc<InMemoryCacheStore>,
        access: AccessCache,
        identity: ResolvedIdentity,
    }

    fn fixture(write_attempts: u32) -> Fixture {
        let store = Arc::new(InMemoryIdentityStore::new());
        let user = store.add_user("alice@co.com", "Alice", None).unwrap();
        let role = store.add_role(VIEWER).unwrap();
        let acme = store.add_tenant("acme", "Acme", "postgres://db/tenant_acme").unwrap();
        store.assign(UserRoleAssignment::tenant(user, role, acme)).unwrap();

        let cache = Arc::new(InMemoryCacheStore::new());
        let access = AccessCache::new(
            AccessLoader::new(store.clone()),
            cache.clone(),
            Duration::from_secs(60),
            write_attempts,
        );
        Fixture {
            store,
            cache,
            access,
            identity: ResolvedIdentity {
                user_id: user,
                key: "email:alice@co.com".into(),
            },
        }
    }

    #[tokio::test]
    async fn miss_populates_then_hit_skips_the_store() {
        let f = fixture(2);
        let first = f.access.get_or_load(&f.identity, &ctx()).await.unwrap();
        assert_eq!(first.assignments.len(), 1);
        assert_eq!(f.cache.len(), 1);

        // A failing store proves the second call never reaches it.
        f.store.set_failing(true);
        let second = f.access.get_or_load(&f.identity, &ctx()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn failing_cache_write_is_bounded_and_still_returns_fresh_bundle() {
        let f = fixture(3);
        f.cache.set_fail_writes(true);

        let bundle = f.access.get_or_load(&f.identity, &ctx()).await.unwrap();
        assert_eq!(bundle.assignments.len(), 1);
        assert_eq!(f.cache.write_attempts(), 3);
        assert!(f.cache.is_empty());
    }

    #[tokio::test]
    async fn failing_cache_read_falls_back_to_loader() {
        let f = fixture(1);
        f.cache.set_fail_reads(true);
        let bundle = f.access.get_or_load(&f.identity, &ctx()).await.unwrap();
        assert_eq!(bundle.user_id, f.identity.user_id);
    }

    #[tokio::test]
    async fn corrupt_or_foreign_entries_are_ignored() {
        let f = fixture(1);
        let key = AccessCache::cache_key(&f.identity.key);

        f.cache.set(&key, "not json".into(), Duration::from_secs(60)).await.unwrap();
        let bundle = f.access.get_or_load(&f.identity, &ctx()).await.unwrap();
        assert_eq!(bundle.assignments.len(), 1);

        let foreign = serde_json::to_string(&AccessBundle::empty(UserId::new(999))).unwrap();
        f.cache.set(&key, foreign, Duration::from_secs(60)).await.unwrap();
        let bundle = f.access.get_or_load(&f.identity, &ctx()).await.unwrap();
        assert_eq!(bundle.user_id, f.identity.user_id);
        assert_eq!(bundle.assignments.len(), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_a_reload() {
        let f = fixture(1);
        f.access.get_or_load(&f.identity, &ctx()).await.unwrap();
        f.access.invalidate(&f.identity.key, &ctx()).await.unwrap();
        assert!(f.cache.is_empty());
    }
}
