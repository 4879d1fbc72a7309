use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Error;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

/// Read interface to the external identity-management store mapping a
/// bank-local account id to a unified customer id.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn lookup(&self, account_id: &str) -> Result<Option<String>, Error>;
}

/// sqlx-backed lookup against the MDM mapping table. The table is owned by
/// an external identity-management system; this side only reads.
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn lookup(&self, account_id: &str) -> Result<Option<String>, Error> {
        let customer_id: Option<String> = sqlx::query_scalar(
            "SELECT unified_customer_id FROM mdm_customer_map WHERE bank_specific_account_id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(customer_id)
    }
}

/// Caching front for the identity store, scoped to exactly one pipeline run.
///
/// The same account id tends to recur many times within a run, so a run-local
/// map turns repeated point lookups into one. The cache is created fresh per
/// run and dropped with it, so concurrent runs cannot see each other's
/// entries and nothing goes stale across runs. Per-run processing is
/// sequential, which is why a plain `HashMap` suffices here.
pub struct IdentityResolver {
    store: Arc<dyn IdentityStore>,
    cache: HashMap<String, String>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self {
            store,
            cache: HashMap::new(),
        }
    }

    /// Resolve an account id, consulting the cache before the store. A store
    /// hit populates the cache; a store miss is returned as `None` and is
    /// not cached, so a mapping added mid-run is picked up.
    pub async fn resolve(&mut self, account_id: &str) -> Result<Option<String>, Error> {
        if let Some(customer_id) = self.cache.get(account_id) {
            debug!(account_id, "identity cache hit");
            return Ok(Some(customer_id.clone()));
        }

        match self.store.lookup(account_id).await? {
            Some(customer_id) => {
                debug!(account_id, "identity lookup performed and cached");
                self.cache
                    .insert(account_id.to_owned(), customer_id.clone());
                Ok(Some(customer_id))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory identity store that counts lookups, for cache assertions.
    #[derive(Default)]
    pub struct MemoryIdentityStore {
        mappings: HashMap<String, String>,
        lookups: AtomicUsize,
    }

    impl MemoryIdentityStore {
        pub fn with_mappings(pairs: &[(&str, &str)]) -> Self {
            Self {
                mappings: pairs
                    .iter()
                    .map(|(a, c)| (a.to_string(), c.to_string()))
                    .collect(),
                lookups: AtomicUsize::new(0),
            }
        }

        pub fn lookup_count(&self) -> usize {
            self.lookups.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IdentityStore for MemoryIdentityStore {
        async fn lookup(&self, account_id: &str) -> Result<Option<String>, Error> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.mappings.get(account_id).cloned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::MemoryIdentityStore;
    use super::*;

    #[tokio::test]
    async fn resolves_through_the_store() {
        let store = Arc::new(MemoryIdentityStore::with_mappings(&[("ACC123", "U_42")]));
        let mut resolver = IdentityResolver::new(store);

        let resolved = resolver.resolve("ACC123").await.unwrap();
        assert_eq!(resolved.as_deref(), Some("U_42"));
    }

    #[tokio::test]
    async fn repeated_resolution_hits_the_store_once() {
        let store = Arc::new(MemoryIdentityStore::with_mappings(&[("ACC123", "U_42")]));
        let mut resolver = IdentityResolver::new(store.clone());

        for _ in 0..5 {
            assert_eq!(
                resolver.resolve("ACC123").await.unwrap().as_deref(),
                Some("U_42")
            );
        }
        assert_eq!(store.lookup_count(), 1);
    }

    #[tokio::test]
    async fn misses_are_not_cached() {
        let store = Arc::new(MemoryIdentityStore::default());
        let mut resolver = IdentityResolver::new(store.clone());

        assert!(resolver.resolve("ACC404").await.unwrap().is_none());
        assert!(resolver.resolve("ACC404").await.unwrap().is_none());
        // Both misses went to the store
        assert_eq!(store.lookup_count(), 2);
    }
}
