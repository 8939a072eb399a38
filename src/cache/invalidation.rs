//! Invalidation fanout.
//!
//! Propagates "this data changed" to cache entries that were not the
//! direct target of a mutation. Marking is idempotent: a second
//! invalidation of an already-stale entry transitions nothing and
//! triggers nothing.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info};

use super::keys::KeyPattern;
use super::query::QueryExecutor;
use super::store::CacheStore;

const METRIC_INVALIDATION_FANOUT: &str = "tessera_invalidation_fanout_total";

pub struct InvalidationBus {
    store: Arc<CacheStore>,
    query: Arc<QueryExecutor>,
}

impl InvalidationBus {
    pub fn new(store: Arc<CacheStore>, query: Arc<QueryExecutor>) -> Self {
        Self { store, query }
    }

    /// Mark matching entries stale and refetch the actively watched ones.
    ///
    /// Keys without a live subscriber (or without a registered fetch
    /// plan) stay flagged and refetch lazily on their next read. Returns
    /// the number of entries that transitioned.
    pub fn invalidate(&self, pattern: &KeyPattern) -> usize {
        let transitioned = self.store.mark_stale(pattern);
        if transitioned.is_empty() {
            debug!(pattern = %pattern, "Invalidation matched nothing new");
            return 0;
        }

        let mut refetched = 0usize;
        for key in &transitioned {
            if self.store.has_subscriber(key) && self.query.refetch(key) {
                refetched += 1;
            }
        }

        counter!(METRIC_INVALIDATION_FANOUT).increment(transitioned.len() as u64);
        info!(
            pattern = %pattern,
            marked = transitioned.len(),
            refetched,
            "Invalidation fanout"
        );
        transitioned.len()
    }

    /// Fanout for several patterns, as after a multi-aggregate mutation.
    pub fn invalidate_all(&self, patterns: &[KeyPattern]) {
        for pattern in patterns {
            self.invalidate(pattern);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use time::macros::datetime;

    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::cache::keys::ResourceKey;
    use crate::cache::query::{FetchPlan, Fetcher};
    use crate::domain::records::ResourceValue;
    use crate::domain::types::ResourceKind;
    use crate::infra::clock::ManualClock;

    fn harness() -> (Arc<CacheStore>, Arc<QueryExecutor>, InvalidationBus) {
        let config = CacheConfig::default();
        let store = Arc::new(CacheStore::new(config.clone()));
        let clock = ManualClock::new(datetime!(2025-06-01 12:00 UTC));
        let query = Arc::new(QueryExecutor::new(config, Arc::clone(&store), clock));
        let bus = InvalidationBus::new(Arc::clone(&store), Arc::clone(&query));
        (store, query, bus)
    }

    fn noop_fetcher(calls: &Arc<AtomicUsize>) -> Fetcher {
        let calls = Arc::clone(calls);
        Arc::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(ResourceValue::Notifications(Vec::new())) })
        })
    }

    #[tokio::test]
    async fn kind_invalidation_marks_only_matching_entries() {
        let (store, _, bus) = harness();
        let now = datetime!(2025-06-01 12:00 UTC);

        store.record_success(
            &ResourceKey::notifications("u-1"),
            ResourceValue::Notifications(Vec::new()),
            now,
        );
        store.record_success(
            &ResourceKey::notifications("u-2"),
            ResourceValue::Notifications(Vec::new()),
            now,
        );
        store.record_success(
            &ResourceKey::comments("pub-1"),
            ResourceValue::Comments(Vec::new()),
            now,
        );

        let marked = bus.invalidate(&KeyPattern::from(ResourceKind::Notifications));
        assert_eq!(marked, 2);
        assert!(store.get(&ResourceKey::notifications("u-1")).unwrap().stale);
        assert!(store.get(&ResourceKey::notifications("u-2")).unwrap().stale);
        assert!(!store.get(&ResourceKey::comments("pub-1")).unwrap().stale);
    }

    #[tokio::test]
    async fn repeat_invalidation_is_idempotent() {
        let (store, _, bus) = harness();
        let key = ResourceKey::notifications("u-1");
        store.record_success(&key, ResourceValue::Notifications(Vec::new()), datetime!(2025-06-01 12:00 UTC));

        let pattern = KeyPattern::from(key.clone());
        assert_eq!(bus.invalidate(&pattern), 1);
        assert_eq!(bus.invalidate(&pattern), 0);
        assert!(store.get(&key).unwrap().stale);
    }

    #[tokio::test]
    async fn subscribed_keys_refetch_immediately() {
        let (store, query, bus) = harness();
        let key = ResourceKey::notifications("u-1");
        let calls = Arc::new(AtomicUsize::new(0));

        query
            .ensure(
                &key,
                FetchPlan::new(noop_fetcher(&calls), time::Duration::seconds(30)),
            )
            .await
            .expect("seed fetch");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        store.subscribe(KeyPattern::from(key.clone()), Arc::new(|_, _| {}));
        bus.invalidate(&KeyPattern::from(key.clone()));

        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!store.get(&key).unwrap().stale);
    }

    #[tokio::test]
    async fn unsubscribed_keys_defer_the_refetch() {
        let (store, query, bus) = harness();
        let key = ResourceKey::notifications("u-1");
        let calls = Arc::new(AtomicUsize::new(0));

        query
            .ensure(
                &key,
                FetchPlan::new(noop_fetcher(&calls), time::Duration::seconds(30)),
            )
            .await
            .expect("seed fetch");

        bus.invalidate(&KeyPattern::from(key.clone()));
        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.get(&key).unwrap().stale);

        // Next read refetches because of the stale flag
        query
            .ensure(
                &key,
                FetchPlan::new(noop_fetcher(&calls), time::Duration::seconds(30)),
            )
            .await
            .expect("deferred refetch");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
