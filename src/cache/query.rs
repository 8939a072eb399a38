//! Query execution: deduplicated, retryable reads.
//!
//! One in-flight fetch per key, ever. Later readers attach to the
//! running fetch through a `watch` channel instead of issuing their own.
//! Results land in the store under request fencing: a fetch that was
//! superseded by a forced refetch finds a different request id on the
//! entry and its result is silently dropped.
//!
//! Fetches run in spawned tasks, so a caller that goes away mid-flight
//! does not cancel the work: the result still lands in the store for
//! whoever else shares the key.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::BoxFuture;
use metrics::{counter, histogram};
use time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::domain::error::ResourceError;
use crate::domain::records::ResourceValue;
use crate::infra::clock::Clock;

use super::config::CacheConfig;
use super::entry::{CacheEntry, EntryStatus, RequestId};
use super::keys::ResourceKey;
use super::store::CacheStore;

const METRIC_FETCH_HIT: &str = "tessera_fetch_hit_total";
const METRIC_FETCH_MISS: &str = "tessera_fetch_miss_total";
const METRIC_FETCH_ATTACH: &str = "tessera_fetch_attach_total";
const METRIC_FETCH_RETRY: &str = "tessera_fetch_retry_total";
const METRIC_FETCH_FENCED: &str = "tessera_fetch_fenced_total";
const METRIC_FETCH_MS: &str = "tessera_fetch_ms";

type FetchOutcome = Result<ResourceValue, ResourceError>;

/// Reusable fetch closure; the registry keeps one per key so
/// invalidation can refetch without the original caller.
pub type Fetcher =
    Arc<dyn Fn() -> BoxFuture<'static, FetchOutcome> + Send + Sync>;

/// Per-key fetch behavior supplied by the resource services.
#[derive(Clone)]
pub struct FetchPlan {
    pub fetcher: Fetcher,
    pub stale_after: Duration,
    /// A disabled plan leaves the entry untouched on every path.
    pub enabled: bool,
}

impl FetchPlan {
    pub fn new(fetcher: Fetcher, stale_after: Duration) -> Self {
        Self {
            fetcher,
            stale_after,
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Clone)]
struct InflightFetch {
    request: RequestId,
    rx: watch::Receiver<Option<FetchOutcome>>,
}

/// Resolves "give me the data for key K" with dedup, staleness, retry,
/// and fencing.
pub struct QueryExecutor {
    config: CacheConfig,
    store: Arc<CacheStore>,
    clock: Arc<dyn Clock>,
    request_counter: AtomicU64,
    inflight: Arc<DashMap<ResourceKey, InflightFetch>>,
    plans: DashMap<ResourceKey, FetchPlan>,
}

impl QueryExecutor {
    pub fn new(config: CacheConfig, store: Arc<CacheStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            store,
            clock,
            request_counter: AtomicU64::new(0),
            inflight: Arc::new(DashMap::new()),
            plans: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Resolve the freshest value for `key`, fetching if needed.
    ///
    /// Registers `plan` for later refetches. Returns `Ok(None)` only for
    /// a disabled plan with nothing cached; every other path yields data
    /// or a surfaced error.
    pub async fn ensure(
        &self,
        key: &ResourceKey,
        plan: FetchPlan,
    ) -> Result<Option<ResourceValue>, ResourceError> {
        self.plans.insert(key.clone(), plan.clone());

        if !plan.enabled {
            return Ok(self.store.get(key).and_then(|entry| entry.data));
        }

        if let Some(entry) = self.store.get(key) {
            if entry.is_fresh(self.clock.now()) {
                counter!(METRIC_FETCH_HIT).increment(1);
                return Ok(entry.data);
            }
        }

        counter!(METRIC_FETCH_MISS).increment(1);
        let rx = self.attach_or_start(key, &plan);
        Self::await_outcome(rx).await.map(Some)
    }

    /// Best currently-available snapshot; never suspends.
    ///
    /// A stale or absent entry with a registered plan gets a background
    /// refresh; the caller still receives the old snapshot immediately.
    pub fn peek(&self, key: &ResourceKey) -> Option<CacheEntry> {
        let entry = self.store.get(key);
        let fresh = entry
            .as_ref()
            .map(|e| e.is_fresh(self.clock.now()))
            .unwrap_or(false);

        if !fresh && !self.inflight.contains_key(key) {
            if let Some(plan) = self.plan_for(key) {
                let _ = self.attach_or_start(key, &plan);
            }
        }
        entry
    }

    /// Force a refetch through the registered plan, superseding any
    /// in-flight fetch for the key.
    ///
    /// Returns false when no enabled plan is registered; the staleness
    /// flag then keeps the entry due for refresh on its next read.
    pub fn refetch(&self, key: &ResourceKey) -> bool {
        let Some(plan) = self.plan_for(key) else {
            return false;
        };
        self.start_fetch(key, &plan);
        true
    }

    pub fn has_plan(&self, key: &ResourceKey) -> bool {
        self.plan_for(key).is_some()
    }

    fn plan_for(&self, key: &ResourceKey) -> Option<FetchPlan> {
        self.plans
            .get(key)
            .map(|plan| plan.clone())
            .filter(|plan| plan.enabled)
    }

    /// Attach to the in-flight fetch for `key`, or start one.
    ///
    /// The dashmap entry guard makes the check-and-insert atomic, which
    /// is the dedup invariant: N concurrent callers, one fetch.
    fn attach_or_start(
        &self,
        key: &ResourceKey,
        plan: &FetchPlan,
    ) -> watch::Receiver<Option<FetchOutcome>> {
        match self.inflight.entry(key.clone()) {
            Entry::Occupied(occupied) => {
                counter!(METRIC_FETCH_ATTACH).increment(1);
                occupied.get().rx.clone()
            }
            Entry::Vacant(vacant) => {
                let (request, tx, rx) = self.register_fetch(vacant);
                self.launch(key, plan, request, tx);
                rx
            }
        }
    }

    /// Start a fetch unconditionally, replacing any in-flight one.
    fn start_fetch(&self, key: &ResourceKey, plan: &FetchPlan) {
        let request = self.request_counter.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = watch::channel(None);
        self.inflight
            .insert(key.clone(), InflightFetch { request, rx });
        self.launch(key, plan, request, tx);
    }

    fn register_fetch(
        &self,
        vacant: dashmap::mapref::entry::VacantEntry<'_, ResourceKey, InflightFetch>,
    ) -> (
        RequestId,
        watch::Sender<Option<FetchOutcome>>,
        watch::Receiver<Option<FetchOutcome>>,
    ) {
        let request = self.request_counter.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = watch::channel(None);
        vacant.insert(InflightFetch {
            request,
            rx: rx.clone(),
        });
        (request, tx, rx)
    }

    /// Transition the entry to `Loading` (previous data stays visible),
    /// stamp the fencing id, and spawn the fetch task.
    fn launch(
        &self,
        key: &ResourceKey,
        plan: &FetchPlan,
        request: RequestId,
        tx: watch::Sender<Option<FetchOutcome>>,
    ) {
        let stale_after = plan.stale_after;
        self.store.modify(key, |slot| {
            let mut entry = slot.take().unwrap_or_else(|| CacheEntry::idle(stale_after));
            entry.status = EntryStatus::Loading;
            entry.stale_after = stale_after;
            entry.inflight_request = Some(request);
            *slot = Some(entry);
        });

        tokio::spawn(run_fetch(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            Arc::clone(&self.inflight),
            self.config.clone(),
            key.clone(),
            request,
            Arc::clone(&plan.fetcher),
            tx,
        ));
    }

    async fn await_outcome(
        mut rx: watch::Receiver<Option<FetchOutcome>>,
    ) -> Result<ResourceValue, ResourceError> {
        loop {
            if let Some(outcome) = rx.borrow().clone() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                // Sender dropped without an outcome: the fetch task died
                return Err(ResourceError::transient("fetch task aborted"));
            }
        }
    }
}

/// The spawned fetch: retry loop, list-kind 404 normalization, fenced
/// application to the store, waiter wake-up.
#[allow(clippy::too_many_arguments)]
async fn run_fetch(
    store: Arc<CacheStore>,
    clock: Arc<dyn Clock>,
    inflight: Arc<DashMap<ResourceKey, InflightFetch>>,
    config: CacheConfig,
    key: ResourceKey,
    request: RequestId,
    fetcher: Fetcher,
    tx: watch::Sender<Option<FetchOutcome>>,
) {
    let started_at = Instant::now();
    let backoff = config.backoff();
    let mut attempt: u32 = 0;

    let outcome = loop {
        match fetcher().await {
            Ok(value) => break Ok(value),
            Err(err @ ResourceError::NotFound { .. }) if key.kind().is_list_shaped() => {
                // Absent list resources read as empty, not as failures
                match ResourceValue::empty_for(key.kind()) {
                    Some(empty) => break Ok(empty),
                    None => break Err(err),
                }
            }
            Err(err) if err.is_retryable() && attempt < config.retry_limit => {
                counter!(METRIC_FETCH_RETRY).increment(1);
                warn!(key = %key, attempt, error = %err, "Fetch failed, retrying");
                tokio::time::sleep(backoff.delay(attempt)).await;
                attempt += 1;
            }
            Err(err) => break Err(err),
        }
    };

    let applied = store.modify(&key, |slot| match slot {
        Some(entry) if entry.inflight_request != Some(request) => false,
        _ => {
            let stale_after = slot
                .as_ref()
                .map(|entry| entry.stale_after)
                .unwrap_or_else(|| store.config().default_stale_after());
            let mut entry = slot.take().unwrap_or_else(|| CacheEntry::idle(stale_after));
            match &outcome {
                Ok(value) => {
                    entry.status = EntryStatus::Success;
                    entry.data = Some(value.clone());
                    entry.error = None;
                    entry.last_updated_at = Some(clock.now());
                    entry.stale = false;
                }
                Err(err) => {
                    entry.status = EntryStatus::Error;
                    entry.error = Some(err.clone());
                }
            }
            entry.inflight_request = None;
            *slot = Some(entry);
            true
        }
    });

    if !applied {
        counter!(METRIC_FETCH_FENCED).increment(1);
        debug!(key = %key, request, "Discarding superseded fetch result");
    }

    inflight.remove_if(&key, |_, running| running.request == request);
    histogram!(METRIC_FETCH_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
    let _ = tx.send(Some(outcome));
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use time::macros::datetime;

    use super::*;
    use crate::infra::clock::ManualClock;

    fn harness() -> (Arc<CacheStore>, Arc<ManualClock>, QueryExecutor) {
        let config = CacheConfig::default();
        let store = Arc::new(CacheStore::new(config.clone()));
        let clock = ManualClock::new(datetime!(2025-06-01 12:00 UTC));
        let query = QueryExecutor::new(config, Arc::clone(&store), clock.clone());
        (store, clock, query)
    }

    fn counting_fetcher(
        calls: &Arc<AtomicUsize>,
        result: FetchOutcome,
    ) -> Fetcher {
        let calls = Arc::clone(calls);
        Arc::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            let result = result.clone();
            Box::pin(async move { result })
        })
    }

    #[tokio::test]
    async fn fetch_populates_the_store() {
        let (store, _, query) = harness();
        let key = ResourceKey::comments("pub-1");
        let calls = Arc::new(AtomicUsize::new(0));

        let plan = FetchPlan::new(
            counting_fetcher(&calls, Ok(ResourceValue::Comments(Vec::new()))),
            Duration::seconds(30),
        );

        let value = query.ensure(&key, plan).await.expect("fetch ok");
        assert_eq!(value, Some(ResourceValue::Comments(Vec::new())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let entry = store.get(&key).expect("entry cached");
        assert_eq!(entry.status, EntryStatus::Success);
        assert!(entry.inflight_request.is_none());
    }

    #[tokio::test]
    async fn fresh_entry_skips_the_network() {
        let (_, _, query) = harness();
        let key = ResourceKey::comments("pub-1");
        let calls = Arc::new(AtomicUsize::new(0));

        let plan = FetchPlan::new(
            counting_fetcher(&calls, Ok(ResourceValue::Comments(Vec::new()))),
            Duration::seconds(30),
        );

        query.ensure(&key, plan.clone()).await.expect("first fetch");
        query.ensure(&key, plan).await.expect("cached read");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_entry_refetches() {
        let (_, clock, query) = harness();
        let key = ResourceKey::comments("pub-1");
        let calls = Arc::new(AtomicUsize::new(0));

        let plan = FetchPlan::new(
            counting_fetcher(&calls, Ok(ResourceValue::Comments(Vec::new()))),
            Duration::seconds(30),
        );

        query.ensure(&key, plan.clone()).await.expect("first fetch");
        clock.advance(Duration::seconds(31));
        query.ensure(&key, plan).await.expect("stale refetch");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_reads_share_one_fetch() {
        let (_, _, query) = harness();
        let key = ResourceKey::payment_history("u-9");
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_inner = Arc::clone(&calls);
        let fetcher: Fetcher = Arc::new(move || {
            calls_inner.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                tokio::task::yield_now().await;
                Ok(ResourceValue::PaymentHistory(Vec::new()))
            })
        });
        let plan = FetchPlan::new(fetcher, Duration::seconds(30));

        let (a, b, c) = tokio::join!(
            query.ensure(&key, plan.clone()),
            query.ensure(&key, plan.clone()),
            query.ensure(&key, plan.clone()),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for outcome in [a, b, c] {
            assert_eq!(
                outcome.expect("fetch ok"),
                Some(ResourceValue::PaymentHistory(Vec::new()))
            );
        }
    }

    #[tokio::test]
    async fn disabled_plan_is_a_no_op() {
        let (store, _, query) = harness();
        let key = ResourceKey::comments("pub-1");
        let calls = Arc::new(AtomicUsize::new(0));

        let plan = FetchPlan::new(
            counting_fetcher(&calls, Ok(ResourceValue::Comments(Vec::new()))),
            Duration::seconds(30),
        )
        .disabled();

        let value = query.ensure(&key, plan).await.expect("no-op");
        assert_eq!(value, None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(store.get(&key).is_none());
    }

    #[tokio::test]
    async fn not_found_normalizes_to_empty_list() {
        let (_, _, query) = harness();
        let key = ResourceKey::payment_history("u-new");
        let calls = Arc::new(AtomicUsize::new(0));

        let plan = FetchPlan::new(
            counting_fetcher(&calls, Err(ResourceError::not_found("no history"))),
            Duration::seconds(30),
        );

        let value = query.ensure(&key, plan).await.expect("normalized");
        assert_eq!(value, Some(ResourceValue::PaymentHistory(Vec::new())));
    }

    #[tokio::test]
    async fn not_found_surfaces_for_singleton_kinds() {
        let (_, _, query) = harness();
        let key = ResourceKey::subscription("u-9");
        let calls = Arc::new(AtomicUsize::new(0));

        let plan = FetchPlan::new(
            counting_fetcher(&calls, Err(ResourceError::not_found("no subscription"))),
            Duration::seconds(30),
        );

        let err = query.ensure(&key, plan).await.expect_err("surfaced");
        assert_eq!(err.kind_str(), "not_found");
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_retry_with_backoff_then_surface() {
        let (store, _, query) = harness();
        let key = ResourceKey::comments("pub-1");
        let calls = Arc::new(AtomicUsize::new(0));

        let plan = FetchPlan::new(
            counting_fetcher(&calls, Err(ResourceError::transient("connection refused"))),
            Duration::seconds(30),
        );

        let err = query.ensure(&key, plan).await.expect_err("exhausted");
        assert_eq!(err.kind_str(), "transient");
        // Initial attempt plus the configured retries
        assert_eq!(
            calls.load(Ordering::SeqCst) as u32,
            CacheConfig::default().retry_limit + 1
        );

        let entry = store.get(&key).expect("entry recorded");
        assert_eq!(entry.status, EntryStatus::Error);

        // No further automatic retry until an explicit request
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        assert_eq!(
            calls.load(Ordering::SeqCst) as u32,
            CacheConfig::default().retry_limit + 1
        );
    }

    #[tokio::test]
    async fn rejected_errors_do_not_retry() {
        let (_, _, query) = harness();
        let key = ResourceKey::comments("pub-1");
        let calls = Arc::new(AtomicUsize::new(0));

        let plan = FetchPlan::new(
            counting_fetcher(&calls, Err(ResourceError::rejected("banned", None))),
            Duration::seconds(30),
        );

        query.ensure(&key, plan).await.expect_err("no retry");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refetch_supersedes_inflight_fetch() {
        let (store, _, query) = harness();
        let key = ResourceKey::comments("pub-1");

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));

        // Slow fetch A: parks until released, returns the old list
        let slow: Fetcher = {
            let release_rx = Arc::clone(&release_rx);
            Arc::new(move || {
                let release_rx = Arc::clone(&release_rx);
                Box::pin(async move {
                    let rx = release_rx.lock().await.take();
                    if let Some(rx) = rx {
                        let _ = rx.await;
                    }
                    Ok(ResourceValue::Comments(vec![]))
                })
            })
        };

        let sample = crate::domain::records::CommentRecord {
            id: crate::domain::types::CommentId::Server("c-1".to_string()),
            publication_id: "pub-1".to_string(),
            author: "ada".to_string(),
            body: "newer".to_string(),
            created_at: datetime!(2025-06-01 12:00 UTC),
        };
        let fast_value = ResourceValue::Comments(vec![sample]);

        // Kick off A without awaiting its outcome
        let plan_a = FetchPlan::new(slow, Duration::seconds(30));
        query.plans.insert(key.clone(), plan_a.clone());
        let rx_a = query.attach_or_start(&key, &plan_a);

        // Supersede with B, which completes first
        let calls_b = Arc::new(AtomicUsize::new(0));
        let plan_b = FetchPlan::new(
            counting_fetcher(&calls_b, Ok(fast_value.clone())),
            Duration::seconds(30),
        );
        query.plans.insert(key.clone(), plan_b);
        assert!(query.refetch(&key));

        // Let B land, then release A and wait for its (discarded) outcome
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(calls_b.load(Ordering::SeqCst), 1);
        let _ = release_tx.send(());
        let outcome_a = QueryExecutor::await_outcome(rx_a).await;
        assert!(outcome_a.is_ok());

        let entry = store.get(&key).expect("entry cached");
        assert_eq!(entry.status, EntryStatus::Success);
        assert_eq!(entry.data, Some(fast_value));
    }

    #[tokio::test]
    async fn peek_returns_snapshot_and_spawns_refresh() {
        let (store, clock, query) = harness();
        let key = ResourceKey::comments("pub-1");
        let calls = Arc::new(AtomicUsize::new(0));

        let plan = FetchPlan::new(
            counting_fetcher(&calls, Ok(ResourceValue::Comments(Vec::new()))),
            Duration::seconds(30),
        );

        assert!(query.peek(&key).is_none());

        query.ensure(&key, plan).await.expect("first fetch");
        clock.advance(Duration::seconds(31));

        // Stale snapshot is still served synchronously
        let snapshot = query.peek(&key).expect("stale snapshot");
        assert_eq!(snapshot.data, Some(ResourceValue::Comments(Vec::new())));

        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn refetch_without_plan_reports_false() {
        let (_, _, query) = harness();
        assert!(!query.refetch(&ResourceKey::comments("pub-none")));
    }
}
