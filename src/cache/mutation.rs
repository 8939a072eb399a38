//! Mutation execution: optimistic local edits around remote writes.
//!
//! A mutation snapshots its targets, applies the optimistic edit, runs
//! the remote write, then either merges the server's authoritative
//! response or restores the snapshots verbatim. Mutations on the same
//! key are serialized FIFO on a per-key async mutex, so each rollback
//! restores exactly the state that mutation overwrote.
//!
//! Mutations are never retried automatically; they are not idempotent
//! by default and retry is the caller's decision.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use metrics::counter;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::domain::error::ResourceError;
use crate::domain::records::ResourceValue;
use crate::infra::clock::Clock;

use super::entry::{CacheEntry, EntryStatus};
use super::invalidation::InvalidationBus;
use super::keys::{KeyPattern, ResourceKey};
use super::store::CacheStore;

const METRIC_MUTATION_COMMIT: &str = "tessera_mutation_commit_total";
const METRIC_MUTATION_ROLLBACK: &str = "tessera_mutation_rollback_total";

/// Optimistic edit: current data in, next data out. Pure.
pub type OptimisticFn =
    Box<dyn FnOnce(Option<ResourceValue>) -> ResourceValue + Send>;

/// Authoritative merge: current (optimistic) data plus the server
/// response in, confirmed data out. Pure.
pub type ConfirmedFn<R> =
    Box<dyn FnOnce(Option<ResourceValue>, &R) -> ResourceValue + Send>;

/// One key touched by a mutation.
pub struct MutationTarget<R> {
    pub key: ResourceKey,
    pub apply_optimistic: OptimisticFn,
    pub apply_confirmed: ConfirmedFn<R>,
}

/// A complete mutation: targets, the remote write, and the aggregate
/// keys to invalidate once the write is confirmed.
pub struct MutationPlan<R> {
    pub targets: Vec<MutationTarget<R>>,
    pub remote: BoxFuture<'static, Result<R, ResourceError>>,
    pub invalidate: Vec<KeyPattern>,
}

/// Performs remote writes while keeping the UI responsive through
/// optimistic local state.
pub struct MutationExecutor {
    store: Arc<CacheStore>,
    bus: Arc<InvalidationBus>,
    clock: Arc<dyn Clock>,
    key_locks: DashMap<ResourceKey, Arc<Mutex<()>>>,
    pending: DashMap<ResourceKey, usize>,
}

impl MutationExecutor {
    pub fn new(
        store: Arc<CacheStore>,
        bus: Arc<InvalidationBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            bus,
            clock,
            key_locks: DashMap::new(),
            pending: DashMap::new(),
        }
    }

    /// Number of unsettled mutations touching `key`, for UI spinners.
    ///
    /// Optimistic entries are shaped exactly like confirmed ones; this
    /// counter is the only way to tell a write is still in flight.
    pub fn pending(&self, key: &ResourceKey) -> usize {
        self.pending.get(key).map(|count| *count).unwrap_or(0)
    }

    /// Run a mutation to settlement. Returns the server response on
    /// commit, the surfaced error on rollback.
    pub async fn mutate<R: Send + 'static>(
        &self,
        plan: MutationPlan<R>,
    ) -> Result<R, ResourceError> {
        let MutationPlan {
            targets,
            remote,
            invalidate,
        } = plan;

        let mut keys: Vec<ResourceKey> = targets.iter().map(|t| t.key.clone()).collect();
        keys.sort();
        let unique = keys.windows(2).all(|pair| pair[0] != pair[1]);
        if !unique {
            return Err(ResourceError::invariant(
                "mutation targets must name distinct keys",
            ));
        }

        // Sorted acquisition order keeps multi-key mutations deadlock-free
        let _guards = self.acquire_locks(&keys).await;

        let snapshots: Vec<(ResourceKey, Option<CacheEntry>)> = keys
            .iter()
            .map(|key| (key.clone(), self.store.get(key)))
            .collect();

        let now = self.clock.now();
        let mut confirms: Vec<(ResourceKey, ConfirmedFn<R>)> = Vec::with_capacity(targets.len());
        for target in targets {
            self.apply_optimistic(&target.key, target.apply_optimistic, now);
            self.pending_add(&target.key, 1);
            confirms.push((target.key, target.apply_confirmed));
        }

        let result = remote.await;

        match result {
            Ok(response) => {
                let now = self.clock.now();
                for (key, confirm) in confirms {
                    self.apply_confirmed(&key, confirm, &response, now);
                    self.pending_add(&key, -1);
                }
                counter!(METRIC_MUTATION_COMMIT).increment(1);
                self.bus.invalidate_all(&invalidate);
                Ok(response)
            }
            Err(err) => {
                for (key, snapshot) in snapshots {
                    self.store.modify(&key, |slot| *slot = snapshot);
                    self.pending_add(&key, -1);
                }
                counter!(METRIC_MUTATION_ROLLBACK).increment(1);
                warn!(error = %err, "Mutation failed, optimistic state rolled back");
                Err(err)
            }
        }
    }

    async fn acquire_locks(&self, keys: &[ResourceKey]) -> Vec<OwnedMutexGuard<()>> {
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let lock = self
                .key_locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            guards.push(lock.lock_owned().await);
        }
        guards
    }

    fn apply_optimistic(&self, key: &ResourceKey, edit: OptimisticFn, now: OffsetDateTime) {
        let default_window = self.store.config().default_stale_after();
        self.store.modify(key, |slot| {
            let mut entry = slot
                .take()
                .unwrap_or_else(|| CacheEntry::idle(default_window));
            let next = edit(entry.data.take());
            entry.status = EntryStatus::Success;
            entry.data = Some(next);
            entry.error = None;
            entry.last_updated_at = Some(now);
            entry.stale = false;
            *slot = Some(entry);
        });
        debug!(key = %key, "Optimistic edit applied");
    }

    fn apply_confirmed<R>(
        &self,
        key: &ResourceKey,
        confirm: ConfirmedFn<R>,
        response: &R,
        now: OffsetDateTime,
    ) {
        let default_window = self.store.config().default_stale_after();
        self.store.modify(key, |slot| {
            let mut entry = slot
                .take()
                .unwrap_or_else(|| CacheEntry::idle(default_window));
            let next = confirm(entry.data.take(), response);
            entry.status = EntryStatus::Success;
            entry.data = Some(next);
            entry.error = None;
            entry.last_updated_at = Some(now);
            entry.stale = false;
            *slot = Some(entry);
        });
    }

    fn pending_add(&self, key: &ResourceKey, delta: isize) {
        let drained = {
            let mut count = self.pending.entry(key.clone()).or_insert(0);
            *count = count.saturating_add_signed(delta);
            *count == 0
        };
        if drained {
            self.pending.remove_if(key, |_, count| *count == 0);
        }
    }
}
