//! Keyed in-memory resource store.
//!
//! Pure state: no transport and no business knowledge. Every write path
//! in the crate (queries, mutations, invalidation, polling) funnels
//! through here, which is what keeps individual entry updates serialized
//! and torn reads impossible. Callers only ever receive clones.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use metrics::counter;
use time::OffsetDateTime;
use tracing::debug;

use crate::domain::error::ResourceError;
use crate::domain::records::ResourceValue;

use super::config::CacheConfig;
use super::entry::{CacheEntry, EntryStatus};
use super::keys::{KeyPattern, ResourceKey};
use super::lock::{read_guard, write_guard};

const METRIC_ENTRY_EVICT: &str = "tessera_cache_entry_evict_total";

/// Handle for removing a subscription.
pub type SubscriptionId = u64;

/// Callback invoked synchronously after a notifying write.
pub type SubscriberFn = Arc<dyn Fn(&ResourceKey, &CacheEntry) + Send + Sync>;

struct Subscriber {
    pattern: KeyPattern,
    callback: SubscriberFn,
}

/// Keyed table of cache entries with change-suppressed notification.
///
/// Entries are bounded by an LRU limit; subscribers register a
/// [`KeyPattern`] and fire only when an entry's observable state
/// (status, data, error) actually changed.
pub struct CacheStore {
    config: CacheConfig,
    entries: RwLock<LruCache<ResourceKey, CacheEntry>>,
    subscribers: RwLock<HashMap<SubscriptionId, Subscriber>>,
    subscription_counter: AtomicU64,
}

impl CacheStore {
    pub fn new(config: CacheConfig) -> Self {
        let limit = config.entry_limit_non_zero();
        Self {
            config,
            entries: RwLock::new(LruCache::new(limit)),
            subscribers: RwLock::new(HashMap::new()),
            subscription_counter: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Immediate snapshot of the entry, if cached. Never blocks on I/O.
    pub fn get(&self, key: &ResourceKey) -> Option<CacheEntry> {
        write_guard(&self.entries, "get").get(key).cloned()
    }

    /// Replace the entry wholesale.
    ///
    /// Subscribers are notified only when the observable state changed.
    pub fn set(&self, key: &ResourceKey, entry: CacheEntry) {
        self.modify(key, |slot| *slot = Some(entry));
    }

    /// Atomic read-modify-write of one entry slot.
    ///
    /// `None` in the slot means absent; leaving `None` behind removes the
    /// entry. The revision bump and subscriber notification happen here,
    /// after the write lock is released, so callbacks may re-enter the
    /// store.
    pub fn modify<R>(
        &self,
        key: &ResourceKey,
        f: impl FnOnce(&mut Option<CacheEntry>) -> R,
    ) -> R {
        let (result, notify) = {
            let mut entries = write_guard(&self.entries, "modify");
            let before = entries.peek(key).cloned();
            let mut slot = before.clone();
            let result = f(&mut slot);

            let notify = match (&before, &mut slot) {
                (None, None) => None,
                (Some(_), None) => {
                    entries.pop(key);
                    None
                }
                (before, Some(after)) => {
                    let changed = before
                        .as_ref()
                        .map(|b| !b.same_observable_state(after))
                        .unwrap_or(true);
                    if changed {
                        after.revision = before.as_ref().map(|b| b.revision + 1).unwrap_or(0);
                    } else if let Some(b) = before {
                        after.revision = b.revision;
                    }
                    let snapshot = changed.then(|| after.clone());
                    if let Some((evicted_key, _)) = entries.push(key.clone(), after.clone()) {
                        if evicted_key != *key {
                            counter!(METRIC_ENTRY_EVICT).increment(1);
                            debug!(key = %evicted_key, "Cache entry evicted");
                        }
                    }
                    snapshot
                }
            };
            (result, notify)
        };

        if let Some(entry) = notify {
            self.notify(key, &entry);
        }
        result
    }

    /// Shared success write path for fetches and polling.
    ///
    /// Keeps the entry's freshness window if one exists, otherwise uses
    /// the configured default.
    pub fn record_success(&self, key: &ResourceKey, value: ResourceValue, now: OffsetDateTime) {
        let default_window = self.config.default_stale_after();
        self.modify(key, |slot| {
            let mut entry = slot
                .take()
                .unwrap_or_else(|| CacheEntry::idle(default_window));
            entry.status = EntryStatus::Success;
            entry.data = Some(value);
            entry.error = None;
            entry.last_updated_at = Some(now);
            entry.stale = false;
            entry.inflight_request = None;
            *slot = Some(entry);
        });
    }

    /// Shared failure write path. Last-known data stays visible.
    pub fn record_error(&self, key: &ResourceKey, error: ResourceError) {
        let default_window = self.config.default_stale_after();
        self.modify(key, |slot| {
            let mut entry = slot
                .take()
                .unwrap_or_else(|| CacheEntry::idle(default_window));
            entry.status = EntryStatus::Error;
            entry.error = Some(error);
            entry.inflight_request = None;
            *slot = Some(entry);
        });
    }

    /// Flag matching entries stale without touching their data.
    ///
    /// Returns the keys whose flag actually transitioned, making repeat
    /// invalidation a no-op. Staleness is not an observable-state change,
    /// so no subscriber fires here.
    pub fn mark_stale(&self, pattern: &KeyPattern) -> Vec<ResourceKey> {
        let mut entries = write_guard(&self.entries, "mark_stale");
        let mut transitioned = Vec::new();
        for (key, entry) in entries.iter_mut() {
            if pattern.matches(key) && !entry.stale {
                entry.stale = true;
                transitioned.push(key.clone());
            }
        }
        transitioned
    }

    /// Register a callback for writes matching `pattern`.
    pub fn subscribe(&self, pattern: KeyPattern, callback: SubscriberFn) -> SubscriptionId {
        let id = self.subscription_counter.fetch_add(1, Ordering::SeqCst);
        write_guard(&self.subscribers, "subscribe")
            .insert(id, Subscriber { pattern, callback });
        id
    }

    /// Remove one subscription; the underlying operations keep running.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        write_guard(&self.subscribers, "unsubscribe")
            .remove(&id)
            .is_some()
    }

    pub fn has_subscriber(&self, key: &ResourceKey) -> bool {
        read_guard(&self.subscribers, "has_subscriber")
            .values()
            .any(|s| s.pattern.matches(key))
    }

    pub fn len(&self) -> usize {
        read_guard(&self.entries, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries. Subscriptions survive.
    pub fn clear(&self) {
        write_guard(&self.entries, "clear").clear();
    }

    fn notify(&self, key: &ResourceKey, entry: &CacheEntry) {
        let callbacks: Vec<SubscriberFn> = {
            let subscribers = read_guard(&self.subscribers, "notify");
            subscribers
                .values()
                .filter(|s| s.pattern.matches(key))
                .map(|s| Arc::clone(&s.callback))
                .collect()
        };
        for callback in callbacks {
            callback(key, entry);
        }
    }
}
