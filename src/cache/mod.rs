//! Tessera cache and synchronization core.
//!
//! Five cooperating pieces, leaves first:
//!
//! - **store** — keyed in-memory entries, subscriber notification
//! - **query** — deduplicated, retryable, fenced fetches
//! - **mutation** — optimistic edits with commit-or-rollback
//! - **invalidation** — staleness fanout to dependent entries
//! - **poll** — verification of asynchronous external processes
//!
//! Construction is explicit: build a [`CacheStore`], hand it to the
//! executors, keep the pieces in [`crate::application::portal::Portal`]
//! or your own wiring. There is no global instance.

mod config;
mod entry;
mod invalidation;
mod keys;
mod lock;
mod mutation;
mod poll;
mod query;
mod store;

pub use config::CacheConfig;
pub use entry::{CacheEntry, EntryStatus, RequestId};
pub use invalidation::InvalidationBus;
pub use keys::{KeyPattern, ResourceKey};
pub use mutation::{
    ConfirmedFn, MutationExecutor, MutationPlan, MutationTarget, OptimisticFn,
};
pub use poll::{
    PollPolicy, PollSession, PollState, PollVerdict, PollingVerifier, Probe, VerdictFn,
};
pub use query::{FetchPlan, Fetcher, QueryExecutor};
pub use store::{CacheStore, SubscriberFn, SubscriptionId};
