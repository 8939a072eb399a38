//! Cache entry state.

use time::{Duration, OffsetDateTime};

use crate::domain::error::ResourceError;
use crate::domain::records::ResourceValue;

/// Identifier for one fetch attempt, used for request fencing.
///
/// Monotonic within a process; a completed fetch whose id no longer
/// matches the entry's `inflight_request` has been superseded and its
/// result is discarded.
pub type RequestId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Idle,
    Loading,
    Success,
    Error,
}

/// One cached resource instance.
///
/// The previous `data` stays visible while a refetch is in flight, so a
/// `Loading` entry can still render last-known state.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub status: EntryStatus,
    pub data: Option<ResourceValue>,
    pub error: Option<ResourceError>,
    pub last_updated_at: Option<OffsetDateTime>,
    pub stale_after: Duration,
    /// Invalidation override: treat `stale_after` as already elapsed.
    pub stale: bool,
    pub inflight_request: Option<RequestId>,
    /// Bumped by the store only when the observable state changed.
    pub revision: u64,
}

impl CacheEntry {
    pub fn idle(stale_after: Duration) -> Self {
        Self {
            status: EntryStatus::Idle,
            data: None,
            error: None,
            last_updated_at: None,
            stale_after,
            stale: false,
            inflight_request: None,
            revision: 0,
        }
    }

    /// Whether the entry can be served without a refetch.
    pub fn is_fresh(&self, now: OffsetDateTime) -> bool {
        if self.status != EntryStatus::Success || self.stale {
            return false;
        }
        match self.last_updated_at {
            Some(at) => now - at <= self.stale_after,
            None => false,
        }
    }

    /// Structural comparison of what subscribers can observe.
    ///
    /// `stale`, timestamps, and fencing bookkeeping are deliberately
    /// excluded: they change without the rendered state changing.
    pub fn same_observable_state(&self, other: &CacheEntry) -> bool {
        self.status == other.status && self.data == other.data && self.error == other.error
    }
}
