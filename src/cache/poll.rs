//! Polling verification of asynchronous server-side processes.
//!
//! A payment settles whenever the provider gets around to it; the portal
//! finds out by asking. `PollSession` is the explicit state machine for
//! that loop: probe on an interval, stop on a terminal verdict, give up
//! at the deadline, tolerate a bounded run of transient probe errors.
//!
//! Terminal results land in the cache store through the same success
//! path the query executor uses, so subscribers see them like any other
//! write. A deadline expiry publishes the last observed pending value —
//! "still pending, check back later" is an answer, not an error.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use metrics::counter;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::domain::error::ResourceError;
use crate::domain::records::ResourceValue;
use crate::infra::clock::Clock;

use super::keys::ResourceKey;
use super::store::CacheStore;

const METRIC_POLL_TICK: &str = "tessera_poll_tick_total";
const METRIC_POLL_ERROR: &str = "tessera_poll_error_total";

/// Where a poll session ended up. `Pending` never escapes a running
/// session; terminal states have no outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Pending,
    Succeeded,
    Failed,
    TimedOut,
}

/// Terminal judgement over a probed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollVerdict {
    Succeeded,
    Failed,
}

/// Status probe; one remote round-trip per call.
pub type Probe =
    Arc<dyn Fn() -> BoxFuture<'static, Result<ResourceValue, ResourceError>> + Send + Sync>;

/// Judges a probed value: `None` means still pending.
pub type VerdictFn = Arc<dyn Fn(&ResourceValue) -> Option<PollVerdict> + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    /// Delay between consecutive probes.
    pub interval: Duration,
    /// Total budget; the session times out once this elapses.
    pub deadline: Duration,
    /// Probe errors tolerated in a row before the session fails.
    pub max_consecutive_errors: u32,
}

/// One verification run against one external process.
pub struct PollSession {
    /// Entry the terminal result is published to.
    pub key: ResourceKey,
    pub probe: Probe,
    pub verdict: VerdictFn,
    pub policy: PollPolicy,
}

/// Drives poll sessions to a terminal state.
pub struct PollingVerifier {
    store: Arc<CacheStore>,
    clock: Arc<dyn Clock>,
}

impl PollingVerifier {
    pub fn new(store: Arc<CacheStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Run the session to completion and return its terminal state.
    pub async fn verify(&self, session: PollSession) -> PollState {
        run_session(Arc::clone(&self.store), Arc::clone(&self.clock), session).await
    }

    /// Run the session in the background; the result still reaches the
    /// store even if the handle is dropped.
    pub fn spawn(&self, session: PollSession) -> tokio::task::JoinHandle<PollState> {
        let store = Arc::clone(&self.store);
        let clock = Arc::clone(&self.clock);
        tokio::spawn(run_session(store, clock, session))
    }
}

async fn run_session(
    store: Arc<CacheStore>,
    clock: Arc<dyn Clock>,
    session: PollSession,
) -> PollState {
    let deadline_at = Instant::now() + session.policy.deadline;
    let mut consecutive_errors: u32 = 0;
    let mut last_observed: Option<ResourceValue> = None;

    loop {
        counter!(METRIC_POLL_TICK).increment(1);
        match (session.probe)().await {
            Ok(value) => {
                consecutive_errors = 0;
                if let Some(verdict) = (session.verdict)(&value) {
                    store.record_success(&session.key, value, clock.now());
                    let state = match verdict {
                        PollVerdict::Succeeded => PollState::Succeeded,
                        PollVerdict::Failed => PollState::Failed,
                    };
                    info!(key = %session.key, state = ?state, "Poll session reached terminal status");
                    return state;
                }
                last_observed = Some(value);
            }
            Err(err) => {
                consecutive_errors += 1;
                counter!(METRIC_POLL_ERROR).increment(1);
                warn!(
                    key = %session.key,
                    consecutive_errors,
                    error = %err,
                    "Poll probe failed"
                );
                if consecutive_errors > session.policy.max_consecutive_errors {
                    store.record_error(&session.key, err);
                    return PollState::Failed;
                }
            }
        }

        // The next probe must not start past the deadline
        let now = Instant::now();
        if now >= deadline_at {
            return timed_out(&store, &clock, &session, last_observed);
        }
        tokio::select! {
            // Deadline wins when both timers land on the same instant
            biased;
            _ = tokio::time::sleep_until(deadline_at) => {
                return timed_out(&store, &clock, &session, last_observed);
            }
            _ = tokio::time::sleep(session.policy.interval) => {}
        }
    }
}

/// Inconclusive is not failure: publish the last pending observation so
/// the UI can say "still pending, check back later".
fn timed_out(
    store: &CacheStore,
    clock: &Arc<dyn Clock>,
    session: &PollSession,
    last_observed: Option<ResourceValue>,
) -> PollState {
    if let Some(value) = last_observed {
        store.record_success(&session.key, value, clock.now());
    }
    info!(key = %session.key, "Poll session timed out while still pending");
    PollState::TimedOut
}
