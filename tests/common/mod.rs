//! Shared test support: a scripted in-memory transport and portal wiring.

// Not every test binary uses every helper
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use time::macros::datetime;

use tessera::application::transport::{ResourceTransport, WriteRequest};
use tessera::cache::ResourceKey;
use tessera::config::Settings;
use tessera::domain::error::ResourceError;
use tessera::infra::clock::ManualClock;
use tessera::Portal;

type Step = Result<Value, ResourceError>;

/// A response script: each call consumes one step; the last step
/// repeats once the script is exhausted.
#[derive(Default)]
struct Script {
    steps: Vec<Step>,
    cursor: usize,
}

impl Script {
    fn next(&mut self) -> Step {
        if self.steps.is_empty() {
            return Err(ResourceError::invariant("no scripted response"));
        }
        let index = self.cursor.min(self.steps.len() - 1);
        self.cursor += 1;
        self.steps[index].clone()
    }
}

/// Scripted transport: per-key fetch scripts, one write script, one
/// status script, and call accounting for dedup assertions.
#[derive(Default)]
pub struct MockTransport {
    fetches: Mutex<HashMap<String, Script>>,
    writes: Mutex<Script>,
    statuses: Mutex<Script>,
    fetch_counts: Mutex<HashMap<String, usize>>,
    writes_seen: Mutex<Vec<WriteRequest>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_fetch(&self, key: &ResourceKey, step: Step) {
        self.fetches
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .steps
            .push(step);
    }

    pub fn script_write(&self, step: Step) {
        self.writes.lock().unwrap().steps.push(step);
    }

    pub fn script_status(&self, step: Step) {
        self.statuses.lock().unwrap().steps.push(step);
    }

    pub fn fetch_count(&self, key: &ResourceKey) -> usize {
        self.fetch_counts
            .lock()
            .unwrap()
            .get(&key.to_string())
            .copied()
            .unwrap_or(0)
    }

    pub fn writes_seen(&self) -> Vec<WriteRequest> {
        self.writes_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResourceTransport for MockTransport {
    async fn fetch(&self, key: &ResourceKey) -> Result<Value, ResourceError> {
        *self
            .fetch_counts
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_insert(0) += 1;
        self.fetches
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .next()
    }

    async fn write(&self, request: &WriteRequest) -> Result<Value, ResourceError> {
        self.writes_seen.lock().unwrap().push(request.clone());
        self.writes.lock().unwrap().next()
    }

    async fn check_status(&self, _transaction_id: &str) -> Result<Value, ResourceError> {
        self.statuses.lock().unwrap().next()
    }
}

/// A portal over a scripted transport and a manual clock.
pub fn portal(transport: Arc<MockTransport>) -> (Portal, Arc<ManualClock>) {
    let settings = Settings::default();
    let clock = ManualClock::new(datetime!(2025-06-01 12:00 UTC));
    let portal = Portal::new(&settings, transport, clock.clone());
    (portal, clock)
}

pub fn comment_json(id: &str, body: &str) -> Value {
    json!({
        "id": id,
        "publication_id": "pub-1",
        "author": "ada",
        "body": body,
        "created_at": "2025-06-01T12:00:00Z"
    })
}

pub fn notification_json(id: &str, read: bool) -> Value {
    json!({
        "id": id,
        "user_id": "u-9",
        "body": "Membership renewal due",
        "read": read,
        "created_at": "2025-06-01T12:00:00Z"
    })
}

pub fn subscription_json(phase: &str, transaction_id: Option<&str>) -> Value {
    json!({
        "id": "sub-7",
        "user_id": "u-9",
        "plan": "annual",
        "phase": phase,
        "transaction_id": transaction_id,
        "updated_at": "2025-06-01T12:00:00Z"
    })
}
