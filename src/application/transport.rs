//! Transport port.
//!
//! The core consumes exactly three capabilities from the surrounding
//! portal: fetch a resource, perform a write, probe an asynchronous
//! process. Payloads cross this boundary as raw JSON and are normalized
//! into typed records before touching the cache.

use async_trait::async_trait;
use serde_json::Value;

use crate::cache::ResourceKey;
use crate::domain::error::ResourceError;

/// A remote write the portal knows how to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteRequest {
    CreateComment {
        publication_id: String,
        author: String,
        body: String,
    },
    MarkNotificationRead {
        user_id: String,
        notification_id: String,
    },
    CreateSubscription {
        user_id: String,
        plan: String,
    },
}

#[async_trait]
pub trait ResourceTransport: Send + Sync {
    /// Read the resource the key names.
    async fn fetch(&self, key: &ResourceKey) -> Result<Value, ResourceError>;

    /// Perform a remote write; the response is the authoritative record.
    async fn write(&self, request: &WriteRequest) -> Result<Value, ResourceError>;

    /// Probe the settlement status of an asynchronous transaction.
    async fn check_status(&self, transaction_id: &str) -> Result<Value, ResourceError>;
}
