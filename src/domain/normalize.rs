//! Normalization of raw wire payloads into typed resource values.
//!
//! The transport hands over `serde_json::Value`; nothing untyped crosses
//! into the cache store. A payload that does not match the declared kind
//! is a contract violation surfaced as [`ResourceError::Decode`].

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::domain::error::ResourceError;
use crate::domain::records::{
    CommentRecord, NotificationRecord, PaymentRecord, ResourceValue, SubscriptionRecord,
};
use crate::domain::types::ResourceKind;

/// Parse a raw payload into the typed value for `kind`.
pub fn resource_value(kind: ResourceKind, payload: Value) -> Result<ResourceValue, ResourceError> {
    match kind {
        ResourceKind::Comments => {
            decode::<Vec<CommentRecord>>(kind, payload).map(ResourceValue::Comments)
        }
        ResourceKind::Notifications => {
            decode::<Vec<NotificationRecord>>(kind, payload).map(ResourceValue::Notifications)
        }
        ResourceKind::PaymentHistory => {
            decode::<Vec<PaymentRecord>>(kind, payload).map(ResourceValue::PaymentHistory)
        }
        ResourceKind::Subscription => {
            decode::<SubscriptionRecord>(kind, payload).map(ResourceValue::Subscription)
        }
    }
}

/// Parse a single record out of a mutation response.
pub fn record<T: DeserializeOwned>(context: &'static str, payload: Value) -> Result<T, ResourceError> {
    serde_json::from_value(payload)
        .map_err(|err| ResourceError::decode(format!("{context}: {err}")))
}

fn decode<T: DeserializeOwned>(kind: ResourceKind, payload: Value) -> Result<T, ResourceError> {
    serde_json::from_value(payload)
        .map_err(|err| ResourceError::decode(format!("{} payload: {err}", kind.as_str())))
}
