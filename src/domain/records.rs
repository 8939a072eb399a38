//! Domain records mirrored from the portal's REST payloads.
//!
//! Records derive `PartialEq` because the cache store suppresses
//! subscriber notification by structural comparison.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::types::{CommentId, ResourceKind, SubscriptionPhase};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: CommentId,
    pub publication_id: String,
    pub author: String,
    pub body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub user_id: String,
    pub body: String,
    pub read: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: String,
    pub user_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub settled_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub id: Option<String>,
    pub user_id: String,
    pub plan: String,
    pub phase: SubscriptionPhase,
    pub transaction_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Count of unread notifications in a list.
///
/// Derived on demand rather than cached separately; invalidating the
/// notifications kind is enough to keep it honest.
pub fn unread_count(notifications: &[NotificationRecord]) -> usize {
    notifications.iter().filter(|n| !n.read).count()
}

/// Tagged union of everything the cache store may hold.
///
/// One variant per resource kind; the store never sees raw wire payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceValue {
    Comments(Vec<CommentRecord>),
    Notifications(Vec<NotificationRecord>),
    PaymentHistory(Vec<PaymentRecord>),
    Subscription(SubscriptionRecord),
}

impl ResourceValue {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Comments(_) => ResourceKind::Comments,
            Self::Notifications(_) => ResourceKind::Notifications,
            Self::PaymentHistory(_) => ResourceKind::PaymentHistory,
            Self::Subscription(_) => ResourceKind::Subscription,
        }
    }

    /// The empty value for a list-shaped kind, `None` for singletons.
    pub fn empty_for(kind: ResourceKind) -> Option<Self> {
        match kind {
            ResourceKind::Comments => Some(Self::Comments(Vec::new())),
            ResourceKind::Notifications => Some(Self::Notifications(Vec::new())),
            ResourceKind::PaymentHistory => Some(Self::PaymentHistory(Vec::new())),
            ResourceKind::Subscription => None,
        }
    }

    pub fn as_comments(&self) -> Option<&[CommentRecord]> {
        match self {
            Self::Comments(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_notifications(&self) -> Option<&[NotificationRecord]> {
        match self {
            Self::Notifications(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_payment_history(&self) -> Option<&[PaymentRecord]> {
        match self {
            Self::PaymentHistory(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_subscription(&self) -> Option<&SubscriptionRecord> {
        match self {
            Self::Subscription(record) => Some(record),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn sample_notification(id: &str, read: bool) -> NotificationRecord {
        NotificationRecord {
            id: id.to_string(),
            user_id: "u-9".to_string(),
            body: "Renewal due".to_string(),
            read,
            created_at: datetime!(2025-06-01 12:00 UTC),
        }
    }

    #[test]
    fn unread_count_ignores_read_entries() {
        let list = vec![
            sample_notification("n-1", false),
            sample_notification("n-2", true),
            sample_notification("n-3", false),
        ];
        assert_eq!(unread_count(&list), 2);
        assert_eq!(unread_count(&[]), 0);
    }

    #[test]
    fn value_reports_its_kind() {
        assert_eq!(
            ResourceValue::Comments(Vec::new()).kind(),
            ResourceKind::Comments
        );
        assert_eq!(
            ResourceValue::PaymentHistory(Vec::new()).kind(),
            ResourceKind::PaymentHistory
        );
    }

    #[test]
    fn empty_value_exists_only_for_list_kinds() {
        for kind in [
            ResourceKind::Comments,
            ResourceKind::Notifications,
            ResourceKind::PaymentHistory,
        ] {
            let value = ResourceValue::empty_for(kind).expect("list kinds have an empty value");
            assert_eq!(value.kind(), kind);
        }
        assert!(ResourceValue::empty_for(ResourceKind::Subscription).is_none());
    }

    #[test]
    fn accessors_reject_mismatched_variants() {
        let value = ResourceValue::Notifications(vec![sample_notification("n-1", false)]);
        assert!(value.as_notifications().is_some());
        assert!(value.as_comments().is_none());
        assert!(value.as_subscription().is_none());
    }
}
