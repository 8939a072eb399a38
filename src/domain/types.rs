//! Shared domain enumerations aligned with the portal's wire contracts.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The logical resource families the portal synchronizes.
///
/// Kinds are the coarse unit of invalidation: keys sharing a kind are
/// related, keys across kinds never are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Comments,
    Notifications,
    PaymentHistory,
    Subscription,
}

impl ResourceKind {
    /// List-shaped kinds get the 404-means-empty normalization policy.
    pub fn is_list_shaped(self) -> bool {
        matches!(
            self,
            Self::Comments | Self::Notifications | Self::PaymentHistory
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Comments => "comments",
            Self::Notifications => "notifications",
            Self::PaymentHistory => "payment_history",
            Self::Subscription => "subscription",
        }
    }
}

/// Lifecycle of a paid subscription as reported by the payment provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionPhase {
    PendingVerification,
    Active,
    Failed,
    Canceled,
}

impl SubscriptionPhase {
    /// Phases the polling verifier treats as final.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Active | Self::Failed | Self::Canceled)
    }
}

/// Comment identity across the optimistic window.
///
/// `Local` exists only between an optimistic apply and the commit that
/// swaps in the server-issued id; it never appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommentId {
    Server(String),
    Local(Uuid),
}

impl CommentId {
    pub fn local() -> Self {
        Self::Local(Uuid::new_v4())
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}
