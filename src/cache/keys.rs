//! Cache key definitions.
//!
//! A `ResourceKey` names one cached resource instance: a kind plus the
//! scalar parameters that scope it. Keys sharing a kind are related for
//! invalidation purposes; `KeyPattern` expresses both exact and
//! kind-prefix matching.

use std::fmt;

use crate::domain::types::ResourceKind;

/// Stable identifier for one cached resource instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    kind: ResourceKind,
    params: Vec<String>,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, params: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            kind,
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    /// Comments on one publication.
    pub fn comments(publication_id: &str) -> Self {
        Self::new(ResourceKind::Comments, [publication_id])
    }

    /// One user's notification list.
    pub fn notifications(user_id: &str) -> Self {
        Self::new(ResourceKind::Notifications, [user_id])
    }

    /// One user's payment history.
    pub fn payment_history(user_id: &str) -> Self {
        Self::new(ResourceKind::PaymentHistory, [user_id])
    }

    /// One user's subscription.
    pub fn subscription(user_id: &str) -> Self {
        Self::new(ResourceKind::Subscription, [user_id])
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.as_str())?;
        for param in &self.params {
            write!(f, ":{param}")?;
        }
        Ok(())
    }
}

/// Matching rule used by subscriptions and invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPattern {
    /// Exactly one key.
    Exact(ResourceKey),
    /// Every key of a kind.
    Kind(ResourceKind),
}

impl KeyPattern {
    pub fn matches(&self, key: &ResourceKey) -> bool {
        match self {
            Self::Exact(exact) => exact == key,
            Self::Kind(kind) => key.kind() == *kind,
        }
    }
}

impl From<ResourceKey> for KeyPattern {
    fn from(key: ResourceKey) -> Self {
        Self::Exact(key)
    }
}

impl From<ResourceKind> for KeyPattern {
    fn from(kind: ResourceKind) -> Self {
        Self::Kind(kind)
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(key) => write!(f, "{key}"),
            Self::Kind(kind) => write!(f, "{}:*", kind.as_str()),
        }
    }
}
