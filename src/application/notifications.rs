//! Notification listing, optimistic read-marking, unread counting.

use std::sync::Arc;

use time::Duration;
use tracing::instrument;

use crate::application::transport::{ResourceTransport, WriteRequest};
use crate::cache::{
    FetchPlan, Fetcher, KeyPattern, MutationExecutor, MutationPlan, MutationTarget, QueryExecutor,
    ResourceKey,
};
use crate::domain::error::ResourceError;
use crate::domain::normalize;
use crate::domain::records::{self, NotificationRecord, ResourceValue};
use crate::domain::types::ResourceKind;

pub struct NotificationsService {
    query: Arc<QueryExecutor>,
    mutation: Arc<MutationExecutor>,
    transport: Arc<dyn ResourceTransport>,
    stale_after: Duration,
}

impl NotificationsService {
    pub fn new(
        query: Arc<QueryExecutor>,
        mutation: Arc<MutationExecutor>,
        transport: Arc<dyn ResourceTransport>,
        stale_after: Duration,
    ) -> Self {
        Self {
            query,
            mutation,
            transport,
            stale_after,
        }
    }

    #[instrument(skip(self))]
    pub async fn list(&self, user_id: &str) -> Result<Vec<NotificationRecord>, ResourceError> {
        let key = ResourceKey::notifications(user_id);
        let value = self.query.ensure(&key, self.fetch_plan(&key)).await?;
        Ok(value
            .and_then(|v| v.as_notifications().map(|n| n.to_vec()))
            .unwrap_or_default())
    }

    /// Unread count, derived from the (fresh) notification list.
    #[instrument(skip(self))]
    pub async fn unread_count(&self, user_id: &str) -> Result<usize, ResourceError> {
        let list = self.list(user_id).await?;
        Ok(records::unread_count(&list))
    }

    /// Mark one notification read.
    ///
    /// The optimistic edit flips the flag in place; the whole kind is
    /// invalidated afterwards so derived counts recompute from server
    /// truth.
    #[instrument(skip(self))]
    pub async fn mark_read(
        &self,
        user_id: &str,
        notification_id: &str,
    ) -> Result<NotificationRecord, ResourceError> {
        let key = ResourceKey::notifications(user_id);
        let request = WriteRequest::MarkNotificationRead {
            user_id: user_id.to_string(),
            notification_id: notification_id.to_string(),
        };
        let transport = Arc::clone(&self.transport);
        let remote = Box::pin(async move {
            let payload = transport.write(&request).await?;
            normalize::record::<NotificationRecord>("mark read response", payload)
        });

        let optimistic_id = notification_id.to_string();
        let confirmed_id = notification_id.to_string();
        let plan = MutationPlan {
            targets: vec![MutationTarget {
                key: key.clone(),
                apply_optimistic: Box::new(move |current| {
                    let mut list = notification_list(current);
                    for record in &mut list {
                        if record.id == optimistic_id {
                            record.read = true;
                        }
                    }
                    ResourceValue::Notifications(list)
                }),
                apply_confirmed: Box::new(move |current, confirmed: &NotificationRecord| {
                    let mut list = notification_list(current);
                    match list.iter_mut().find(|r| r.id == confirmed_id) {
                        Some(record) => *record = confirmed.clone(),
                        None => list.push(confirmed.clone()),
                    }
                    ResourceValue::Notifications(list)
                }),
            }],
            remote,
            invalidate: vec![KeyPattern::from(ResourceKind::Notifications)],
        };

        self.mutation.mutate(plan).await
    }

    fn fetch_plan(&self, key: &ResourceKey) -> FetchPlan {
        let transport = Arc::clone(&self.transport);
        let key = key.clone();
        let fetcher: Fetcher = Arc::new(move || {
            let transport = Arc::clone(&transport);
            let key = key.clone();
            Box::pin(async move {
                let payload = transport.fetch(&key).await?;
                normalize::resource_value(ResourceKind::Notifications, payload)
            })
        });
        FetchPlan::new(fetcher, self.stale_after)
    }
}

fn notification_list(current: Option<ResourceValue>) -> Vec<NotificationRecord> {
    current
        .and_then(|v| v.as_notifications().map(|n| n.to_vec()))
        .unwrap_or_default()
}
