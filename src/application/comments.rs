//! Comment listing and optimistic creation.

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
use crate::domain::records::{CommentRecord, ResourceValue};
use crate::domain::types::{CommentId, ResourceKind};
use crate::infra::clock::Clock;

pub struct CommentsService {
    query: Arc<QueryExecutor>,
    mutation: Arc<MutationExecutor>,
    transport: Arc<dyn ResourceTransport>,
    clock: Arc<dyn Clock>,
    stale_after: Duration,
}

impl CommentsService {
    pub fn new(
        query: Arc<QueryExecutor>,
        mutation: Arc<MutationExecutor>,
        transport: Arc<dyn ResourceTransport>,
        clock: Arc<dyn Clock>,
        stale_after: Duration,
    ) -> Self {
        Self {
            query,
            mutation,
            transport,
            clock,
            stale_after,
        }
    }

    /// Comments for one publication, freshest first per server order.
    #[instrument(skip(self))]
    pub async fn list(&self, publication_id: &str) -> Result<Vec<CommentRecord>, ResourceError> {
        let key = ResourceKey::comments(publication_id);
        let value = self.query.ensure(&key, self.fetch_plan(&key)).await?;
        Ok(value
            .and_then(|v| v.as_comments().map(|c| c.to_vec()))
            .unwrap_or_default())
    }

    /// Post a comment: optimistic prepend now, server reconciliation on
    /// confirmation, list invalidation so canonical ordering returns.
    #[instrument(skip(self, body))]
    pub async fn add(
        &self,
        publication_id: &str,
        author: &str,
        body: &str,
    ) -> Result<CommentRecord, ResourceError> {
        let key = ResourceKey::comments(publication_id);
        let temp_id = CommentId::local();
        let optimistic = CommentRecord {
            id: temp_id.clone(),
            publication_id: publication_id.to_string(),
            author: author.to_string(),
            body: body.to_string(),
            created_at: self.clock.now(),
        };

        let request = WriteRequest::CreateComment {
            publication_id: publication_id.to_string(),
            author: author.to_string(),
            body: body.to_string(),
        };
        let transport = Arc::clone(&self.transport);
        let remote = Box::pin(async move {
            let payload = transport.write(&request).await?;
            normalize::record::<CommentRecord>("create comment response", payload)
        });

        let confirm_temp_id = temp_id.clone();
        let plan = MutationPlan {
            targets: vec![MutationTarget {
                key: key.clone(),
                apply_optimistic: Box::new(move |current| {
                    let mut list = comment_list(current);
                    list.insert(0, optimistic);
                    ResourceValue::Comments(list)
                }),
                apply_confirmed: Box::new(move |current, confirmed: &CommentRecord| {
                    let mut list = comment_list(current);
                    list.retain(|c| c.id != confirm_temp_id);
                    list.insert(0, confirmed.clone());
                    ResourceValue::Comments(list)
                }),
            }],
            remote,
            invalidate: vec![KeyPattern::from(key)],
        };

        self.mutation.mutate(plan).await
    }

    /// Unsettled comment mutations for a publication.
    pub fn pending(&self, publication_id: &str) -> usize {
        self.mutation.pending(&ResourceKey::comments(publication_id))
    }

    fn fetch_plan(&self, key: &ResourceKey) -> FetchPlan {
        let transport = Arc::clone(&self.transport);
        let key = key.clone();
        let fetcher: Fetcher = Arc::new(move || {
            let transport = Arc::clone(&transport);
            let key = key.clone();
            Box::pin(async move {
                let payload = transport.fetch(&key).await?;
                normalize::resource_value(ResourceKind::Comments, payload)
            })
        });
        FetchPlan::new(fetcher, self.stale_after)
    }
}

fn comment_list(current: Option<ResourceValue>) -> Vec<CommentRecord> {
    current
        .and_then(|v| v.as_comments().map(|c| c.to_vec()))
        .unwrap_or_default()
}
