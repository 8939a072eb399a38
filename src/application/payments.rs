//! Payment history, subscription creation, and settlement verification.

use std::sync::Arc;

use time::Duration;
use tracing::{instrument, warn};

use crate::application::transport::{ResourceTransport, WriteRequest};
use crate::cache::{
    FetchPlan, Fetcher, KeyPattern, MutationExecutor, MutationPlan, MutationTarget, PollPolicy,
    PollSession, PollState, PollVerdict, PollingVerifier, Probe, QueryExecutor, ResourceKey,
    VerdictFn,
};
use crate::domain::error::ResourceError;
use crate::domain::normalize;
use crate::domain::records::{PaymentRecord, ResourceValue, SubscriptionRecord};
use crate::domain::types::{ResourceKind, SubscriptionPhase};
use crate::infra::clock::Clock;

pub struct PaymentsService {
    query: Arc<QueryExecutor>,
    mutation: Arc<MutationExecutor>,
    verifier: Arc<PollingVerifier>,
    transport: Arc<dyn ResourceTransport>,
    clock: Arc<dyn Clock>,
    stale_after: Duration,
    poll_policy: PollPolicy,
}

impl PaymentsService {
    pub fn new(
        query: Arc<QueryExecutor>,
        mutation: Arc<MutationExecutor>,
        verifier: Arc<PollingVerifier>,
        transport: Arc<dyn ResourceTransport>,
        clock: Arc<dyn Clock>,
        stale_after: Duration,
        poll_policy: PollPolicy,
    ) -> Self {
        Self {
            query,
            mutation,
            verifier,
            transport,
            clock,
            stale_after,
            poll_policy,
        }
    }

    /// Settled payments for one user. A user with no history reads as an
    /// empty list, not an error.
    #[instrument(skip(self))]
    pub async fn history(&self, user_id: &str) -> Result<Vec<PaymentRecord>, ResourceError> {
        let key = ResourceKey::payment_history(user_id);
        let value = self
            .query
            .ensure(&key, self.fetch_plan(&key, ResourceKind::PaymentHistory))
            .await?;
        Ok(value
            .and_then(|v| v.as_payment_history().map(|p| p.to_vec()))
            .unwrap_or_default())
    }

    /// The user's subscription, `None` when they have never had one.
    #[instrument(skip(self))]
    pub async fn subscription(
        &self,
        user_id: &str,
    ) -> Result<Option<SubscriptionRecord>, ResourceError> {
        let key = ResourceKey::subscription(user_id);
        match self
            .query
            .ensure(&key, self.fetch_plan(&key, ResourceKind::Subscription))
            .await
        {
            Ok(value) => Ok(value.and_then(|v| v.as_subscription().cloned())),
            Err(ResourceError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Start a subscription: optimistic pending record, remote write,
    /// then the caller runs [`Self::verify_subscription`] with the
    /// returned transaction id.
    #[instrument(skip(self))]
    pub async fn create_subscription(
        &self,
        user_id: &str,
        plan_name: &str,
    ) -> Result<SubscriptionRecord, ResourceError> {
        let key = ResourceKey::subscription(user_id);
        let optimistic = SubscriptionRecord {
            id: None,
            user_id: user_id.to_string(),
            plan: plan_name.to_string(),
            phase: SubscriptionPhase::PendingVerification,
            transaction_id: None,
            updated_at: self.clock.now(),
        };

        let request = WriteRequest::CreateSubscription {
            user_id: user_id.to_string(),
            plan: plan_name.to_string(),
        };
        let transport = Arc::clone(&self.transport);
        let remote = Box::pin(async move {
            let payload = transport.write(&request).await?;
            normalize::record::<SubscriptionRecord>("create subscription response", payload)
        });

        let plan = MutationPlan {
            targets: vec![MutationTarget {
                key: key.clone(),
                apply_optimistic: Box::new(move |_| ResourceValue::Subscription(optimistic)),
                apply_confirmed: Box::new(|_, confirmed: &SubscriptionRecord| {
                    ResourceValue::Subscription(confirmed.clone())
                }),
            }],
            remote,
            // A charge may already be on the books by the time the
            // write confirms
            invalidate: vec![KeyPattern::from(ResourceKey::payment_history(user_id))],
        };

        self.mutation.mutate(plan).await
    }

    /// Poll the provider until the transaction settles, fails, or the
    /// deadline passes. The terminal record lands in the cache either way.
    #[instrument(skip(self))]
    pub async fn verify_subscription(&self, user_id: &str, transaction_id: &str) -> PollState {
        self.verifier
            .verify(self.poll_session(user_id, transaction_id))
            .await
    }

    /// Background variant of [`Self::verify_subscription`].
    pub fn spawn_verification(
        &self,
        user_id: &str,
        transaction_id: &str,
    ) -> tokio::task::JoinHandle<PollState> {
        self.verifier.spawn(self.poll_session(user_id, transaction_id))
    }

    fn poll_session(&self, user_id: &str, transaction_id: &str) -> PollSession {
        let transport = Arc::clone(&self.transport);
        let transaction = transaction_id.to_string();
        let probe: Probe = Arc::new(move || {
            let transport = Arc::clone(&transport);
            let transaction = transaction.clone();
            Box::pin(async move {
                let payload = transport.check_status(&transaction).await?;
                normalize::resource_value(ResourceKind::Subscription, payload)
            })
        });

        let verdict: VerdictFn = Arc::new(|value| match value.as_subscription() {
            Some(record) => match record.phase {
                SubscriptionPhase::Active => Some(PollVerdict::Succeeded),
                SubscriptionPhase::Failed | SubscriptionPhase::Canceled => {
                    Some(PollVerdict::Failed)
                }
                SubscriptionPhase::PendingVerification => None,
            },
            None => {
                warn!("Subscription probe returned a non-subscription value");
                Some(PollVerdict::Failed)
            }
        });

        PollSession {
            key: ResourceKey::subscription(user_id),
            probe,
            verdict,
            policy: self.poll_policy,
        }
    }

    fn fetch_plan(&self, key: &ResourceKey, kind: ResourceKind) -> FetchPlan {
        let transport = Arc::clone(&self.transport);
        let key = key.clone();
        let fetcher: Fetcher = Arc::new(move || {
            let transport = Arc::clone(&transport);
            let key = key.clone();
            Box::pin(async move {
                let payload = transport.fetch(&key).await?;
                normalize::resource_value(kind, payload)
            })
        });
        FetchPlan::new(fetcher, self.stale_after)
    }
}
