//! Explicit construction of the whole synchronization core.
//!
//! No module-level singleton: a `Portal` is built at application start
//! from settings, a transport, and a clock, and torn down by dropping
//! it. Tests build as many as they like side by side.

use std::sync::Arc;

use crate::application::comments::CommentsService;
use crate::application::notifications::NotificationsService;
use crate::application::payments::PaymentsService;
use crate::application::transport::ResourceTransport;
use crate::cache::{
    CacheConfig, CacheStore, InvalidationBus, MutationExecutor, PollingVerifier, QueryExecutor,
};
use crate::config::Settings;
use crate::infra::clock::Clock;

pub struct Portal {
    store: Arc<CacheStore>,
    query: Arc<QueryExecutor>,
    mutation: Arc<MutationExecutor>,
    bus: Arc<InvalidationBus>,
    verifier: Arc<PollingVerifier>,
    comments: CommentsService,
    notifications: NotificationsService,
    payments: PaymentsService,
}

impl Portal {
    pub fn new(
        settings: &Settings,
        transport: Arc<dyn ResourceTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache_config = CacheConfig::from(&settings.cache);
        let stale_after = cache_config.default_stale_after();

        let store = Arc::new(CacheStore::new(cache_config.clone()));
        let query = Arc::new(QueryExecutor::new(
            cache_config,
            Arc::clone(&store),
            Arc::clone(&clock),
        ));
        let bus = Arc::new(InvalidationBus::new(
            Arc::clone(&store),
            Arc::clone(&query),
        ));
        let mutation = Arc::new(MutationExecutor::new(
            Arc::clone(&store),
            Arc::clone(&bus),
            Arc::clone(&clock),
        ));
        let verifier = Arc::new(PollingVerifier::new(
            Arc::clone(&store),
            Arc::clone(&clock),
        ));

        let comments = CommentsService::new(
            Arc::clone(&query),
            Arc::clone(&mutation),
            Arc::clone(&transport),
            Arc::clone(&clock),
            stale_after,
        );
        let notifications = NotificationsService::new(
            Arc::clone(&query),
            Arc::clone(&mutation),
            Arc::clone(&transport),
            stale_after,
        );
        let payments = PaymentsService::new(
            Arc::clone(&query),
            Arc::clone(&mutation),
            Arc::clone(&verifier),
            Arc::clone(&transport),
            Arc::clone(&clock),
            stale_after,
            settings.poll.policy(),
        );

        Self {
            store,
            query,
            mutation,
            bus,
            verifier,
            comments,
            notifications,
            payments,
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn query(&self) -> &Arc<QueryExecutor> {
        &self.query
    }

    pub fn mutation(&self) -> &Arc<MutationExecutor> {
        &self.mutation
    }

    pub fn bus(&self) -> &Arc<InvalidationBus> {
        &self.bus
    }

    pub fn verifier(&self) -> &Arc<PollingVerifier> {
        &self.verifier
    }

    pub fn comments(&self) -> &CommentsService {
        &self.comments
    }

    pub fn notifications(&self) -> &NotificationsService {
        &self.notifications
    }

    pub fn payments(&self) -> &PaymentsService {
        &self.payments
    }
}
