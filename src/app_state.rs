use sqlx::PgPool;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::{
    ai::AiClient, cache::ResultCache, events::EventPublisher, lock::SingleFlight,
    media::ProviderChain, queue::JobQueue,
};

/// Shared application state passed to all route handlers and workers.
///
/// The Redis client is constructed once at startup and shared by reference
/// among the components that need it; when no Redis is configured the queue
/// is absent and caching, deduplication and live events degrade instead of
/// crashing.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<AppConfig>,
    pub queue: Option<Arc<JobQueue>>,
    pub cache: Arc<ResultCache>,
    pub lock: Arc<SingleFlight>,
    pub events: Arc<EventPublisher>,
    pub ai: Arc<AiClient>,
    pub providers: Arc<ProviderChain>,
}

impl AppState {
    pub fn new(
        db: PgPool,
        config: AppConfig,
        queue: Option<JobQueue>,
        cache: ResultCache,
        lock: SingleFlight,
        events: EventPublisher,
        ai: AiClient,
        providers: ProviderChain,
    ) -> Self {
        Self {
            db,
            config: Arc::new(config),
            queue: queue.map(Arc::new),
            cache: Arc::new(cache),
            lock: Arc::new(lock),
            events: Arc::new(events),
            ai: Arc::new(ai),
            providers: Arc::new(providers),
        }
    }
}
