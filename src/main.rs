use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use claimspect::app_state::AppState;
use claimspect::config::AppConfig;
use claimspect::services::ai::AiClient;
use claimspect::services::cache::ResultCache;
use claimspect::services::events::EventPublisher;
use claimspect::services::lock::SingleFlight;
use claimspect::services::media::ProviderChain;
use claimspect::services::queue::JobQueue;
use claimspect::{db, routes};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing claimspect API gateway");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_histogram!(
        "verification_processing_seconds",
        "Time to process a verification job"
    );
    metrics::describe_counter!(
        "verification_jobs_total",
        "Total verification jobs submitted"
    );
    metrics::describe_counter!(
        "verification_jobs_completed",
        "Total verification jobs completed"
    );
    metrics::describe_counter!(
        "verification_jobs_failed",
        "Total verification jobs that failed"
    );
    metrics::describe_counter!(
        "verification_cache_hits_total",
        "Verification results served from cache, by tier"
    );
    metrics::describe_counter!(
        "verification_duplicate_in_flight_total",
        "Jobs skipped because the same content was already being verified"
    );
    metrics::describe_gauge!(
        "verification_queue_depth",
        "Current number of pending jobs in the queue"
    );

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // One Redis client shared by the queue, cache, lock and event bus. A
    // missing or unparseable URL degrades those components instead of
    // aborting startup.
    let redis_client = config.redis_url.as_deref().and_then(|url| {
        match redis::Client::open(url) {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "invalid REDIS_URL, running without Redis");
                None
            }
        }
    });
    if redis_client.is_none() {
        tracing::warn!("no Redis configured: submissions disabled, cache and events degraded");
    }

    let queue = match (&redis_client, config.redis_url.as_deref()) {
        (Some(_), Some(url)) => JobQueue::new(url).ok(),
        _ => None,
    };
    let cache = ResultCache::new(redis_client.clone(), db_pool.clone());
    let lock = SingleFlight::new(redis_client.clone());
    let events = EventPublisher::new(redis_client.clone());
    let ai = AiClient::new(&config, redis_client.clone());
    let providers = ProviderChain::from_config(&config).expect("Failed to set up media providers");

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(db_pool, config, queue, cache, lock, events, ai, providers);

    // Build API routes
    let app = Router::new()
        .route(
            "/",
            get(|| async {
                Json(serde_json::json!({
                    "service": "claimspect",
                    "version": env!("CARGO_PKG_VERSION"),
                    "status": "ok",
                }))
            }),
        )
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/verify", post(routes::verify::submit_verification))
        .route("/api/v1/status/{job_id}", get(routes::verify::get_job_status))
        .route("/api/v1/events/{job_id}", get(routes::events::stream_job_events))
        .route("/api/v1/check/{check_id}", get(routes::verify::get_check))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(64 * 1024)); // requests are small JSON bodies

    tracing::info!("Starting claimspect on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
