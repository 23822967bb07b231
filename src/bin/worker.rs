use std::time::Duration;

use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use claimspect::app_state::AppState;
use claimspect::config::AppConfig;
use claimspect::db::{self, queries};
use claimspect::models::job::JobStatus;
use claimspect::services::ai::AiClient;
use claimspect::services::cache::ResultCache;
use claimspect::services::events::{EventPublisher, JobEvent};
use claimspect::services::lock::SingleFlight;
use claimspect::services::media::ProviderChain;
use claimspect::services::pipeline::{self, PipelineError};
use claimspect::services::queue::{JobQueue, QueuedJob};

const MAX_RETRIES: i32 = 3;
const POLL_INTERVAL_MS: u64 = 1000;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting claimspect worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // The worker is pointless without a queue to consume.
    let redis_url = config
        .redis_url
        .clone()
        .expect("REDIS_URL is required for worker processes");

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Initializing services");
    let redis_client = redis::Client::open(redis_url.as_str()).expect("Invalid REDIS_URL");
    let queue = JobQueue::new(&redis_url).expect("Failed to initialize job queue");
    let cache = ResultCache::new(Some(redis_client.clone()), db_pool.clone());
    let lock = SingleFlight::new(Some(redis_client.clone()));
    let events = EventPublisher::new(Some(redis_client.clone()));
    let ai = AiClient::new(&config, Some(redis_client));
    let providers = ProviderChain::from_config(&config).expect("Failed to set up media providers");

    let concurrency = config.worker_concurrency.max(1);
    let state = AppState::new(db_pool, config, Some(queue), cache, lock, events, ai, providers);

    tracing::info!(concurrency, "Worker ready, starting job processing loops");

    let mut handles = Vec::with_capacity(concurrency);
    for slot in 0..concurrency {
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            processing_loop(state, slot).await;
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }
}

async fn processing_loop(state: AppState, slot: usize) {
    loop {
        match process_next_job(&state).await {
            Ok(true) => {
                tracing::debug!(slot, "Job processed, checking for next job");
            }
            Ok(false) => {
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                tracing::error!(slot, error = %e, "Error processing job, will retry");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
}

/// Process the next job from the queue.
/// Returns Ok(true) if a job was processed, Ok(false) if no job available.
async fn process_next_job(state: &AppState) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    let queue = state.queue.as_ref().expect("worker runs with a queue");

    let job = match queue.dequeue().await? {
        Some(j) => j,
        None => return Ok(false),
    };

    tracing::info!(
        job_id = %job.job_id,
        content_type = %job.content_type,
        "Processing verification job"
    );

    if let Err(e) = queries::update_job_status(&state.db, job.job_id, JobStatus::Processing).await
    {
        tracing::error!(job_id = %job.job_id, error = %e, "Failed to update job status");
        return Err(e.into());
    }

    let started = std::time::Instant::now();
    match pipeline::run(state, &job).await {
        Ok(result) => {
            queries::update_job_result(
                &state.db,
                job.job_id,
                JobStatus::Completed,
                Some(result.clone()),
                None,
            )
            .await?;
            state
                .events
                .publish(job.job_id, &JobEvent::Completed { result })
                .await;

            queue.complete(&job).await?;

            metrics::counter!("verification_jobs_completed").increment(1);
            metrics::histogram!("verification_processing_seconds")
                .record(started.elapsed().as_secs_f64());
            tracing::info!(
                job_id = %job.job_id,
                duration_ms = started.elapsed().as_millis() as u64,
                "Job completed successfully"
            );

            Ok(true)
        }
        Err(e) => {
            tracing::error!(job_id = %job.job_id, error = %e, "Job processing failed");
            handle_failure(state, queue, &job, &e).await?;
            Ok(true)
        }
    }
}

/// Extraction failures and critical dependency rejections are final; only
/// infrastructure errors earn a requeue, up to the retry cap.
async fn handle_failure(
    state: &AppState,
    queue: &JobQueue,
    job: &QueuedJob,
    error: &PipelineError,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let retryable = matches!(error, PipelineError::Db(_));
    let retry_count = queries::increment_retry_count(&state.db, job.job_id).await?;

    if retryable && retry_count < MAX_RETRIES {
        queue.enqueue(job).await?;
        queue.complete(job).await?;
        queries::update_job_status(&state.db, job.job_id, JobStatus::Queued).await?;
        tracing::info!(
            job_id = %job.job_id,
            retry_count,
            "Job re-queued for retry"
        );
        return Ok(());
    }

    let message = error.to_string();
    queries::update_job_result(
        &state.db,
        job.job_id,
        JobStatus::Failed,
        None,
        Some(&message),
    )
    .await?;
    state
        .events
        .publish(job.job_id, &JobEvent::Failed { error: message })
        .await;

    queue.complete(job).await?;
    metrics::counter!("verification_jobs_failed").increment(1);
    tracing::warn!(job_id = %job.job_id, retry_count, "Job failed");
    Ok(())
}
