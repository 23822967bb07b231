use claimspect::{
    app_state::AppState,
    config::AppConfig,
    db::{self, queries},
    models::job::{ContentType, JobStatus},
    models::verdict::{Verdict, VerificationResult, PIPELINE_VERSION},
    services::{
        ai::AiClient, cache::ResultCache, events::EventPublisher, fingerprint,
        lock::SingleFlight, media::ProviderChain, queue::JobQueue,
    },
};
use uuid::Uuid;

/// Integration test: job, queue, cache and lock plumbing end to end.
///
/// This test verifies the complete integration:
/// 1. Database connection and schema
/// 2. Job lifecycle (create/read/update/complete)
/// 3. Job queue (enqueue/dequeue/complete)
/// 4. Two-tier result cache (persist, then hit both tiers)
/// 5. Single-flight lock contention
///
/// Note: This requires a running PostgreSQL and Redis instance
/// configured via environment variables.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_full_integration() {
    // Load config from environment
    let config = AppConfig::from_env().expect("Failed to load config");
    let redis_url = config.redis_url.clone().expect("REDIS_URL required");

    // Initialize database
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run migrations");

    // Initialize services
    let redis_client = redis::Client::open(redis_url.as_str()).expect("Invalid REDIS_URL");
    let queue = JobQueue::new(&redis_url).expect("Failed to initialize queue");
    let cache = ResultCache::new(Some(redis_client.clone()), db_pool.clone());
    let lock = SingleFlight::new(Some(redis_client));

    // Unique content per run so reruns never hit stale cache rows.
    let content = format!("The test tower is {} meters tall.", Uuid::new_v4());
    let fp = fingerprint::fingerprint(ContentType::Text, &content);

    // 1. Test database job creation
    let job = queries::create_job(&db_pool, ContentType::Text, &content, None)
        .await
        .expect("Failed to create job");

    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.content, content);
    assert_eq!(job.retry_count, 0);
    assert_eq!(job.progress, 0);

    // 2. Test job retrieval
    let retrieved_job = queries::get_job(&db_pool, job.id)
        .await
        .expect("Failed to get job")
        .expect("Job not found");

    assert_eq!(retrieved_job.id, job.id);
    assert_eq!(retrieved_job.status, JobStatus::Queued);

    // 3. Test job status and progress updates
    queries::update_job_status(&db_pool, job.id, JobStatus::Processing)
        .await
        .expect("Failed to update status");
    queries::update_job_progress(&db_pool, job.id, 35)
        .await
        .expect("Failed to update progress");

    let updated_job = queries::get_job(&db_pool, job.id)
        .await
        .expect("Failed to get job")
        .expect("Job not found");

    assert_eq!(updated_job.status, JobStatus::Processing);
    assert_eq!(updated_job.progress, 35);

    // 4. Test queue operations
    let queued_job = claimspect::services::queue::QueuedJob {
        job_id: job.id,
        content_type: ContentType::Text,
        content: content.clone(),
        callback_token: None,
    };

    queue.enqueue(&queued_job).await.expect("Failed to enqueue");
    assert!(queue.queue_depth().await.expect("Failed to read depth") >= 1);

    let dequeued = queue
        .dequeue()
        .await
        .expect("Failed to dequeue")
        .expect("No job in queue");

    assert_eq!(dequeued.job_id, job.id);
    assert_eq!(dequeued.content, content);

    // 5. Test single-flight contention: second holder loses until release
    let holder_a = Uuid::new_v4().to_string();
    let holder_b = Uuid::new_v4().to_string();
    assert!(lock.try_acquire(&fp, &holder_a).await);
    assert!(!lock.try_acquire(&fp, &holder_b).await);
    lock.release(&fp, &holder_a).await;
    assert!(lock.try_acquire(&fp, &holder_b).await);
    lock.release(&fp, &holder_b).await;

    // 6. Test result persistence and both cache tiers
    assert!(cache
        .lookup(&fp, &content)
        .await
        .expect("Cache lookup failed")
        .is_none());

    let mut result = VerificationResult {
        verdict: Verdict::Confirmed,
        confidence: 0.92,
        summary: "Verified by live integration test".to_string(),
        key_claim: Some(content.clone()),
        sources: vec![claimspect::models::verdict::Source {
            title: "Example source".to_string(),
            url: "https://example.org/evidence".to_string(),
            excerpt: "supporting excerpt".to_string(),
        }],
        breakdown: vec![],
        model_used: "integration-test".to_string(),
        pipeline_version: PIPELINE_VERSION.to_string(),
        check_id: None,
    };

    let check_id = queries::create_check(&db_pool, ContentType::Text, &content, &fp, &result, 123)
        .await
        .expect("Failed to persist check");
    result.check_id = Some(check_id);

    // Persistent tier serves the miss and backfills Redis.
    let from_db = cache
        .lookup(&fp, &content)
        .await
        .expect("Cache lookup failed")
        .expect("Expected persistent-tier hit");
    assert_eq!(from_db.verdict, Verdict::Confirmed);
    assert_eq!(from_db.check_id, Some(check_id));

    // Second lookup comes from Redis.
    let from_redis = cache
        .lookup(&fp, &content)
        .await
        .expect("Cache lookup failed")
        .expect("Expected redis-tier hit");
    assert_eq!(from_redis.verdict, Verdict::Confirmed);

    // Duplicate persistence for the same fingerprint returns the winner's id.
    let duplicate_id =
        queries::create_check(&db_pool, ContentType::Text, &content, &fp, &result, 456)
            .await
            .expect("Duplicate persist should be benign");
    assert_eq!(duplicate_id, check_id);

    let loaded_check = queries::get_check(&db_pool, check_id)
        .await
        .expect("Failed to load check")
        .expect("Check not found");
    assert_eq!(loaded_check.sources.len(), 1);

    // 7. Test job completion
    let payload = serde_json::to_value(&result).expect("serialize result");
    queries::update_job_result(&db_pool, job.id, JobStatus::Completed, Some(payload), None)
        .await
        .expect("Failed to update result");

    let final_job = queries::get_job(&db_pool, job.id)
        .await
        .expect("Failed to get job")
        .expect("Job not found");

    assert_eq!(final_job.status, JobStatus::Completed);
    assert_eq!(final_job.progress, 100);
    assert!(final_job.result.is_some());

    // Cleanup
    queue
        .complete(&dequeued)
        .await
        .expect("Failed to complete job in queue");
}

/// Build state backed by the database alone: no queue, no Redis tiers, and
/// event streaming on its polling fallback.
async fn state_without_redis() -> AppState {
    let config = AppConfig::from_env().expect("Failed to load config");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run migrations");
    let cache = ResultCache::new(None, db_pool.clone());
    let providers = ProviderChain::from_config(&config).expect("Failed to build providers");
    let ai = AiClient::new(&config, None);
    AppState::new(
        db_pool,
        config,
        None,
        cache,
        SingleFlight::new(None),
        EventPublisher::new(None),
        ai,
        providers,
    )
}

async fn read_sse_body(state: AppState, job_id: Uuid) -> String {
    use axum::response::IntoResponse;

    let sse = claimspect::routes::events::stream_job_events(
        axum::extract::State(state),
        axum::extract::Path(job_id),
    )
    .await
    .expect("Failed to open event stream");
    let response = sse.into_response();
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .expect("Failed to read event stream body");
    String::from_utf8_lossy(&bytes).into_owned()
}

/// A subscriber connecting after the job finished gets exactly one event: the
/// terminal one, carrying sequence id 0, with no interleaved progress frames.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_event_stream_terminal_on_connect() {
    let state = state_without_redis().await;

    let content = format!("Terminal stream check {}.", Uuid::new_v4());
    let job = queries::create_job(&state.db, ContentType::Text, &content, None)
        .await
        .expect("Failed to create job");
    queries::update_job_result(
        &state.db,
        job.id,
        JobStatus::Completed,
        Some(serde_json::json!({"verdict": "confirmed"})),
        None,
    )
    .await
    .expect("Failed to complete job");

    let body = read_sse_body(state, job.id).await;

    assert_eq!(body.matches("data:").count(), 1);
    assert!(body.contains("id: 0"));
    assert!(body.contains("completed"));
    assert!(!body.contains("id: 1"));
}

/// Sequence ids increase monotonically across progress and terminal frames,
/// and progress is relayed before the terminal event.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_event_stream_sequence_ids_increase() {
    let state = state_without_redis().await;

    let content = format!("Ordered stream check {}.", Uuid::new_v4());
    let job = queries::create_job(&state.db, ContentType::Text, &content, None)
        .await
        .expect("Failed to create job");
    queries::update_job_status(&state.db, job.id, JobStatus::Processing)
        .await
        .expect("Failed to mark processing");

    // Drive the job forward while the stream is open so the poller relays a
    // progress frame before the terminal one.
    let db = state.db.clone();
    let job_id = job.id;
    let driver = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
        queries::update_job_progress(&db, job_id, 60)
            .await
            .expect("Failed to update progress");
        tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
        queries::update_job_result(
            &db,
            job_id,
            JobStatus::Completed,
            Some(serde_json::json!({"verdict": "confirmed"})),
            None,
        )
        .await
        .expect("Failed to complete job");
    });

    let body = read_sse_body(state, job.id).await;
    driver.await.expect("driver task failed");

    let first = body.find("id: 0").expect("missing first event id");
    let second = body.find("id: 1").expect("missing second event id");
    assert!(first < second);

    let progress_at = body.find("progress").expect("missing progress frame");
    let terminal_at = body.find("completed").expect("missing terminal frame");
    assert!(progress_at < terminal_at);
}

/// Fingerprints are stable under tracking-parameter noise but split across
/// content types.
#[test]
fn test_fingerprint_partitioning() {
    let clean = fingerprint::fingerprint(ContentType::Video, "https://youtu.be/dQw4w9WgXcQ");
    let noisy = fingerprint::fingerprint(
        ContentType::Video,
        "https://www.youtube.com/watch?v=dQw4w9WgXcQ&utm_source=share&si=abc123",
    );
    assert_eq!(clean, noisy);

    let as_text = fingerprint::fingerprint(ContentType::Text, "https://youtu.be/dQw4w9WgXcQ");
    assert_ne!(clean, as_text);
}

/// The trust rule strips unsupported assertive verdicts before they reach a
/// client.
#[test]
fn test_trust_rule() {
    let mut unsupported = VerificationResult {
        verdict: Verdict::Contradicted,
        confidence: 0.97,
        summary: "confidently wrong".to_string(),
        key_claim: None,
        sources: vec![],
        breakdown: vec![],
        model_used: "test".to_string(),
        pipeline_version: PIPELINE_VERSION.to_string(),
        check_id: None,
    };
    unsupported.enforce_trust_rule();
    assert_eq!(unsupported.verdict, Verdict::Uncertain);
    assert!(unsupported.confidence <= 0.5);
}

/// Claim extraction prefers checkable factual sentences over chatter.
#[test]
fn test_claim_extraction_picks_factual_sentence() {
    let text = "Hey everyone, thanks for watching! \
                A new study shows that 75% of adults sleep less than 7 hours per night. \
                Don't forget to subscribe.";
    let extraction = claimspect::services::claims::extract(text).expect("expected a claim");
    assert!(extraction.best_claim.contains("75%"));
    assert!(extraction.confidence > claimspect::services::claims::CONFIDENCE_THRESHOLD);
}
