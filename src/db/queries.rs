use std::str::FromStr;

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::job::{ContentType, JobStatus, VerificationJob};
use crate::models::verdict::VerificationResult;

const JOB_COLUMNS: &str = "id, status, content_type, content, progress, result, error, \
                           retry_count, callback_token, created_at, updated_at";

fn job_from_row(row: &PgRow) -> Result<VerificationJob, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    let content_type_str: String = row.try_get("content_type")?;
    Ok(VerificationJob {
        id: row.try_get("id")?,
        status: JobStatus::from_str(&status_str).unwrap_or(JobStatus::Queued),
        content_type: ContentType::from_str(&content_type_str).unwrap_or(ContentType::Text),
        content: row.try_get("content")?,
        progress: row.try_get("progress")?,
        result: row.try_get("result")?,
        error: row.try_get("error")?,
        retry_count: row.try_get("retry_count")?,
        callback_token: row.try_get("callback_token")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a new verification job in the queued state.
pub async fn create_job(
    pool: &PgPool,
    content_type: ContentType,
    content: &str,
    callback_token: Option<&str>,
) -> Result<VerificationJob, sqlx::Error> {
    let row = sqlx::query(&format!(
        "INSERT INTO verification_jobs (status, content_type, content, callback_token) \
         VALUES ('queued', $1, $2, $3) \
         RETURNING {JOB_COLUMNS}"
    ))
    .bind(content_type.to_string())
    .bind(content)
    .bind(callback_token)
    .fetch_one(pool)
    .await?;

    job_from_row(&row)
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<VerificationJob>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM verification_jobs WHERE id = $1"
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Update job status, stamping processing start/end times.
pub async fn update_job_status(
    pool: &PgPool,
    job_id: Uuid,
    status: JobStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE verification_jobs
        SET status = $1,
            updated_at = NOW(),
            processing_started_at = CASE WHEN $1 = 'processing' THEN NOW() ELSE processing_started_at END,
            processing_completed_at = CASE WHEN $1 IN ('completed', 'failed') THEN NOW() ELSE processing_completed_at END
        WHERE id = $2
        "#,
    )
    .bind(status.to_string())
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Update job progress (0-100). Terminal jobs are left untouched.
pub async fn update_job_progress(
    pool: &PgPool,
    job_id: Uuid,
    progress: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE verification_jobs
        SET progress = $1, updated_at = NOW()
        WHERE id = $2 AND status NOT IN ('completed', 'failed')
        "#,
    )
    .bind(progress.clamp(0, 100))
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record a terminal result or error on a job.
pub async fn update_job_result(
    pool: &PgPool,
    job_id: Uuid,
    status: JobStatus,
    result: Option<serde_json::Value>,
    error: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE verification_jobs
        SET status = $1,
            result = $2,
            error = $3,
            progress = CASE WHEN $1 = 'completed' THEN 100 ELSE progress END,
            updated_at = NOW(),
            processing_completed_at = NOW()
        WHERE id = $4
        "#,
    )
    .bind(status.to_string())
    .bind(result)
    .bind(error)
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Increment retry count
pub async fn increment_retry_count(pool: &PgPool, job_id: Uuid) -> Result<i32, sqlx::Error> {
    let row = sqlx::query(
        r#"
        UPDATE verification_jobs
        SET retry_count = retry_count + 1, updated_at = NOW()
        WHERE id = $1
        RETURNING retry_count
        "#,
    )
    .bind(job_id)
    .fetch_one(pool)
    .await?;

    row.try_get("retry_count")
}

fn check_from_row(row: &PgRow) -> Result<VerificationResult, sqlx::Error> {
    let verdict_str: String = row.try_get("verdict")?;
    let sources: serde_json::Value = row.try_get("sources")?;
    let breakdown: serde_json::Value = row.try_get("breakdown")?;
    Ok(VerificationResult {
        verdict: crate::models::verdict::Verdict::from_str(&verdict_str)
            .unwrap_or(crate::models::verdict::Verdict::Uncertain),
        confidence: row.try_get("confidence")?,
        summary: row.try_get("summary")?,
        key_claim: row.try_get("key_claim")?,
        sources: serde_json::from_value(sources).unwrap_or_default(),
        breakdown: serde_json::from_value(breakdown).unwrap_or_default(),
        model_used: row.try_get("model_used")?,
        pipeline_version: row.try_get("pipeline_version")?,
        check_id: Some(row.try_get("id")?),
    })
}

/// Latest persisted result for this content under the given pipeline version.
/// Rows written by other pipeline versions are invisible here; history stays.
pub async fn find_latest_check(
    pool: &PgPool,
    content: &str,
    pipeline_version: &str,
) -> Result<Option<VerificationResult>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, verdict, confidence, summary, key_claim, sources, breakdown,
               model_used, pipeline_version
        FROM checks
        WHERE content = $1 AND pipeline_version = $2
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(content)
    .bind(pipeline_version)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(check_from_row).transpose()
}

/// Fetch a persisted check by id.
pub async fn get_check(
    pool: &PgPool,
    check_id: Uuid,
) -> Result<Option<VerificationResult>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, verdict, confidence, summary, key_claim, sources, breakdown,
               model_used, pipeline_version
        FROM checks
        WHERE id = $1
        "#,
    )
    .bind(check_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(check_from_row).transpose()
}

/// Persist a freshly computed result. The unique constraint on
/// (fingerprint, pipeline_version) makes a concurrent duplicate write a
/// benign race: on collision the winning row is re-read and returned.
pub async fn create_check(
    pool: &PgPool,
    content_type: ContentType,
    content: &str,
    fingerprint: &str,
    result: &VerificationResult,
    duration_ms: i64,
) -> Result<Uuid, sqlx::Error> {
    let sources = serde_json::to_value(&result.sources).unwrap_or_default();
    let breakdown = serde_json::to_value(&result.breakdown).unwrap_or_default();

    let inserted = sqlx::query(
        r#"
        INSERT INTO checks (content_type, content, fingerprint, pipeline_version,
                            verdict, confidence, summary, key_claim, sources,
                            breakdown, model_used, duration_ms)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT ON CONSTRAINT checks_fingerprint_version_key DO NOTHING
        RETURNING id
        "#,
    )
    .bind(content_type.to_string())
    .bind(content)
    .bind(fingerprint)
    .bind(&result.pipeline_version)
    .bind(result.verdict.to_string())
    .bind(result.confidence)
    .bind(&result.summary)
    .bind(&result.key_claim)
    .bind(sources)
    .bind(breakdown)
    .bind(&result.model_used)
    .bind(duration_ms)
    .fetch_optional(pool)
    .await?;

    if let Some(row) = inserted {
        return row.try_get("id");
    }

    // Lost the race: another worker persisted the same fingerprint first.
    let row = sqlx::query(
        "SELECT id FROM checks WHERE fingerprint = $1 AND pipeline_version = $2",
    )
    .bind(fingerprint)
    .bind(&result.pipeline_version)
    .fetch_one(pool)
    .await?;
    row.try_get("id")
}
