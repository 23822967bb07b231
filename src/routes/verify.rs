use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use tracing::{error, info};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::queries;
use crate::models::api::{ErrorResponse, JobStatusResponse, VerifyRequest, VerifyResponse};
use crate::models::job::{ContentType, JobStatus};
use crate::services::guard;
use crate::services::queue::QueuedJob;

/// When the caller omits `content_type`, a parseable http(s) URL is treated
/// as a video reference and anything else as free text.
fn infer_content_type(content: &str) -> ContentType {
    let trimmed = content.trim();
    if (trimmed.starts_with("http://") || trimmed.starts_with("https://"))
        && url::Url::parse(trimmed).is_ok()
    {
        ContentType::Video
    } else {
        ContentType::Text
    }
}

/// A restricted target is a policy rejection, not a malformed request: 403,
/// distinct from the 400 validation failures.
fn restricted_target_rejection() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::FORBIDDEN,
        Json(ErrorResponse::new("Invalid or restricted URL")),
    )
}

/// POST /api/v1/verify — submit content for verification.
pub async fn submit_verification(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> Result<(StatusCode, Json<VerifyResponse>), (StatusCode, Json<ErrorResponse>)> {
    if let Err(report) = request.validate() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(report.to_string())),
        ));
    }

    let content = request.content.trim().to_string();
    let content_type = request
        .content_type
        .unwrap_or_else(|| infer_content_type(&content));

    if content_type == ContentType::Video && guard::is_dangerous_url(&content).await {
        return Err(restricted_target_rejection());
    }

    let Some(queue) = &state.queue else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new(
                "Verification is temporarily unavailable. Try again later.",
            )),
        ));
    };

    let job = queries::create_job(
        &state.db,
        content_type,
        &content,
        request.callback_token.as_deref(),
    )
    .await
    .map_err(|e| {
        error!(error = %e, "failed to create verification job");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("Failed to create verification job.")),
        )
    })?;

    let queued = QueuedJob {
        job_id: job.id,
        content_type,
        content,
        callback_token: job.callback_token.clone(),
    };
    if let Err(e) = queue.enqueue(&queued).await {
        error!(job_id = %job.id, error = %e, "failed to enqueue verification job");
        let _ = queries::update_job_result(
            &state.db,
            job.id,
            JobStatus::Failed,
            None,
            Some("queue unavailable"),
        )
        .await;
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new(
                "Verification is temporarily unavailable. Try again later.",
            )),
        ));
    }

    metrics::counter!("verification_jobs_total", "content_type" => content_type.to_string())
        .increment(1);
    info!(job_id = %job.id, content_type = %content_type, "verification job queued");

    Ok((
        StatusCode::ACCEPTED,
        Json(VerifyResponse {
            status: "queued".to_string(),
            job_id: job.id,
        }),
    ))
}

/// GET /api/v1/status/{job_id} — poll job state and progress.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, (StatusCode, Json<ErrorResponse>)> {
    let job = queries::get_job(&state.db, job_id)
        .await
        .map_err(|e| {
            error!(%job_id, error = %e, "failed to load job");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Failed to load job.")),
            )
        })?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new("Job not found.")),
            )
        })?;

    Ok(Json(JobStatusResponse {
        id: job.id,
        state: job.status.to_string(),
        progress: job.progress,
        result: job.result,
        error: job.error,
    }))
}

/// GET /api/v1/check/{check_id} — fetch a persisted verification result.
pub async fn get_check(
    State(state): State<AppState>,
    Path(check_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    let check = queries::get_check(&state.db, check_id)
        .await
        .map_err(|e| {
            error!(%check_id, error = %e, "failed to load check");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Failed to load check.")),
            )
        })?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new("Check not found.")),
            )
        })?;

    let payload = serde_json::to_value(&check).map_err(|e| {
        error!(%check_id, error = %e, "failed to serialize check");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("Failed to load check.")),
        )
    })?;
    Ok(Json(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_treated_as_video_references() {
        assert_eq!(
            infer_content_type("https://youtu.be/dQw4w9WgXcQ"),
            ContentType::Video
        );
        assert_eq!(
            infer_content_type("  http://example.com/watch  "),
            ContentType::Video
        );
    }

    #[test]
    fn restricted_targets_get_forbidden_not_bad_request() {
        let (status, body) = restricted_target_rejection();
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body.error.contains("restricted"));
    }

    #[test]
    fn plain_text_stays_text() {
        assert_eq!(
            infer_content_type("The Eiffel Tower is 330 meters tall."),
            ContentType::Text
        );
        assert_eq!(infer_content_type("https:// broken"), ContentType::Text);
        assert_eq!(infer_content_type("www.example.com"), ContentType::Text);
    }
}
