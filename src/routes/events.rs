//! Live job progress over Server-Sent Events.
//!
//! Backed by the per-job pub/sub channel when an event bus is configured,
//! with a database polling fallback otherwise. Every connection closes after
//! relaying one terminal event; idle connections are cut after two minutes
//! so an abandoned job cannot pin a socket forever.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::{Stream, StreamExt};
use tracing::{debug, error};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::queries;
use crate::models::api::ErrorResponse;
use crate::models::job::{JobStatus, VerificationJob};
use crate::services::events::JobEvent;

const IDLE_TIMEOUT: Duration = Duration::from_secs(120);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);
const POLL_INTERVAL: Duration = Duration::from_secs(2);

fn terminal_event(job: &VerificationJob) -> JobEvent {
    match job.status {
        JobStatus::Completed => JobEvent::Completed {
            result: job.result.clone().unwrap_or(serde_json::Value::Null),
        },
        _ => JobEvent::Failed {
            error: job
                .error
                .clone()
                .unwrap_or_else(|| "verification failed".to_string()),
        },
    }
}

fn sse_event(seq: u64, event: &JobEvent) -> Event {
    let event_template = Event::default().id(seq.to_string());
    match event_template.json_data(event) {
        Ok(ev) => ev,
        Err(_) => Event::default().id(seq.to_string()).data("{}"),
    }
}

/// GET /api/v1/events/{job_id} — stream job lifecycle events.
pub async fn stream_job_events(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<
    Sse<impl Stream<Item = Result<Event, Infallible>>>,
    (StatusCode, Json<ErrorResponse>),
> {
    let job = queries::get_job(&state.db, job_id)
        .await
        .map_err(|e| {
            error!(%job_id, error = %e, "failed to load job for event stream");
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

    // Subscribe before the terminal re-check so an event published in
    // between is not lost.
    let subscription = if job.status.is_terminal() {
        None
    } else {
        state.events.subscribe(job_id).await
    };

    let stream = async_stream::stream! {
        let mut seq: u64 = 0;

        if job.status.is_terminal() {
            yield Ok(sse_event(seq, &terminal_event(&job)));
            return;
        }

        // The job may have finished between the first load and the
        // subscription taking effect.
        if let Ok(Some(current)) = queries::get_job(&state.db, job_id).await {
            if current.status.is_terminal() {
                yield Ok(sse_event(seq, &terminal_event(&current)));
                return;
            }
        }

        match subscription {
            Some(mut events) => loop {
                match tokio::time::timeout(IDLE_TIMEOUT, events.next()).await {
                    Ok(Some(event)) => {
                        yield Ok(sse_event(seq, &event));
                        seq += 1;
                        if event.is_terminal() {
                            return;
                        }
                    }
                    Ok(None) => {
                        debug!(%job_id, "event subscription closed");
                        return;
                    }
                    Err(_) => {
                        debug!(%job_id, "event stream idle, closing");
                        return;
                    }
                }
            },
            None => {
                // No event bus: poll the database instead.
                let mut last_progress = job.progress;
                let mut last_activity = tokio::time::Instant::now();
                loop {
                    tokio::time::sleep(POLL_INTERVAL).await;
                    let Ok(Some(current)) = queries::get_job(&state.db, job_id).await else {
                        return;
                    };
                    if current.status.is_terminal() {
                        yield Ok(sse_event(seq, &terminal_event(&current)));
                        return;
                    }
                    if current.progress != last_progress {
                        last_progress = current.progress;
                        last_activity = tokio::time::Instant::now();
                        yield Ok(sse_event(
                            seq,
                            &JobEvent::Processing {
                                progress: current.progress,
                            },
                        ));
                        seq += 1;
                    }
                    if last_activity.elapsed() >= IDLE_TIMEOUT {
                        debug!(%job_id, "polling event stream idle, closing");
                        return;
                    }
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEPALIVE_INTERVAL)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::models::job::ContentType;

    fn job_in(status: JobStatus) -> VerificationJob {
        VerificationJob {
            id: Uuid::new_v4(),
            status,
            content_type: ContentType::Text,
            content: "x".into(),
            progress: 100,
            result: Some(serde_json::json!({"verdict": "INFO"})),
            error: None,
            retry_count: 0,
            callback_token: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn completed_job_maps_to_completed_event() {
        let event = terminal_event(&job_in(JobStatus::Completed));
        match event {
            JobEvent::Completed { result } => assert_eq!(result["verdict"], "INFO"),
            other => panic!("expected completed, got {other:?}"),
        }
    }

    #[test]
    fn failed_job_maps_to_failed_event_with_fallback_message() {
        let mut job = job_in(JobStatus::Failed);
        job.error = None;
        match terminal_event(&job) {
            JobEvent::Failed { error } => assert_eq!(error, "verification failed"),
            other => panic!("expected failed, got {other:?}"),
        }

        job.error = Some("all extraction providers failed".into());
        match terminal_event(&job) {
            JobEvent::Failed { error } => assert!(error.contains("extraction")),
            other => panic!("expected failed, got {other:?}"),
        }
    }
}
