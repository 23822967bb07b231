//! The verification pipeline a worker runs per job.
//!
//! Stages: fingerprint → cache lookup → single-flight lock → extraction
//! (video only) → gatekeeper classification → fact-check → persist + cache.
//! The single-flight lock is the sole mechanism preventing two workers from
//! paying for the same analysis concurrently; a loser re-checks the cache
//! and otherwise reports "already in progress" as a non-error outcome.

use tracing::{info, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::queries;
use crate::models::job::ContentType;
use crate::models::verdict::{Verdict, VerificationResult, PIPELINE_VERSION};
use crate::services::ai::ContentLabel;
use crate::services::events::JobEvent;
use crate::services::media::ExtractionArtifact;
use crate::services::queue::QueuedJob;
use crate::services::{claims, fingerprint};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Surfaced to the user as a short message; §extraction covers provider
    /// exhaustion and over-length videos.
    #[error("could not obtain the video: {0}")]
    Extraction(String),

    #[error("analysis dependency rejected the request: {0}")]
    CriticalDependency(String),

    #[error("database error")]
    Db(#[from] sqlx::Error),
}

/// How much of the pipeline each stage represents, for progress reporting.
mod progress {
    pub const STARTED: i32 = 5;
    pub const EXTRACTING: i32 = 15;
    pub const EXTRACTED: i32 = 35;
    pub const CLASSIFIED: i32 = 60;
    pub const VERIFIED: i32 = 85;
    pub const DONE: i32 = 100;
}

async fn report_progress(state: &AppState, job_id: Uuid, value: i32) {
    if let Err(e) = queries::update_job_progress(&state.db, job_id, value).await {
        warn!(%job_id, error = %e, "failed to persist job progress");
    }
    state
        .events
        .publish(job_id, &JobEvent::Processing { progress: value })
        .await;
}

/// Run the full pipeline for one job. Returns the result payload to persist
/// on the job row. Errors are job failures; duplicate-in-flight is a
/// successful degraded payload, not an error.
pub async fn run(state: &AppState, job: &QueuedJob) -> Result<serde_json::Value, PipelineError> {
    let started = std::time::Instant::now();
    report_progress(state, job.job_id, progress::STARTED).await;

    let fp = fingerprint::fingerprint(job.content_type, &job.content);

    if let Some(cached) = state.cache.lookup(&fp, &job.content).await? {
        info!(job_id = %job.job_id, "cache hit, skipping analysis");
        return Ok(result_payload(&cached));
    }

    let holder = Uuid::new_v4().to_string();
    if !state.lock.try_acquire(&fp, &holder).await {
        // The lock holder may have just finished; re-check before declaring
        // the duplicate in flight.
        if let Some(cached) = state.cache.lookup(&fp, &job.content).await? {
            return Ok(result_payload(&cached));
        }
        info!(job_id = %job.job_id, "duplicate in flight, not re-running analysis");
        metrics::counter!("verification_duplicate_in_flight_total").increment(1);
        return Ok(serde_json::json!({
            "in_progress": true,
            "message": "This content is already being verified. Retry shortly.",
        }));
    }

    let outcome = compute(state, job).await;
    // Release on every path; conditional on still holding (TTL may have
    // lapsed during a long extraction).
    state.lock.release(&fp, &holder).await;

    let mut result = outcome?;
    result.key_claim = result.key_claim.take().map(|c| c.trim().to_string());

    let duration_ms = started.elapsed().as_millis() as i64;
    let check_id = queries::create_check(
        &state.db,
        job.content_type,
        &job.content,
        &fp,
        &result,
        duration_ms,
    )
    .await?;
    result.check_id = Some(check_id);

    state.cache.store(&fp, &result).await;
    report_progress(state, job.job_id, progress::DONE).await;

    Ok(result_payload(&result))
}

fn result_payload(result: &VerificationResult) -> serde_json::Value {
    serde_json::to_value(result).unwrap_or_else(|_| serde_json::json!({}))
}

/// The expensive path: extraction, classification, verification. Owns any
/// media artifact for its whole scope so temp files are deleted on every
/// exit, success or failure.
async fn compute(state: &AppState, job: &QueuedJob) -> Result<VerificationResult, PipelineError> {
    let analysis_text = match job.content_type {
        ContentType::Text => job.content.trim().to_string(),
        ContentType::Video => {
            report_progress(state, job.job_id, progress::EXTRACTING).await;
            let artifact = state
                .providers
                .process(job.content.trim())
                .await
                .map_err(|e| PipelineError::Extraction(e.to_string()))?;
            report_progress(state, job.job_id, progress::EXTRACTED).await;

            match &artifact {
                ExtractionArtifact::Text(text) => text.clone(),
                ExtractionArtifact::Audio(media) => state
                    .ai
                    .transcribe(media.path())
                    .await
                    .map_err(|e| PipelineError::CriticalDependency(e.to_string()))?,
            }
            // `artifact` drops here; any temp file is deleted.
        }
    };

    if analysis_text.trim().chars().count() < 10 {
        // Not a hard failure: tell the user why there is nothing to check.
        return Ok(no_speech_result());
    }

    let classification = state
        .ai
        .classify_content(&analysis_text)
        .await
        .map_err(|e| PipelineError::CriticalDependency(e.to_string()))?;
    report_progress(state, job.job_id, progress::CLASSIFIED).await;

    if classification.label != ContentLabel::Claims {
        info!(
            job_id = %job.job_id,
            label = %classification.label,
            "gatekeeper short-circuit, no fact-check call"
        );
        return Ok(gatekeeper_result(&classification));
    }

    // Pick the strongest checkable sentence, or fall back to the full text.
    let extraction = claims::extract(&analysis_text);
    let prompt_text = match &extraction {
        Some(ex) if ex.confidence > claims::CONFIDENCE_THRESHOLD => ex.best_claim.clone(),
        _ => analysis_text.clone(),
    };

    let mut result = state
        .ai
        .verify_claim(&prompt_text)
        .await
        .map_err(|e| PipelineError::CriticalDependency(e.to_string()))?;
    report_progress(state, job.job_id, progress::VERIFIED).await;

    result.key_claim = Some(prompt_text);
    result.enforce_trust_rule();
    Ok(result)
}

fn no_speech_result() -> VerificationResult {
    VerificationResult {
        verdict: Verdict::Uncertain,
        confidence: 1.0,
        summary: "No usable speech or text was found. The audio may be silent, music-only, \
                  or too low quality to transcribe."
            .to_string(),
        key_claim: None,
        sources: Vec::new(),
        breakdown: Vec::new(),
        model_used: "gatekeeper".to_string(),
        pipeline_version: PIPELINE_VERSION.to_string(),
        check_id: None,
    }
}

fn gatekeeper_result(classification: &crate::services::ai::Classification) -> VerificationResult {
    let summary = match classification.label {
        ContentLabel::Song => format!(
            "This is a music track: \"{}\". Song lyrics carry no checkable facts.",
            classification.title.as_deref().unwrap_or("unknown")
        ),
        _ => {
            if classification.summary.is_empty() {
                "This looks like entertainment content with nothing to verify.".to_string()
            } else {
                classification.summary.clone()
            }
        }
    };
    let verdict = match classification.label {
        ContentLabel::Noise => Verdict::Uncertain,
        _ => Verdict::Info,
    };
    VerificationResult {
        verdict,
        confidence: 1.0,
        summary,
        key_claim: Some("Content does not require verification".to_string()),
        sources: Vec::new(),
        breakdown: Vec::new(),
        model_used: "gatekeeper".to_string(),
        pipeline_version: PIPELINE_VERSION.to_string(),
        check_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ai::Classification;

    #[test]
    fn gatekeeper_song_result_mentions_title() {
        let result = gatekeeper_result(&Classification {
            label: ContentLabel::Song,
            title: Some("Never Gonna Give You Up".to_string()),
            summary: String::new(),
        });
        assert_eq!(result.verdict, Verdict::Info);
        assert!(result.summary.contains("Never Gonna Give You Up"));
        assert!(result.sources.is_empty());
    }

    #[test]
    fn gatekeeper_noise_is_uncertain() {
        let result = gatekeeper_result(&Classification {
            label: ContentLabel::Noise,
            title: None,
            summary: "No usable speech detected.".to_string(),
        });
        assert_eq!(result.verdict, Verdict::Uncertain);
    }

    #[test]
    fn no_speech_result_is_not_assertive() {
        let result = no_speech_result();
        assert_eq!(result.verdict, Verdict::Uncertain);
        assert!(result.summary.contains("speech"));
    }
}
