use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::ContentType;

/// Request to submit content for verification.
#[derive(Debug, Deserialize, Validate)]
pub struct VerifyRequest {
    /// Explicit content kind. When omitted, URLs are treated as video
    /// references and everything else as free text.
    #[garde(skip)]
    pub content_type: Option<ContentType>,

    #[garde(length(min = 1, max = 8192))]
    pub content: String,

    /// Opaque token a downstream notifier can use; carried through the job
    /// untouched.
    #[garde(length(max = 512))]
    pub callback_token: Option<String>,
}

/// Response after queuing a verification job.
#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub status: String,
    pub job_id: Uuid,
}

/// Response for polling job status.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub id: Uuid,
    pub state: String,
    pub progress: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Short machine-readable error body for rejected requests.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
