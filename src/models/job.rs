use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of content submitted for verification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ContentType {
    Text,
    Video,
}

/// Status of a verification job in the async queue.
///
/// Terminal states (`Completed`, `Failed`) are final; a job never leaves them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// A content verification job as stored in Postgres.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationJob {
    pub id: Uuid,
    pub status: JobStatus,
    pub content_type: ContentType,
    pub content: String,
    pub progress: i32,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub retry_count: i32,
    pub callback_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_round_trips_through_strings() {
        for (s, status) in [
            ("queued", JobStatus::Queued),
            ("processing", JobStatus::Processing),
            ("completed", JobStatus::Completed),
            ("failed", JobStatus::Failed),
        ] {
            assert_eq!(JobStatus::from_str(s).unwrap(), status);
            assert_eq!(status.to_string(), s);
        }
    }

    #[test]
    fn terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }
}
