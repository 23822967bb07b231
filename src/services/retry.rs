//! Resilient execution of network-bound external calls.
//!
//! Failures are classified as critical (authentication, authorization, quota)
//! or transient (everything else). Critical failures abort immediately;
//! transient ones are retried with exponential backoff until the attempt
//! budget runs out, at which point the last error surfaces to the caller.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Classified failure of an external dependency call.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// Auth/quota class failure: retrying cannot help.
    #[error("{0}")]
    Critical(String),

    /// Anything else: worth retrying.
    #[error("{0}")]
    Transient(String),
}

impl CallError {
    pub fn is_critical(&self) -> bool {
        matches!(self, CallError::Critical(_))
    }

    /// Classify by HTTP status where one exists; status is the structured
    /// contract, message sniffing below is only a fallback.
    pub fn from_status(status: reqwest::StatusCode, message: String) -> Self {
        if matches!(status.as_u16(), 401 | 402 | 403) {
            CallError::Critical(message)
        } else {
            CallError::Transient(message)
        }
    }

    /// Fallback classification for errors that carry no status code.
    pub fn from_message(message: String) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("quota")
            || lower.contains("forbidden")
            || lower.contains("invalid api key")
        {
            CallError::Critical(message)
        } else {
            CallError::Transient(message)
        }
    }
}

impl From<reqwest::Error> for CallError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => CallError::from_status(status, err.to_string()),
            None => CallError::from_message(err.to_string()),
        }
    }
}

/// Run `op` up to `max_attempts` times with exponential backoff
/// (`base_delay * 2^attempt` between attempts). A critical error aborts on
/// the spot; exhausted retries surface the last transient error.
pub async fn call_with_retry<T, F, Fut>(
    mut op: F,
    max_attempts: u32,
    base_delay: Duration,
) -> Result<T, CallError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CallError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_critical() => return Err(err),
            Err(err) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(err);
                }
                warn!(
                    attempt,
                    max_attempts,
                    error = %err,
                    "external call failed, backing off"
                );
                tokio::time::sleep(base_delay * 2u32.pow(attempt - 1)).await;
            }
        }
    }
}
