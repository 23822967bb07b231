//! Job lifecycle event bus.
//!
//! Workers publish progress and terminal events onto a per-job Redis pub/sub
//! channel; the API gateway's SSE route subscribes to it. Without Redis the
//! publisher degrades to a no-op and live streaming falls back to polling.

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

const CHANNEL_PREFIX: &str = "verify:events:";

/// One job lifecycle event. `Completed` and `Failed` are terminal; a
/// subscriber sees at most one terminal event per connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobEvent {
    Processing { progress: i32 },
    Completed { result: serde_json::Value },
    Failed { error: String },
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Completed { .. } | JobEvent::Failed { .. })
    }
}

pub struct EventPublisher {
    client: Option<redis::Client>,
}

impl EventPublisher {
    pub fn new(client: Option<redis::Client>) -> Self {
        Self { client }
    }

    pub fn is_live(&self) -> bool {
        self.client.is_some()
    }

    /// Publish an event for a job. Best effort: listeners also have the
    /// database state to fall back on, so failures are logged and swallowed.
    pub async fn publish(&self, job_id: Uuid, event: &JobEvent) {
        let Some(client) = &self.client else { return };
        let Ok(payload) = serde_json::to_string(event) else {
            return;
        };
        let mut conn = match client.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "event bus unreachable, dropping event");
                return;
            }
        };
        let channel = format!("{CHANNEL_PREFIX}{job_id}");
        if let Err(e) = redis::AsyncCommands::publish::<_, _, ()>(&mut conn, &channel, &payload).await
        {
            warn!(error = %e, "event publish failed");
        }
    }

    /// Subscribe to a job's event feed. Returns `None` when no event bus is
    /// configured. Dropping the stream tears the subscription down.
    pub async fn subscribe(&self, job_id: Uuid) -> Option<BoxStream<'static, JobEvent>> {
        let client = self.client.as_ref()?;
        let mut pubsub = match client.get_async_pubsub().await {
            Ok(pubsub) => pubsub,
            Err(e) => {
                warn!(error = %e, "event bus unreachable, subscription unavailable");
                return None;
            }
        };
        let channel = format!("{CHANNEL_PREFIX}{job_id}");
        if let Err(e) = pubsub.subscribe(&channel).await {
            warn!(error = %e, "event subscription failed");
            return None;
        }
        debug!(%job_id, "subscribed to job events");

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move {
                let payload: String = msg.get_payload().ok()?;
                serde_json::from_str::<JobEvent>(&payload).ok()
            })
            .boxed();
        Some(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_payload_shape() {
        let processing = serde_json::to_value(JobEvent::Processing { progress: 40 }).unwrap();
        assert_eq!(processing["status"], "processing");
        assert_eq!(processing["progress"], 40);

        let failed = serde_json::to_value(JobEvent::Failed {
            error: "boom".into(),
        })
        .unwrap();
        assert_eq!(failed["status"], "failed");
        assert_eq!(failed["error"], "boom");
    }

    #[test]
    fn terminal_classification() {
        assert!(!JobEvent::Processing { progress: 10 }.is_terminal());
        assert!(JobEvent::Completed {
            result: serde_json::json!({})
        }
        .is_terminal());
        assert!(JobEvent::Failed { error: "e".into() }.is_terminal());
    }

    #[tokio::test]
    async fn publish_without_bus_is_a_noop() {
        let publisher = EventPublisher::new(None);
        publisher
            .publish(Uuid::new_v4(), &JobEvent::Processing { progress: 1 })
            .await;
        assert!(publisher.subscribe(Uuid::new_v4()).await.is_none());
        assert!(!publisher.is_live());
    }
}
