//! Single-flight lock: at most one worker pays for the expensive analysis of
//! a given fingerprint at a time.
//!
//! Acquisition is an atomic SET NX with a TTL safety net so a crashed holder
//! cannot deadlock the fingerprint. Release is conditional on still being the
//! recorded holder: a worker that outlived its TTL must not delete a lock a
//! newer worker has since taken. With no Redis configured the system prefers
//! availability over strict exactly-once and every acquire succeeds.

use std::time::Duration;

use redis::Script;
use tracing::warn;

const LOCK_PREFIX: &str = "verify:lock:";

/// Compare-and-delete: only the recorded holder may remove the lock.
const RELEASE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

pub struct SingleFlight {
    client: Option<redis::Client>,
    ttl: Duration,
}

impl SingleFlight {
    pub fn new(client: Option<redis::Client>) -> Self {
        Self {
            client,
            ttl: Duration::from_secs(600),
        }
    }

    #[cfg(test)]
    pub fn with_ttl(client: Option<redis::Client>, ttl: Duration) -> Self {
        Self { client, ttl }
    }

    /// Try to become the sole worker for `fingerprint`. Returns `true` when
    /// the lock was acquired (or when no lock store is configured / reachable,
    /// in which case dedup degrades rather than the job failing).
    pub async fn try_acquire(&self, fingerprint: &str, holder: &str) -> bool {
        let Some(client) = &self.client else {
            return true;
        };
        let mut conn = match client.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "lock store unreachable, proceeding without dedup");
                return true;
            }
        };

        let outcome: Result<Option<String>, redis::RedisError> = redis::cmd("SET")
            .arg(format!("{LOCK_PREFIX}{fingerprint}"))
            .arg(holder)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl.as_secs())
            .query_async(&mut conn)
            .await;

        match outcome {
            Ok(reply) => reply.is_some(),
            Err(e) => {
                warn!(error = %e, "lock acquire failed, proceeding without dedup");
                true
            }
        }
    }

    /// Release the lock if (and only if) `holder` still owns it.
    pub async fn release(&self, fingerprint: &str, holder: &str) {
        let Some(client) = &self.client else {
            return;
        };
        let mut conn = match client.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "lock store unreachable on release");
                return;
            }
        };

        let released: Result<i32, redis::RedisError> = Script::new(RELEASE_SCRIPT)
            .key(format!("{LOCK_PREFIX}{fingerprint}"))
            .arg(holder)
            .invoke_async(&mut conn)
            .await;

        match released {
            Ok(0) => warn!(fingerprint, "lock already expired or taken by another holder"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "lock release failed"),
        }
    }
}
