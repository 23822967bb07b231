//! Two-tier read-through result cache.
//!
//! Tier 1 is Redis (sub-millisecond, 24h TTL, may be absent or down — always
//! a soft miss, never an error). Tier 2 is Postgres, keyed by
//! (content, pipeline_version) with the most recent row winning; a hit there
//! backfills Redis. Durable persistence happens once at compute time through
//! `db::queries::create_check`, not here on every hit.

use redis::AsyncCommands;
use sqlx::PgPool;
use tracing::{debug, warn};

use crate::db::queries;
use crate::models::verdict::{VerificationResult, PIPELINE_VERSION};

const RESULT_PREFIX: &str = "verify:result:";
const RESULT_TTL_SECS: u64 = 86_400;

pub struct ResultCache {
    redis: Option<redis::Client>,
    db: PgPool,
}

impl ResultCache {
    pub fn new(redis: Option<redis::Client>, db: PgPool) -> Self {
        Self { redis, db }
    }

    /// Look up a previously computed result. Redis errors degrade to the
    /// persistent tier; only a Postgres failure is a real error.
    pub async fn lookup(
        &self,
        fingerprint: &str,
        content: &str,
    ) -> Result<Option<VerificationResult>, sqlx::Error> {
        if let Some(cached) = self.redis_get(fingerprint).await {
            debug!(fingerprint, "result cache hit (redis)");
            metrics::counter!("verification_cache_hits_total", "tier" => "redis").increment(1);
            return Ok(Some(cached));
        }

        let persisted = queries::find_latest_check(&self.db, content, PIPELINE_VERSION).await?;
        if let Some(result) = &persisted {
            debug!(fingerprint, "result cache hit (postgres)");
            metrics::counter!("verification_cache_hits_total", "tier" => "postgres").increment(1);
            self.redis_set(fingerprint, result).await;
        }
        Ok(persisted)
    }

    /// Write the ephemeral tier. Failures are logged and swallowed: a job is
    /// never blocked on the cache.
    pub async fn store(&self, fingerprint: &str, result: &VerificationResult) {
        self.redis_set(fingerprint, result).await;
    }

    async fn redis_get(&self, fingerprint: &str) -> Option<VerificationResult> {
        let client = self.redis.as_ref()?;
        let mut conn = match client.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "redis unavailable, treating as cache miss");
                return None;
            }
        };
        let raw: Option<String> = match conn.get(format!("{RESULT_PREFIX}{fingerprint}")).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "redis GET failed, treating as cache miss");
                return None;
            }
        };
        raw.and_then(|s| serde_json::from_str(&s).ok())
    }

    async fn redis_set(&self, fingerprint: &str, result: &VerificationResult) {
        let Some(client) = &self.redis else { return };
        let Ok(payload) = serde_json::to_string(result) else {
            return;
        };
        let mut conn = match client.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "redis unavailable, skipping cache write");
                return;
            }
        };
        if let Err(e) = conn
            .set_ex::<_, _, ()>(format!("{RESULT_PREFIX}{fingerprint}"), payload, RESULT_TTL_SECS)
            .await
        {
            warn!(error = %e, "redis SETEX failed, skipping cache write");
        }
    }
}
