use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

/// Open the PostgreSQL pool shared by the gateway and the worker.
///
/// Sized for this deployment: a handful of request handlers plus two
/// pipeline workers, each holding at most one connection at a time.
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(300))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Apply pending migrations from ./migrations at startup.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

pub mod queries;
