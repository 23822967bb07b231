use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: ComponentHealth,
    pub queue: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

/// GET /health — comprehensive health check with dependency status.
///
/// A missing queue is reported as "offline" and degrades the overall status
/// without failing the endpoint: the service still answers reads.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let start = std::time::Instant::now();

    let db_check = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => ComponentHealth {
            status: "ok".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
        Err(_) => ComponentHealth {
            status: "error".to_string(),
            latency_ms: None,
        },
    };

    let queue_check = match &state.queue {
        Some(queue) => {
            let queue_start = std::time::Instant::now();
            match queue.health_check().await {
                Ok(_) => {
                    if let Ok(depth) = queue.queue_depth().await {
                        metrics::gauge!("verification_queue_depth").set(depth as f64);
                    }
                    ComponentHealth {
                        status: "ok".to_string(),
                        latency_ms: Some(queue_start.elapsed().as_millis() as u64),
                    }
                }
                Err(_) => ComponentHealth {
                    status: "error".to_string(),
                    latency_ms: None,
                },
            }
        }
        None => ComponentHealth {
            status: "offline".to_string(),
            latency_ms: None,
        },
    };

    let db_ok = db_check.status == "ok";
    let all_healthy = db_ok && queue_check.status == "ok";
    let status_code = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy {
            "ok".to_string()
        } else if db_ok {
            "degraded".to_string()
        } else {
            "error".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            database: db_check,
            queue: queue_check,
        },
    };

    (status_code, Json(response))
}
