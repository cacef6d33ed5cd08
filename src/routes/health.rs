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
    pub queue: QueueHealth,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub storage: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub backend: &'static str,
    pub latency_ms: Option<u64>,
}

#[derive(Serialize)]
pub struct QueueHealth {
    pub depth: usize,
    pub worker_active: bool,
    pub tracked_jobs: usize,
    pub dispatch_delay_ms: u64,
}

/// GET /health: blob store reachability plus queue state.
pub async fn health_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let start = std::time::Instant::now();

    let storage = match state.store.health_check().await {
        Ok(()) => ComponentHealth {
            status: "ok".to_string(),
            backend: state.store.backend(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
        Err(e) => {
            tracing::warn!(backend = state.store.backend(), error = %e, "Blob store health check failed");
            ComponentHealth {
                status: "error".to_string(),
                backend: state.store.backend(),
                latency_ms: None,
            }
        }
    };

    let queue = QueueHealth {
        depth: state.queue.depth().await,
        worker_active: state.queue.is_worker_active().await,
        tracked_jobs: state.queue.table().len().await,
        dispatch_delay_ms: state.queue.settings().dispatch_delay.as_millis() as u64,
    };

    let healthy = storage.status == "ok";
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if healthy {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks { storage },
        queue,
    };

    (status_code, Json(response))
}
