//! Thin HTTP adapters over the PLC service: the entire failure surface
//! of every handler is what the service reports.

use crate::plc::PlcService;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

pub mod production;
pub mod system;

const EXECUTOR_PING_TIMEOUT: Duration = Duration::from_secs(1);

pub struct ApiState {
    pub service: Arc<PlcService>,
    pub allow_frontend_restart: bool,
}

pub type AppState = Arc<ApiState>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/api/production", get(production::get_production))
        .route("/api/status", get(production::get_status))
        .route("/api/shutdown", post(system::shutdown))
        .route("/api/restart", post(system::restart))
        .route("/api/system/sync-time", post(system::sync_time))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

pub(crate) fn internal_error<E: std::fmt::Display>(e: E) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            detail: e.to_string(),
        }),
    )
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    pid: u32,
}

/// Liveness only: answers in milliseconds, no PLC traffic. The
/// supervisor polls this.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        pid: process::id(),
    })
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
    pub pid: u32,
    pub thread_pool_ok: bool,
    pub plc_service_ready: bool,
    pub plc_alive: bool,
}

/// `ok` iff everything answers; `degraded` iff only the PLC link is
/// down; `unhealthy` otherwise.
pub(crate) fn classify_readiness(
    thread_pool_ok: bool,
    plc_service_ready: bool,
    plc_alive: bool,
) -> &'static str {
    if thread_pool_ok && plc_service_ready {
        if plc_alive {
            "ok"
        } else {
            "degraded"
        }
    } else {
        "unhealthy"
    }
}

async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    let service = Arc::clone(&state.service);
    let thread_pool_ok =
        tokio::task::spawn_blocking(move || service.executor_alive(EXECUTOR_PING_TIMEOUT))
            .await
            .unwrap_or(false);
    let plc_service_ready = state.service.ready();
    let plc_alive = if thread_pool_ok {
        let service = Arc::clone(&state.service);
        tokio::task::spawn_blocking(move || service.ping())
            .await
            .unwrap_or(false)
    } else {
        // the executor is wedged, a ping would only queue behind it
        false
    };
    Json(ReadyResponse {
        status: classify_readiness(thread_pool_ok, plc_service_ready, plc_alive),
        pid: process::id(),
        thread_pool_ok,
        plc_service_ready,
        plc_alive,
    })
}

#[cfg(test)]
mod tests {
    use super::classify_readiness;

    #[test]
    fn readiness_classification() {
        assert_eq!(classify_readiness(true, true, true), "ok");
        assert_eq!(classify_readiness(true, true, false), "degraded");
        assert_eq!(classify_readiness(false, true, true), "unhealthy");
        assert_eq!(classify_readiness(true, false, true), "unhealthy");
        assert_eq!(classify_readiness(false, false, false), "unhealthy");
        assert_eq!(classify_readiness(false, true, false), "unhealthy");
        assert_eq!(classify_readiness(true, false, false), "unhealthy");
        assert_eq!(classify_readiness(false, false, true), "unhealthy");
    }
}
