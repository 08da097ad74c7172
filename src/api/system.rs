use super::{internal_error, AppState, ErrorBody};
use crate::sysutil;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Delay before self-SIGTERM so the response reaches the client first.
const SELF_TERM_DELAY: Duration = Duration::from_millis(500);

#[derive(Serialize)]
pub struct ShutdownResponse {
    status: &'static str,
    message: &'static str,
}

async fn disconnect_and_schedule_term(state: &AppState) {
    let service = Arc::clone(&state.service);
    let _ = tokio::task::spawn_blocking(move || service.shutdown()).await;
    tokio::spawn(async {
        tokio::time::sleep(SELF_TERM_DELAY).await;
        sysutil::terminate_self();
    });
}

/// Disconnects the PLC and terminates the process after the response is
/// sent; the supervisor decides whether to bring it back.
pub async fn shutdown(State(state): State<AppState>) -> Json<ShutdownResponse> {
    info!("shutdown requested via API");
    disconnect_and_schedule_term(&state).await;
    Json(ShutdownResponse {
        status: "shutting_down",
        message: "shutdown initiated, PLC connection closed",
    })
}

/// Emergency restart: identical to shutdown, the supervisor re-spawns
/// the process. Gated by ALLOW_FRONTEND_RESTART.
pub async fn restart(
    State(state): State<AppState>,
) -> Result<Json<ShutdownResponse>, (StatusCode, Json<ErrorBody>)> {
    if !state.allow_frontend_restart {
        warn!("restart request denied: ALLOW_FRONTEND_RESTART=false");
        return Err((
            StatusCode::FORBIDDEN,
            Json(ErrorBody {
                detail: "restart is not allowed (ALLOW_FRONTEND_RESTART=false)".to_owned(),
            }),
        ));
    }
    info!("restart requested via API (emergency)");
    disconnect_and_schedule_term(&state).await;
    Ok(Json(ShutdownResponse {
        status: "restarting",
        message: "restart initiated, waiting for supervisor recovery",
    }))
}

#[derive(Serialize)]
pub struct SyncTimeResponse {
    success: bool,
    synced_time: Option<String>,
    message: String,
}

/// Reads the PLC clock and sets the system clock from it. Requires
/// passwordless sudo for date(1); privilege failure is reported in the
/// body, never fatal.
pub async fn sync_time(
    State(state): State<AppState>,
) -> Result<Json<SyncTimeResponse>, (StatusCode, Json<ErrorBody>)> {
    let service = Arc::clone(&state.service);
    let plc_time = tokio::task::spawn_blocking(move || service.plc_timestamp())
        .await
        .map_err(internal_error)?
        .map_err(|e| {
            error!("time sync error: {}", e);
            internal_error(e)
        })?;
    let Some(plc_time) = plc_time else {
        return Ok(Json(SyncTimeResponse {
            success: false,
            synced_time: None,
            message: "PLC time unavailable (PLC disabled or not connected)".to_owned(),
        }));
    };
    let synced_time = plc_time.format("%Y-%m-%dT%H:%M:%S").to_string();
    let success = tokio::task::spawn_blocking(move || sysutil::set_system_clock(&plc_time))
        .await
        .unwrap_or(false);
    Ok(Json(SyncTimeResponse {
        success,
        synced_time: Some(synced_time),
        message: if success {
            "system clock synchronized".to_owned()
        } else {
            "failed to set system clock (insufficient privileges?)".to_owned()
        },
    }))
}
