use super::{internal_error, AppState, ErrorBody};
use crate::plc::service::ServiceStatus;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use log::error;
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
pub struct ProductionResponse {
    line_name: String,
    production_type: u16,
    production_name: String,
    plan: u32,
    actual: u32,
    remain: u32,
    remain_pallet: f64,
    remain_min: u32,
    fully: u32,
    in_operating: bool,
    alarm: bool,
    alarm_msg: String,
    timestamp: String,
}

pub async fn get_production(
    State(state): State<AppState>,
) -> Result<Json<ProductionResponse>, (StatusCode, Json<ErrorBody>)> {
    let service = Arc::clone(&state.service);
    let snapshot = tokio::task::spawn_blocking(move || service.production_data())
        .await
        .map_err(|e| {
            error!("production data task failed: {}", e);
            internal_error(e)
        })?
        .map_err(|e| {
            error!("failed to get production data: {}", e);
            internal_error(e)
        })?;
    Ok(Json(ProductionResponse {
        remain: snapshot.plan.saturating_sub(snapshot.actual),
        line_name: snapshot.line_name,
        production_type: snapshot.production_type,
        production_name: snapshot.production_name,
        plan: snapshot.plan,
        actual: snapshot.actual,
        remain_pallet: snapshot.remain_pallet,
        remain_min: snapshot.remain_min,
        fully: snapshot.fully,
        in_operating: snapshot.in_operating,
        alarm: snapshot.alarm,
        alarm_msg: snapshot.alarm_msg,
        timestamp: snapshot.timestamp.format("%Y-%m-%dT%H:%M:%S").to_string(),
    }))
}

pub async fn get_status(State(state): State<AppState>) -> Json<ServiceStatus> {
    Json(state.service.status())
}
