use crate::master::ProductionTypeConfig;
use chrono::NaiveDateTime;
use serde::Serialize;

/// One assembled observation of line state, created per request.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub line_name: String,
    pub production_type: u16,
    pub production_name: String,
    pub plan: u32,
    pub actual: u32,
    pub in_operating: bool,
    pub alarm: bool,
    pub alarm_msg: String,
    /// Minutes left to complete the plan, rounded up.
    pub remain_min: u32,
    /// Pallets left to complete the plan, one decimal.
    pub remain_pallet: f64,
    pub fully: u32,
    pub timestamp: NaiveDateTime,
}

/// `ceil((plan - actual) * seconds_per_product / 60)`, clamped to >= 0.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn remain_minutes(plan: u32, actual: u32, config: &ProductionTypeConfig) -> u32 {
    let remaining = plan.saturating_sub(actual);
    let minutes = f64::from(remaining) * config.seconds_per_product / 60.0;
    minutes.ceil() as u32
}

/// `(plan - actual) / fully`, rounded to one decimal, clamped to >= 0.
pub fn remain_pallet(plan: u32, actual: u32, config: &ProductionTypeConfig) -> f64 {
    let remaining = plan.saturating_sub(actual);
    let pallets = f64::from(remaining) / f64::from(config.fully);
    (pallets * 10.0).round() / 10.0
}
