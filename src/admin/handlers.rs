use axum::{extract::State, Json};
use serde::Serialize;

use crate::load_balancer::BackendHealthSummary;

use super::AdminState;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    /// `operational`, `degraded` (some backends unhealthy) or `unavailable`.
    pub status: &'static str,
    pub policy: &'static str,
    pub uptime_secs: u64,
    pub backends_total: usize,
    pub backends_healthy: usize,
    pub open_connections: u64,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let summary = state.registry.health_summary();
    let total = summary.len();
    let healthy = summary.iter().filter(|b| b.healthy).count();

    let status = if healthy == 0 {
        "unavailable"
    } else if healthy < total {
        "degraded"
    } else {
        "operational"
    };

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status,
        policy: state.policy,
        uptime_secs: state.started.elapsed().as_secs(),
        backends_total: total,
        backends_healthy: healthy,
        open_connections: state.tracker.active_count(),
    })
}

pub async fn get_backends(State(state): State<AdminState>) -> Json<Vec<BackendHealthSummary>> {
    Json(state.registry.health_summary())
}
