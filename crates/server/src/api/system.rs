//! Health, status, stats, and the manual scan trigger.

use crate::error::ApiResult;
use crate::state::SharedState;
use aegis_engine::DashboardStats;
use axum::extract::State;
use axum::Json;
use serde_json::json;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "aegis",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn status(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(json!({
        "scanner": "running",
        "started_at": state.started_at,
        "websocket_clients": state.notifier.subscriber_count(),
        "last_event_seq": state.notifier.last_seq(),
    }))
}

pub async fn stats(State(state): State<SharedState>) -> ApiResult<Json<DashboardStats>> {
    Ok(Json(state.store.dashboard_stats()?))
}

/// Run one scan cycle now, sharing the implementation with the background
/// cadence.
pub async fn trigger_scan(State(state): State<SharedState>) -> ApiResult<Json<serde_json::Value>> {
    let summary = state.scanner.run_scan_cycle().await?;
    Ok(Json(json!({
        "status": "scan_completed",
        "tables_scanned": summary.tables_scanned,
        "anomalies_found": summary.anomalies_found,
        "duration_ms": summary.duration_ms,
    })))
}
