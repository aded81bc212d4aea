//! Incident listing, detail, report, and review endpoints.

use crate::error::{ApiError, ApiResult};
use crate::state::SharedState;
use aegis_core::{AegisError, Incident, IncidentStatus, Severity};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use aegis_engine::IncidentFilter;
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub severity: Option<String>,
    pub table_id: Option<i64>,
    pub since: Option<DateTime<Utc>>,
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_per_page")]
    pub per_page: usize,
}

fn default_page() -> usize {
    1
}

fn default_per_page() -> usize {
    50
}

pub async fn list(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Incident>>> {
    let status = match &query.status {
        Some(raw) => Some(IncidentStatus::parse(raw).ok_or_else(|| {
            ApiError(AegisError::Config(format!("unknown status {raw:?}")))
        })?),
        None => None,
    };
    let severity = match &query.severity {
        Some(raw) => Some(Severity::parse(raw).ok_or_else(|| {
            ApiError(AegisError::Config(format!("unknown severity {raw:?}")))
        })?),
        None => None,
    };

    let incidents = state.store.list_incidents(&IncidentFilter {
        status,
        severity,
        table_id: query.table_id,
        since: query.since,
        page: query.page,
        per_page: query.per_page,
    })?;
    Ok(Json(incidents))
}

pub async fn get(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Incident>> {
    let incident = state
        .store
        .get_incident(id)?
        .ok_or_else(|| ApiError(AegisError::NotFound(format!("incident {id}"))))?;
    Ok(Json(incident))
}

/// 200 with the report document, 204 when the incident exists but no report
/// was generated yet, 404 when the incident is absent.
pub async fn report(State(state): State<SharedState>, Path(id): Path<i64>) -> Response {
    let incident = match state.store.get_incident(id) {
        Ok(Some(incident)) => incident,
        Ok(None) => {
            return ApiError(AegisError::NotFound(format!("incident {id}"))).into_response()
        }
        Err(e) => return ApiError(e).into_response(),
    };

    match incident.report {
        Some(report) => Json(report).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ApproveRequest {
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DismissRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn approve(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    body: Option<Json<ApproveRequest>>,
) -> ApiResult<Json<Incident>> {
    let note = body.as_ref().and_then(|b| b.note.clone());
    let incident = state
        .orchestrator
        .approve(id, "api_user", note.as_deref())?;
    Ok(Json(incident))
}

pub async fn dismiss(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    body: Option<Json<DismissRequest>>,
) -> ApiResult<Json<Incident>> {
    let reason = body
        .as_ref()
        .and_then(|b| b.reason.clone())
        .ok_or(ApiError(AegisError::MissingReason))?;
    let incident = state.orchestrator.dismiss(id, &reason)?;
    Ok(Json(incident))
}
