//! Monitored-table endpoints.

use crate::error::{ApiError, ApiResult};
use crate::state::SharedState;
use aegis_core::{AegisError, CheckType, MonitoredTable};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub connection_id: Option<i64>,
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

#[derive(Debug, Deserialize)]
pub struct CreateTableRequest {
    pub connection_id: i64,
    pub schema_name: String,
    pub table_name: String,
    pub check_types: Vec<String>,
    #[serde(default)]
    pub freshness_sla_minutes: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTableRequest {
    pub check_types: Option<Vec<String>>,
    pub freshness_sla_minutes: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TableResponse {
    #[serde(flatten)]
    pub table: MonitoredTable,
    pub fully_qualified_name: String,
}

impl From<MonitoredTable> for TableResponse {
    fn from(table: MonitoredTable) -> Self {
        TableResponse {
            fully_qualified_name: table.fully_qualified_name(),
            table,
        }
    }
}

fn parse_checks(names: &[String]) -> ApiResult<Vec<CheckType>> {
    names
        .iter()
        .map(|name| {
            CheckType::parse(name).ok_or_else(|| {
                ApiError(AegisError::Config(format!("unknown check type {name:?}")))
            })
        })
        .collect()
}

pub async fn list(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<TableResponse>>> {
    let per_page = query.per_page.clamp(1, 200);
    let offset = query.page.saturating_sub(1) * per_page;
    let tables = state
        .store
        .list_tables(query.connection_id, per_page, offset)?;
    Ok(Json(tables.into_iter().map(Into::into).collect()))
}

pub async fn create(
    State(state): State<SharedState>,
    Json(body): Json<CreateTableRequest>,
) -> ApiResult<(StatusCode, Json<TableResponse>)> {
    let checks = parse_checks(&body.check_types)?;
    let table = state.store.insert_table(
        body.connection_id,
        &body.schema_name,
        &body.table_name,
        &checks,
        body.freshness_sla_minutes,
    )?;
    Ok((StatusCode::CREATED, Json(table.into())))
}

pub async fn get(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<TableResponse>> {
    let table = state
        .store
        .get_table(id)?
        .ok_or_else(|| ApiError(AegisError::NotFound(format!("table {id}"))))?;
    Ok(Json(table.into()))
}

pub async fn update(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateTableRequest>,
) -> ApiResult<Json<TableResponse>> {
    let checks = match &body.check_types {
        Some(names) => Some(parse_checks(names)?),
        None => None,
    };
    let table = state.store.update_table(
        id,
        checks.as_deref(),
        body.freshness_sla_minutes.map(Some),
    )?;
    Ok(Json(table.into()))
}

pub async fn delete(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    if state.store.delete_table(id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError(AegisError::NotFound(format!("table {id}"))))
    }
}
