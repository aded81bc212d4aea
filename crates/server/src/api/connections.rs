//! Connection CRUD, probe, and discovery endpoints.

use crate::error::{ApiError, ApiResult};
use crate::state::SharedState;
use aegis_core::{AegisError, CheckType, Connection, Dialect, DiscoveryReport};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct CreateConnectionRequest {
    pub name: String,
    pub dialect: String,
    /// Plaintext URI; sealed before it reaches the store.
    pub uri: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct UpdateConnectionRequest {
    pub name: Option<String>,
    pub uri: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ConnectionResponse {
    pub id: i64,
    pub name: String,
    pub dialect: Dialect,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<Connection> for ConnectionResponse {
    fn from(c: Connection) -> Self {
        ConnectionResponse {
            id: c.id,
            name: c.name,
            dialect: c.dialect,
            is_active: c.is_active,
            created_at: c.created_at,
        }
    }
}

fn parse_dialect(raw: &str) -> Result<Dialect, ApiError> {
    Dialect::parse(raw)
        .ok_or_else(|| ApiError(AegisError::Config(format!("unknown dialect {raw:?}"))))
}

pub async fn list(State(state): State<SharedState>) -> ApiResult<Json<Vec<ConnectionResponse>>> {
    let connections = state.store.list_connections()?;
    Ok(Json(connections.into_iter().map(Into::into).collect()))
}

pub async fn create(
    State(state): State<SharedState>,
    Json(body): Json<CreateConnectionRequest>,
) -> ApiResult<(StatusCode, Json<ConnectionResponse>)> {
    let dialect = parse_dialect(&body.dialect)?;
    let sealed = state.cipher.encrypt(&body.uri)?;
    let connection = state
        .store
        .insert_connection(&body.name, dialect, &sealed, body.is_active)?;
    Ok((StatusCode::CREATED, Json(connection.into())))
}

pub async fn get(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ConnectionResponse>> {
    let connection = state
        .store
        .get_connection(id)?
        .ok_or_else(|| ApiError(AegisError::NotFound(format!("connection {id}"))))?;
    Ok(Json(connection.into()))
}

pub async fn update(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateConnectionRequest>,
) -> ApiResult<Json<ConnectionResponse>> {
    let sealed = match &body.uri {
        Some(uri) => Some(state.cipher.encrypt(uri)?),
        None => None,
    };
    let connection = state.store.update_connection(
        id,
        body.name.as_deref(),
        sealed.as_deref(),
        body.is_active,
    )?;
    Ok(Json(connection.into()))
}

pub async fn delete(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    if state.store.delete_connection(id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError(AegisError::NotFound(format!("connection {id}"))))
    }
}

/// Run a trivial probe query; reports success or failure without leaking
/// connection details.
pub async fn test(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let connection = state
        .store
        .get_connection(id)?
        .ok_or_else(|| ApiError(AegisError::NotFound(format!("connection {id}"))))?;

    let outcome = async {
        let uri = state.cipher.decrypt(&connection.uri)?;
        let connector = state.factory.connect(connection.dialect, &uri).await?;
        let probed = connector.probe().await;
        connector.dispose().await;
        probed
    }
    .await;

    Ok(Json(match outcome {
        Ok(()) => json!({"success": true, "message": "connection ok"}),
        Err(e) => json!({"success": false, "message": e.to_string()}),
    }))
}

pub async fn discover(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<DiscoveryReport>> {
    let connection = state
        .store
        .get_connection(id)?
        .ok_or_else(|| ApiError(AegisError::NotFound(format!("connection {id}"))))?;

    let uri = state.cipher.decrypt(&connection.uri)?;
    let connector = state.factory.connect(connection.dialect, &uri).await?;
    let report = state.investigator.discover(connector.as_ref(), &connection).await;
    connector.dispose().await;

    Ok(Json(report?))
}

#[derive(Debug, Deserialize)]
pub struct TableSelection {
    pub schema: String,
    pub table: String,
    pub check_types: Vec<String>,
    #[serde(default)]
    pub freshness_sla_minutes: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub table_selections: Vec<TableSelection>,
}

/// Idempotent enrollment: already-monitored selections are skipped silently.
pub async fn confirm(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(body): Json<ConfirmRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .store
        .get_connection(id)?
        .ok_or_else(|| ApiError(AegisError::NotFound(format!("connection {id}"))))?;

    let mut enrolled = 0usize;
    let mut skipped = 0usize;
    for selection in &body.table_selections {
        let checks: Vec<CheckType> = selection
            .check_types
            .iter()
            .filter_map(|s| CheckType::parse(s))
            .collect();
        match state.store.enroll_if_absent(
            id,
            &selection.schema,
            &selection.table,
            &checks,
            selection.freshness_sla_minutes,
        )? {
            Some(_) => enrolled += 1,
            None => skipped += 1,
        }
    }

    Ok(Json(json!({"enrolled": enrolled, "skipped": skipped})))
}
