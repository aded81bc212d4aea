//! Lineage graph endpoints.

use crate::error::ApiResult;
use crate::state::SharedState;
use aegis_core::{BlastRadius, LineageGraphView, LineageNode};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct TraversalQuery {
    #[serde(default = "default_depth")]
    pub depth: u32,
    #[serde(default)]
    pub min_confidence: f64,
}

fn default_depth() -> u32 {
    aegis_engine::lineage::DEFAULT_DEPTH
}

pub async fn graph(State(state): State<SharedState>) -> ApiResult<Json<LineageGraphView>> {
    Ok(Json(state.lineage.graph()?))
}

pub async fn upstream(
    State(state): State<SharedState>,
    Path(table): Path<String>,
    Query(query): Query<TraversalQuery>,
) -> ApiResult<Json<Vec<LineageNode>>> {
    Ok(Json(state.lineage.upstream(
        &table,
        query.depth,
        query.min_confidence,
    )?))
}

pub async fn downstream(
    State(state): State<SharedState>,
    Path(table): Path<String>,
    Query(query): Query<TraversalQuery>,
) -> ApiResult<Json<Vec<LineageNode>>> {
    Ok(Json(state.lineage.downstream(
        &table,
        query.depth,
        query.min_confidence,
    )?))
}

pub async fn blast_radius(
    State(state): State<SharedState>,
    Path(table): Path<String>,
) -> ApiResult<Json<BlastRadius>> {
    Ok(Json(state.lineage.blast_radius(&table)?))
}
