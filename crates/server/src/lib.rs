//! Aegis Server Library
//!
//! Exposes the router builder and application state so integration tests can
//! drive the API in-process.

pub mod api;
pub mod auth;
pub mod config;
pub mod drivers;
pub mod error;
pub mod state;

pub use config::Config;
pub use state::{AppState, SharedState};

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

/// Build the full application router. `/health` and `/ws` skip auth; every
/// other route requires the configured API key.
pub fn build_router(state: SharedState) -> Router {
    let protected = Router::new()
        .route(
            "/connections",
            get(api::connections::list).post(api::connections::create),
        )
        .route(
            "/connections/:id",
            get(api::connections::get)
                .put(api::connections::update)
                .delete(api::connections::delete),
        )
        .route("/connections/:id/test", post(api::connections::test))
        .route("/connections/:id/discover", post(api::connections::discover))
        .route(
            "/connections/:id/discover/confirm",
            post(api::connections::confirm),
        )
        .route("/tables", get(api::tables::list).post(api::tables::create))
        .route(
            "/tables/:id",
            get(api::tables::get)
                .put(api::tables::update)
                .delete(api::tables::delete),
        )
        .route("/incidents", get(api::incidents::list))
        .route("/incidents/:id", get(api::incidents::get))
        .route("/incidents/:id/report", get(api::incidents::report))
        .route("/incidents/:id/approve", post(api::incidents::approve))
        .route("/incidents/:id/dismiss", post(api::incidents::dismiss))
        .route("/lineage/graph", get(api::lineage::graph))
        .route("/lineage/:table/upstream", get(api::lineage::upstream))
        .route("/lineage/:table/downstream", get(api::lineage::downstream))
        .route(
            "/lineage/:table/blast-radius",
            get(api::lineage::blast_radius),
        )
        .route("/stats", get(api::system::stats))
        .route("/status", get(api::system::status))
        .route("/scan/trigger", post(api::system::trigger_scan))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    let open = Router::new()
        .route("/health", get(api::system::health))
        .route("/ws", get(api::ws::upgrade));

    Router::new()
        .nest("/api/v1", protected.merge(open))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
