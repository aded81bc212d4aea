//! Shared application state.

use aegis_engine::{
    ConnectorFactory, Investigator, LineageService, Notifier, Orchestrator, Scanner, Store,
    UriCipher,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub struct AppState {
    pub store: Arc<Store>,
    pub notifier: Arc<Notifier>,
    pub orchestrator: Arc<Orchestrator>,
    pub lineage: Arc<LineageService>,
    pub investigator: Arc<Investigator>,
    pub scanner: Scanner,
    pub cipher: UriCipher,
    pub factory: Arc<dyn ConnectorFactory>,
    pub api_key: Option<String>,
    pub started_at: DateTime<Utc>,
}

pub type SharedState = Arc<AppState>;
