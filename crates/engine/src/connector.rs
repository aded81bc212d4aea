//! Warehouse connector contract.
//!
//! Dialect drivers live outside the engine; the core sees only this
//! capability set. Every method can fail with a recoverable error
//! (connectivity, permission, unsupported) and no failure is fatal to the
//! scan loop.

use aegis_core::{ColumnDef, Dialect, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TableKind {
    Table,
    View,
}

/// One table as listed by the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableEntry {
    pub name: String,
    pub kind: TableKind,
    pub schema: String,
}

/// One captured statement from the warehouse query history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryLogEntry {
    pub sql: String,
    pub user: Option<String>,
    pub executed_at: DateTime<Utc>,
    pub duration_ms: Option<u64>,
}

/// Dialect-polymorphic introspection surface.
///
/// Contract notes:
/// - `list_schemas` must already exclude catalog/system schemas
///   (`Dialect::is_system_schema`).
/// - `fetch_columns` must return columns ordered by ordinal; snapshot
///   hashing depends on it.
/// - `fetch_last_update_time` picks the best available signal: MAX over
///   recognized audit columns first, catalog-reported modification time
///   second, `None` when neither exists. `None` means freshness is not
///   evaluable for the table.
/// - `extract_query_log` must include statements with target-modifying
///   semantics (INSERT, CREATE TABLE AS, MERGE).
/// - `dispose` releases pooled resources; callers invoke it on every exit
///   path they created the connector on.
#[async_trait]
pub trait WarehouseConnector: Send + Sync {
    fn dialect(&self) -> Dialect;

    async fn list_schemas(&self) -> Result<BTreeSet<String>>;

    async fn list_tables(&self, schema: &str) -> Result<Vec<TableEntry>>;

    async fn fetch_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnDef>>;

    async fn fetch_last_update_time(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Option<DateTime<Utc>>>;

    async fn extract_query_log(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueryLogEntry>>;

    /// Run a trivial probe to verify the connection works.
    async fn probe(&self) -> Result<()>;

    async fn dispose(&self);
}

/// Builds a connector from a decrypted URI. The concrete factory is injected
/// at startup; the engine never links warehouse drivers directly.
#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    async fn connect(&self, dialect: Dialect, uri: &str) -> Result<Box<dyn WarehouseConnector>>;
}
