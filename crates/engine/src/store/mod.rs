//! Entity store over SQLite.
//!
//! One table per entity. Writes that must be consistent together (snapshot +
//! anomaly, incident dedup + insert, status transition + document persist)
//! run inside a single transaction; SQLite's write lock makes the
//! dedup-lookup-then-insert sequence serializable.

mod anomalies;
mod connections;
mod incidents;
mod lineage;
mod snapshots;
mod stats;
mod tables;

pub use incidents::{IncidentFilter, Routed};
pub use stats::DashboardStats;

use aegis_core::{AegisError, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.configure()?;
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.configure()?;
        store.init_schema()?;
        Ok(store)
    }

    fn configure(&self) -> Result<()> {
        let conn = self.lock();
        // WAL keeps readers off the writer's lock; FKs drive delete-cascade.
        // journal_mode reports the resulting mode back, so it needs the
        // checked variant (in-memory databases answer "memory").
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
            .map_err(db_err)?;
        conn.pragma_update(None, "foreign_keys", "ON").map_err(db_err)?;
        Ok(())
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS connections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                dialect TEXT NOT NULL,
                uri TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS monitored_tables (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                connection_id INTEGER NOT NULL
                    REFERENCES connections(id) ON DELETE CASCADE,
                schema_name TEXT NOT NULL,
                table_name TEXT NOT NULL,
                check_types TEXT NOT NULL,
                freshness_sla_minutes INTEGER,
                created_at TEXT NOT NULL,
                UNIQUE (connection_id, schema_name, table_name)
            );

            CREATE TABLE IF NOT EXISTS schema_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                table_id INTEGER NOT NULL
                    REFERENCES monitored_tables(id) ON DELETE CASCADE,
                columns TEXT NOT NULL,
                snapshot_hash TEXT NOT NULL,
                captured_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS anomalies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                table_id INTEGER NOT NULL
                    REFERENCES monitored_tables(id) ON DELETE CASCADE,
                type TEXT NOT NULL,
                severity TEXT NOT NULL,
                detail TEXT NOT NULL,
                detected_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS incidents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                anomaly_id INTEGER NOT NULL
                    REFERENCES anomalies(id) ON DELETE CASCADE,
                table_id INTEGER NOT NULL,
                anomaly_type TEXT NOT NULL,
                status TEXT NOT NULL,
                severity TEXT NOT NULL,
                diagnosis TEXT,
                remediation TEXT,
                blast_radius TEXT NOT NULL DEFAULT '[]',
                report TEXT,
                error TEXT,
                resolved_at TEXT,
                resolved_by TEXT,
                dismiss_reason TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS lineage_edges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_table TEXT NOT NULL,
                target_table TEXT NOT NULL,
                relationship TEXT NOT NULL,
                confidence REAL NOT NULL,
                query_hash TEXT NOT NULL,
                first_seen_at TEXT NOT NULL,
                last_seen_at TEXT NOT NULL,
                UNIQUE (source_table, target_table)
            );

            CREATE INDEX IF NOT EXISTS idx_anomalies_table_type
                ON anomalies(table_id, type);
            CREATE INDEX IF NOT EXISTS idx_incidents_triage
                ON incidents(status, severity, created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_incidents_dedup
                ON incidents(table_id, anomaly_type, status);
            CREATE INDEX IF NOT EXISTS idx_lineage_source
                ON lineage_edges(source_table);
            CREATE INDEX IF NOT EXISTS idx_lineage_target
                ON lineage_edges(target_table);
            CREATE INDEX IF NOT EXISTS idx_snapshots_latest
                ON schema_snapshots(table_id, captured_at DESC);
            "#,
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock means another thread panicked mid-write; the
        // connection itself is still usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub(crate) fn db_err(e: rusqlite::Error) -> AegisError {
    AegisError::Storage(e.to_string())
}

pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AegisError::Storage(format!("bad timestamp {raw:?}: {e}")))
}

pub(crate) fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(&s)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::{CheckType, Dialect};

    #[test]
    fn schema_initializes_idempotently() {
        let store = Store::open_in_memory().unwrap();
        store.init_schema().unwrap();
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aegis.db");

        {
            let store = Store::open(&path).unwrap();
            store
                .insert_connection("wh", Dialect::Postgres, "sealed", true)
                .unwrap();
        }

        let store = Store::open(&path).unwrap();
        let connections = store.list_connections().unwrap();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].name, "wh");
    }

    #[test]
    fn deleting_a_connection_cascades() {
        let store = Store::open_in_memory().unwrap();
        let conn = store
            .insert_connection("wh", Dialect::Postgres, "sealed", true)
            .unwrap();
        let table = store
            .insert_table(conn.id, "public", "users", &[CheckType::Schema], None)
            .unwrap();

        store.delete_connection(conn.id).unwrap();
        assert!(store.get_table(table.id).unwrap().is_none());
    }
}
