//! Schema snapshots — append-only baseline storage.

use super::{db_err, format_ts, parse_ts, Store};
use aegis_core::{AegisError, AnomalyDetail, Anomaly, ColumnDef, Result, SchemaSnapshot, Severity};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

impl Store {
    pub fn latest_snapshot(&self, table_id: i64) -> Result<Option<SchemaSnapshot>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT id, table_id, columns, snapshot_hash, captured_at
                 FROM schema_snapshots
                 WHERE table_id = ?1
                 ORDER BY captured_at DESC, id DESC
                 LIMIT 1",
                params![table_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err)?;

        row.map(|(id, table_id, columns_raw, snapshot_hash, captured_raw)| {
            let columns: Vec<ColumnDef> = serde_json::from_str(&columns_raw)
                .map_err(|e| AegisError::Storage(format!("bad snapshot columns: {e}")))?;
            Ok(SchemaSnapshot {
                id,
                table_id,
                columns,
                snapshot_hash,
                captured_at: parse_ts(&captured_raw)?,
            })
        })
        .transpose()
    }

    /// Persist a snapshot and, when drift was detected, the anomaly — in one
    /// transaction so the baseline and its signal never diverge.
    pub fn insert_snapshot_with_anomaly(
        &self,
        table_id: i64,
        columns: &[ColumnDef],
        snapshot_hash: &str,
        captured_at: DateTime<Utc>,
        anomaly: Option<(Severity, &AnomalyDetail)>,
    ) -> Result<Option<Anomaly>> {
        let columns_json = serde_json::to_string(columns)
            .map_err(|e| AegisError::Storage(format!("serialize columns: {e}")))?;

        let mut conn = self.lock();
        let tx = conn.transaction().map_err(db_err)?;

        tx.execute(
            "INSERT INTO schema_snapshots (table_id, columns, snapshot_hash, captured_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![table_id, columns_json, snapshot_hash, format_ts(captured_at)],
        )
        .map_err(db_err)?;

        let emitted = match anomaly {
            Some((severity, detail)) => {
                let detail_json = serde_json::to_string(detail)
                    .map_err(|e| AegisError::Storage(format!("serialize detail: {e}")))?;
                tx.execute(
                    "INSERT INTO anomalies (table_id, type, severity, detail, detected_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        table_id,
                        detail.anomaly_type().as_str(),
                        severity.as_str(),
                        detail_json,
                        format_ts(captured_at)
                    ],
                )
                .map_err(db_err)?;
                Some(Anomaly {
                    id: tx.last_insert_rowid(),
                    table_id,
                    anomaly_type: detail.anomaly_type(),
                    severity,
                    detail: detail.clone(),
                    detected_at: captured_at,
                })
            }
            None => None,
        };

        tx.commit().map_err(db_err)?;
        Ok(emitted)
    }

    pub fn count_snapshots(&self, table_id: i64) -> Result<i64> {
        let conn = self.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM schema_snapshots WHERE table_id = ?1",
            params![table_id],
            |row| row.get(0),
        )
        .map_err(db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::{snapshot_hash, CheckType, Dialect, SchemaChange};

    fn seeded_table(store: &Store) -> i64 {
        let conn = store
            .insert_connection("wh", Dialect::Postgres, "sealed", true)
            .unwrap();
        store
            .insert_table(conn.id, "analytics", "orders", &[CheckType::Schema], None)
            .unwrap()
            .id
    }

    fn cols() -> Vec<ColumnDef> {
        vec![ColumnDef {
            name: "id".into(),
            data_type: "INT".into(),
            nullable: false,
            ordinal: 1,
        }]
    }

    #[test]
    fn snapshot_without_anomaly() {
        let store = Store::open_in_memory().unwrap();
        let table_id = seeded_table(&store);
        let columns = cols();
        let hash = snapshot_hash(&columns);

        let emitted = store
            .insert_snapshot_with_anomaly(table_id, &columns, &hash, Utc::now(), None)
            .unwrap();
        assert!(emitted.is_none());

        let latest = store.latest_snapshot(table_id).unwrap().unwrap();
        assert_eq!(latest.snapshot_hash, hash);
        assert_eq!(latest.columns, columns);
    }

    #[test]
    fn snapshot_and_anomaly_commit_together() {
        let store = Store::open_in_memory().unwrap();
        let table_id = seeded_table(&store);
        let columns = cols();
        let hash = snapshot_hash(&columns);
        let detail = AnomalyDetail::SchemaDrift {
            changes: vec![SchemaChange::ColumnDeleted {
                column: "price".into(),
                data_type: "FLOAT".into(),
            }],
        };

        let emitted = store
            .insert_snapshot_with_anomaly(
                table_id,
                &columns,
                &hash,
                Utc::now(),
                Some((Severity::Critical, &detail)),
            )
            .unwrap()
            .unwrap();

        assert_eq!(emitted.severity, Severity::Critical);
        assert_eq!(store.count_snapshots(table_id).unwrap(), 1);
    }
}
