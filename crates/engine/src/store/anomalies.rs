//! Anomaly records — insert and history queries.

use super::{db_err, format_ts, parse_ts, Store};
use aegis_core::{AegisError, Anomaly, AnomalyDetail, AnomalyType, Result, Severity};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const COLS: &str = "id, table_id, type, severity, detail, detected_at";

type AnomalyRow = (i64, i64, String, String, String, String);

fn read_row(row: &Row<'_>) -> rusqlite::Result<AnomalyRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn into_anomaly((id, table_id, ty, severity, detail, detected_at): AnomalyRow) -> Result<Anomaly> {
    Ok(Anomaly {
        id,
        table_id,
        anomaly_type: AnomalyType::parse(&ty)
            .ok_or_else(|| AegisError::Storage(format!("unknown anomaly type {ty:?}")))?,
        severity: Severity::parse(&severity)
            .ok_or_else(|| AegisError::Storage(format!("unknown severity {severity:?}")))?,
        detail: serde_json::from_str(&detail)
            .map_err(|e| AegisError::Storage(format!("bad anomaly detail: {e}")))?,
        detected_at: parse_ts(&detected_at)?,
    })
}

impl Store {
    pub fn insert_anomaly(
        &self,
        table_id: i64,
        severity: Severity,
        detail: &AnomalyDetail,
        detected_at: DateTime<Utc>,
    ) -> Result<Anomaly> {
        let detail_json = serde_json::to_string(detail)
            .map_err(|e| AegisError::Storage(format!("serialize detail: {e}")))?;
        let conn = self.lock();
        conn.execute(
            "INSERT INTO anomalies (table_id, type, severity, detail, detected_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                table_id,
                detail.anomaly_type().as_str(),
                severity.as_str(),
                detail_json,
                format_ts(detected_at)
            ],
        )
        .map_err(db_err)?;
        Ok(Anomaly {
            id: conn.last_insert_rowid(),
            table_id,
            anomaly_type: detail.anomaly_type(),
            severity,
            detail: detail.clone(),
            detected_at,
        })
    }

    pub fn get_anomaly(&self, id: i64) -> Result<Option<Anomaly>> {
        let conn = self.lock();
        conn.query_row(
            &format!("SELECT {COLS} FROM anomalies WHERE id = ?1"),
            params![id],
            read_row,
        )
        .optional()
        .map_err(db_err)?
        .map(into_anomaly)
        .transpose()
    }

    /// History for diagnosis context: anomalies on a set of tables within a
    /// window, newest first, excluding the anomaly under analysis.
    pub fn recent_anomalies(
        &self,
        table_ids: &[i64],
        since: DateTime<Utc>,
        exclude_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Anomaly>> {
        if table_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = table_ids
            .iter()
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {COLS} FROM anomalies
             WHERE table_id IN ({placeholders})
               AND detected_at >= ?
               AND id != ?
             ORDER BY detected_at DESC
             LIMIT ?"
        );

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let mut bound: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        for id in table_ids {
            bound.push(Box::new(*id));
        }
        bound.push(Box::new(format_ts(since)));
        bound.push(Box::new(exclude_id.unwrap_or(-1)));
        bound.push(Box::new(limit as i64));

        let refs: Vec<&dyn rusqlite::types::ToSql> = bound.iter().map(|b| b.as_ref()).collect();
        let rows = stmt
            .query_map(refs.as_slice(), read_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        rows.into_iter().map(into_anomaly).collect()
    }

    pub fn count_anomalies_since(&self, since: DateTime<Utc>) -> Result<i64> {
        let conn = self.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM anomalies WHERE detected_at >= ?1",
            params![format_ts(since)],
            |row| row.get(0),
        )
        .map_err(db_err)
    }
}
