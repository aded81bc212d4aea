//! Incident persistence: deduplication, pipeline output persist, and the
//! externally-driven status transitions.

use super::{db_err, format_ts, parse_opt_ts, parse_ts, Store};
use aegis_core::{
    AegisError, Anomaly, AnomalyType, Diagnosis, Incident, IncidentReport, IncidentStatus,
    Remediation, Result, Severity,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const COLS: &str = "id, anomaly_id, table_id, anomaly_type, status, severity, diagnosis, \
                    remediation, blast_radius, report, error, resolved_at, resolved_by, \
                    dismiss_reason, created_at, updated_at";

struct IncidentRow {
    id: i64,
    anomaly_id: i64,
    table_id: i64,
    anomaly_type: String,
    status: String,
    severity: String,
    diagnosis: Option<String>,
    remediation: Option<String>,
    blast_radius: String,
    report: Option<String>,
    error: Option<String>,
    resolved_at: Option<String>,
    resolved_by: Option<String>,
    dismiss_reason: Option<String>,
    created_at: String,
    updated_at: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<IncidentRow> {
    Ok(IncidentRow {
        id: row.get(0)?,
        anomaly_id: row.get(1)?,
        table_id: row.get(2)?,
        anomaly_type: row.get(3)?,
        status: row.get(4)?,
        severity: row.get(5)?,
        diagnosis: row.get(6)?,
        remediation: row.get(7)?,
        blast_radius: row.get(8)?,
        report: row.get(9)?,
        error: row.get(10)?,
        resolved_at: row.get(11)?,
        resolved_by: row.get(12)?,
        dismiss_reason: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

fn json_opt<T: serde::de::DeserializeOwned>(raw: Option<String>, what: &str) -> Result<Option<T>> {
    raw.map(|s| {
        serde_json::from_str(&s).map_err(|e| AegisError::Storage(format!("bad {what}: {e}")))
    })
    .transpose()
}

fn into_incident(row: IncidentRow) -> Result<Incident> {
    Ok(Incident {
        id: row.id,
        anomaly_id: row.anomaly_id,
        table_id: row.table_id,
        anomaly_type: AnomalyType::parse(&row.anomaly_type).ok_or_else(|| {
            AegisError::Storage(format!("unknown anomaly type {:?}", row.anomaly_type))
        })?,
        status: IncidentStatus::parse(&row.status)
            .ok_or_else(|| AegisError::Storage(format!("unknown status {:?}", row.status)))?,
        severity: Severity::parse(&row.severity)
            .ok_or_else(|| AegisError::Storage(format!("unknown severity {:?}", row.severity)))?,
        diagnosis: json_opt::<Diagnosis>(row.diagnosis, "diagnosis")?,
        remediation: json_opt::<Remediation>(row.remediation, "remediation")?,
        blast_radius: serde_json::from_str(&row.blast_radius)
            .map_err(|e| AegisError::Storage(format!("bad blast_radius: {e}")))?,
        report: json_opt::<IncidentReport>(row.report, "report")?,
        error: row.error,
        resolved_at: parse_opt_ts(row.resolved_at)?,
        resolved_by: row.resolved_by,
        dismiss_reason: row.dismiss_reason,
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}

/// Filters accepted by the incident listing.
#[derive(Debug, Clone, Default)]
pub struct IncidentFilter {
    pub status: Option<IncidentStatus>,
    pub severity: Option<Severity>,
    pub table_id: Option<i64>,
    pub since: Option<DateTime<Utc>>,
    pub page: usize,
    pub per_page: usize,
}

/// Outcome of routing an anomaly into the incident table.
#[derive(Debug)]
pub enum Routed {
    /// No active incident existed; a fresh one was created in `investigating`.
    Created(Incident),
    /// An active incident absorbed the anomaly.
    Merged(Incident),
}

impl Routed {
    pub fn incident(&self) -> &Incident {
        match self {
            Routed::Created(i) | Routed::Merged(i) => i,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Routed::Created(_))
    }
}

const ACTIVE: &str = "('open', 'investigating', 'pending_review')";

impl Store {
    pub fn get_incident(&self, id: i64) -> Result<Option<Incident>> {
        let conn = self.lock();
        conn.query_row(
            &format!("SELECT {COLS} FROM incidents WHERE id = ?1"),
            params![id],
            read_row,
        )
        .optional()
        .map_err(db_err)?
        .map(into_incident)
        .transpose()
    }

    pub fn find_active_incident(
        &self,
        table_id: i64,
        anomaly_type: AnomalyType,
    ) -> Result<Option<Incident>> {
        let conn = self.lock();
        conn.query_row(
            &format!(
                "SELECT {COLS} FROM incidents
                 WHERE table_id = ?1 AND anomaly_type = ?2 AND status IN {ACTIVE}
                 ORDER BY created_at DESC LIMIT 1"
            ),
            params![table_id, anomaly_type.as_str()],
            read_row,
        )
        .optional()
        .map_err(db_err)?
        .map(into_incident)
        .transpose()
    }

    /// Dedup-or-create inside one transaction. The lookup and the insert
    /// share the write lock, so two anomalies racing for the same
    /// `(table, type)` cannot both create; the loser merges.
    pub fn route_anomaly(&self, anomaly: &Anomaly) -> Result<Routed> {
        let now = Utc::now();
        let mut conn = self.lock();
        let tx = conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .map_err(db_err)?;

        let existing = tx
            .query_row(
                &format!(
                    "SELECT {COLS} FROM incidents
                     WHERE table_id = ?1 AND anomaly_type = ?2 AND status IN {ACTIVE}
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![anomaly.table_id, anomaly.anomaly_type.as_str()],
                read_row,
            )
            .optional()
            .map_err(db_err)?;

        if let Some(row) = existing {
            let mut incident = into_incident(row)?;
            // Merge: severity only ever escalates.
            let severity = incident.severity.max(anomaly.severity);
            tx.execute(
                "UPDATE incidents SET severity = ?2, updated_at = ?3 WHERE id = ?1",
                params![incident.id, severity.as_str(), format_ts(now)],
            )
            .map_err(db_err)?;
            tx.commit().map_err(db_err)?;
            incident.severity = severity;
            incident.updated_at = now;
            return Ok(Routed::Merged(incident));
        }

        tx.execute(
            "INSERT INTO incidents
                 (anomaly_id, table_id, anomaly_type, status, severity,
                  blast_radius, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, '[]', ?6, ?6)",
            params![
                anomaly.id,
                anomaly.table_id,
                anomaly.anomaly_type.as_str(),
                IncidentStatus::Investigating.as_str(),
                anomaly.severity.as_str(),
                format_ts(now)
            ],
        )
        .map_err(db_err)?;
        let id = tx.last_insert_rowid();
        tx.commit().map_err(db_err)?;

        Ok(Routed::Created(Incident {
            id,
            anomaly_id: anomaly.id,
            table_id: anomaly.table_id,
            anomaly_type: anomaly.anomaly_type,
            status: IncidentStatus::Investigating,
            severity: anomaly.severity,
            diagnosis: None,
            remediation: None,
            blast_radius: Vec::new(),
            report: None,
            error: None,
            resolved_at: None,
            resolved_by: None,
            dismiss_reason: None,
            created_at: now,
            updated_at: now,
        }))
    }

    /// Persist diagnosis, remediation, report and move to `pending_review`
    /// atomically. Clears any stale error annotation.
    pub fn complete_investigation(
        &self,
        id: i64,
        diagnosis: &Diagnosis,
        remediation: &Remediation,
        report: &IncidentReport,
    ) -> Result<Incident> {
        let diagnosis_json = serde_json::to_string(diagnosis)
            .map_err(|e| AegisError::Storage(format!("serialize diagnosis: {e}")))?;
        let remediation_json = serde_json::to_string(remediation)
            .map_err(|e| AegisError::Storage(format!("serialize remediation: {e}")))?;
        let report_json = serde_json::to_string(report)
            .map_err(|e| AegisError::Storage(format!("serialize report: {e}")))?;
        let blast_json = serde_json::to_string(&diagnosis.blast_radius)
            .map_err(|e| AegisError::Storage(format!("serialize blast radius: {e}")))?;
        let now = Utc::now();

        {
            let mut conn = self.lock();
            let tx = conn.transaction().map_err(db_err)?;
            let affected = tx
                .execute(
                    "UPDATE incidents
                     SET diagnosis = ?2, remediation = ?3, report = ?4, blast_radius = ?5,
                         severity = ?6, status = ?7, error = NULL, updated_at = ?8
                     WHERE id = ?1 AND status IN ('open', 'investigating')",
                    params![
                        id,
                        diagnosis_json,
                        remediation_json,
                        report_json,
                        blast_json,
                        diagnosis.severity.as_str(),
                        IncidentStatus::PendingReview.as_str(),
                        format_ts(now)
                    ],
                )
                .map_err(db_err)?;
            if affected == 0 {
                return Err(AegisError::NotFound(format!(
                    "incident {id} not open for investigation"
                )));
            }
            tx.commit().map_err(db_err)?;
        }

        self.get_incident(id)?
            .ok_or_else(|| AegisError::NotFound(format!("incident {id}")))
    }

    /// Annotate a failed diagnosis attempt; the incident stays
    /// `investigating` and is retried on a later cycle.
    pub fn set_incident_error(&self, id: i64, message: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE incidents SET error = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, message, format_ts(Utc::now())],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Externally-driven transition to a terminal state, validated against
    /// the state machine inside the transaction.
    pub fn transition_incident(
        &self,
        id: i64,
        to: IncidentStatus,
        resolved_by: Option<&str>,
        dismiss_reason: Option<&str>,
    ) -> Result<Incident> {
        if to == IncidentStatus::Dismissed
            && dismiss_reason.map(str::trim).unwrap_or_default().is_empty()
        {
            return Err(AegisError::MissingReason);
        }

        let now = Utc::now();
        {
            let mut conn = self.lock();
            let tx = conn
                .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
                .map_err(db_err)?;

            let row = tx
                .query_row(
                    &format!("SELECT {COLS} FROM incidents WHERE id = ?1"),
                    params![id],
                    read_row,
                )
                .optional()
                .map_err(db_err)?
                .ok_or_else(|| AegisError::NotFound(format!("incident {id}")))?;
            let current = into_incident(row)?;
            current.status.check_transition(to)?;

            tx.execute(
                "UPDATE incidents
                 SET status = ?2, resolved_at = ?3, resolved_by = ?4,
                     dismiss_reason = ?5, updated_at = ?6
                 WHERE id = ?1",
                params![
                    id,
                    to.as_str(),
                    to.is_terminal().then(|| format_ts(now)),
                    resolved_by,
                    dismiss_reason,
                    format_ts(now)
                ],
            )
            .map_err(db_err)?;
            tx.commit().map_err(db_err)?;
        }

        self.get_incident(id)?
            .ok_or_else(|| AegisError::NotFound(format!("incident {id}")))
    }

    pub fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<Incident>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut bound: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            clauses.push(format!("status = ?{}", bound.len() + 1));
            bound.push(Box::new(status.as_str().to_string()));
        }
        if let Some(severity) = filter.severity {
            clauses.push(format!("severity = ?{}", bound.len() + 1));
            bound.push(Box::new(severity.as_str().to_string()));
        }
        if let Some(table_id) = filter.table_id {
            clauses.push(format!("table_id = ?{}", bound.len() + 1));
            bound.push(Box::new(table_id));
        }
        if let Some(since) = filter.since {
            clauses.push(format!("created_at >= ?{}", bound.len() + 1));
            bound.push(Box::new(format_ts(since)));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let per_page = filter.per_page.clamp(1, 200);
        let offset = filter.page.saturating_sub(1) * per_page;
        let sql = format!(
            "SELECT {COLS} FROM incidents {where_clause}
             ORDER BY created_at DESC
             LIMIT {per_page} OFFSET {offset}"
        );

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let refs: Vec<&dyn rusqlite::types::ToSql> = bound.iter().map(|b| b.as_ref()).collect();
        let rows = stmt
            .query_map(refs.as_slice(), read_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        rows.into_iter().map(into_incident).collect()
    }

    /// Incidents stuck in `investigating` (a prior Architect/Executor run
    /// failed); the scanner retries them each cycle.
    pub fn incidents_awaiting_diagnosis(&self) -> Result<Vec<Incident>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {COLS} FROM incidents
                 WHERE status = 'investigating' ORDER BY created_at"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], read_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        rows.into_iter().map(into_incident).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::{AnomalyDetail, CheckType, Dialect, FreshnessDetail};

    fn seeded_anomaly(store: &Store) -> Anomaly {
        let conn = store
            .insert_connection("wh", Dialect::Postgres, "sealed", true)
            .unwrap();
        let table = store
            .insert_table(
                conn.id,
                "public",
                "users",
                &[CheckType::Freshness],
                Some(60),
            )
            .unwrap();
        store
            .insert_anomaly(
                table.id,
                Severity::Medium,
                &AnomalyDetail::Freshness(FreshnessDetail {
                    last_update: Utc::now(),
                    sla_minutes: 60,
                    minutes_overdue: 30,
                }),
                Utc::now(),
            )
            .unwrap()
    }

    #[test]
    fn second_anomaly_merges_into_active_incident() {
        let store = Store::open_in_memory().unwrap();
        let anomaly = seeded_anomaly(&store);

        let first = store.route_anomaly(&anomaly).unwrap();
        assert!(first.was_created());

        let mut louder = anomaly.clone();
        louder.severity = Severity::Critical;
        let second = store.route_anomaly(&louder).unwrap();
        assert!(!second.was_created());
        assert_eq!(second.incident().id, first.incident().id);
        assert_eq!(second.incident().severity, Severity::Critical);
    }

    #[test]
    fn terminal_incident_does_not_block_new_one() {
        let store = Store::open_in_memory().unwrap();
        let anomaly = seeded_anomaly(&store);

        let first = store.route_anomaly(&anomaly).unwrap();
        store
            .transition_incident(
                first.incident().id,
                IncidentStatus::Dismissed,
                None,
                Some("expected change"),
            )
            .unwrap();

        let second = store.route_anomaly(&anomaly).unwrap();
        assert!(second.was_created());
        assert_ne!(second.incident().id, first.incident().id);
    }

    #[test]
    fn dismiss_requires_reason_and_is_terminal() {
        let store = Store::open_in_memory().unwrap();
        let anomaly = seeded_anomaly(&store);
        let incident_id = store.route_anomaly(&anomaly).unwrap().incident().id;

        let missing = store.transition_incident(incident_id, IncidentStatus::Dismissed, None, None);
        assert!(matches!(missing, Err(AegisError::MissingReason)));

        let blank =
            store.transition_incident(incident_id, IncidentStatus::Dismissed, None, Some("  "));
        assert!(matches!(blank, Err(AegisError::MissingReason)));

        store
            .transition_incident(
                incident_id,
                IncidentStatus::Dismissed,
                None,
                Some("expected change"),
            )
            .unwrap();

        let after = store.transition_incident(
            incident_id,
            IncidentStatus::Resolved,
            Some("operator"),
            None,
        );
        assert!(matches!(after, Err(AegisError::InvalidTransition { .. })));
    }

    #[test]
    fn listing_filters_by_status_and_severity() {
        let store = Store::open_in_memory().unwrap();
        let anomaly = seeded_anomaly(&store);
        store.route_anomaly(&anomaly).unwrap();

        let filter = IncidentFilter {
            status: Some(IncidentStatus::Investigating),
            severity: Some(Severity::Medium),
            page: 1,
            per_page: 50,
            ..Default::default()
        };
        assert_eq!(store.list_incidents(&filter).unwrap().len(), 1);

        let none = IncidentFilter {
            status: Some(IncidentStatus::Resolved),
            page: 1,
            per_page: 50,
            ..Default::default()
        };
        assert!(store.list_incidents(&none).unwrap().is_empty());
    }
}
