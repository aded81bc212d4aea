//! Orchestrator — routes anomalies into incidents and drives the incident
//! state machine.
//!
//! Deduplication is delegated to the store's transactional
//! lookup-then-insert; the orchestrator decides what happens on each side of
//! that fork: a fresh incident runs the full diagnose → plan → report
//! pipeline, a merge only bumps metadata (and retries a diagnosis that
//! previously failed).

use crate::architect::Architect;
use crate::executor::Executor;
use crate::notifier::Notifier;
use crate::reporter::build_report;
use crate::store::{Routed, Store};
use aegis_core::{AegisError, Anomaly, Incident, IncidentStatus, Result};
use std::sync::Arc;
use tracing::{error, info};

pub struct Orchestrator {
    store: Arc<Store>,
    architect: Architect,
    executor: Executor,
    notifier: Arc<Notifier>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<Store>,
        architect: Architect,
        executor: Executor,
        notifier: Arc<Notifier>,
    ) -> Self {
        Orchestrator {
            store,
            architect,
            executor,
            notifier,
        }
    }

    /// Process one detected anomaly through the incident pipeline.
    pub async fn handle_anomaly(&self, anomaly: &Anomaly) -> Result<Incident> {
        let routed = self.store.route_anomaly(anomaly)?;

        match routed {
            Routed::Merged(incident) => {
                info!(
                    incident_id = incident.id,
                    anomaly_id = anomaly.id,
                    "anomaly merged into active incident"
                );
                // A merged incident still stuck in `investigating` means an
                // earlier diagnosis attempt failed; this recurrence is the
                // retry.
                let incident = if incident.status == IncidentStatus::Investigating
                    && incident.diagnosis.is_none()
                {
                    self.run_investigation(incident, anomaly).await
                } else {
                    incident
                };
                self.notifier.incident_updated(
                    incident.id,
                    incident.status.as_str(),
                    incident.severity.as_str(),
                );
                Ok(incident)
            }
            Routed::Created(incident) => {
                info!(
                    incident_id = incident.id,
                    anomaly_id = anomaly.id,
                    severity = %incident.severity,
                    "incident created"
                );
                let incident = self.run_investigation(incident, anomaly).await;
                if incident.status == IncidentStatus::PendingReview {
                    let table = self
                        .store
                        .get_table(incident.table_id)?
                        .map(|t| t.fully_qualified_name())
                        .unwrap_or_else(|| format!("table:{}", incident.table_id));
                    self.notifier.incident_created(
                        incident.id,
                        incident.severity.as_str(),
                        &table,
                        incident.anomaly_type.as_str(),
                    );
                }
                Ok(incident)
            }
        }
    }

    /// Diagnose, plan, report, and advance to `pending_review`. On failure
    /// the incident keeps its `investigating` status with an error
    /// annotation and will be retried on a later cycle.
    async fn run_investigation(&self, incident: Incident, anomaly: &Anomaly) -> Incident {
        match self.investigate(&incident, anomaly).await {
            Ok(completed) => completed,
            Err(e) => {
                error!(incident_id = incident.id, error = %e, "investigation failed");
                let _ = self
                    .store
                    .set_incident_error(incident.id, &e.to_string());
                incident
            }
        }
    }

    async fn investigate(&self, incident: &Incident, anomaly: &Anomaly) -> Result<Incident> {
        let table = self
            .store
            .get_table(incident.table_id)?
            .ok_or_else(|| AegisError::NotFound(format!("table {}", incident.table_id)))?;

        let diagnosis = self.architect.diagnose(anomaly).await?;
        let remediation = self.executor.prepare(anomaly, &diagnosis);

        // The report reflects the incident as it will be persisted.
        let mut reported = incident.clone();
        reported.status = IncidentStatus::PendingReview;
        reported.severity = diagnosis.severity;
        let report = build_report(
            &reported,
            anomaly,
            &table,
            Some(&diagnosis),
            Some(&remediation),
        );

        self.store
            .complete_investigation(incident.id, &diagnosis, &remediation, &report)
    }

    /// Operator approval: `pending_review → resolved`.
    pub fn approve(&self, incident_id: i64, approved_by: &str, _note: Option<&str>) -> Result<Incident> {
        let incident = self.store.transition_incident(
            incident_id,
            IncidentStatus::Resolved,
            Some(approved_by),
            None,
        )?;
        self.notifier.incident_updated(
            incident.id,
            incident.status.as_str(),
            incident.severity.as_str(),
        );
        Ok(incident)
    }

    /// Operator dismissal: requires a non-empty reason.
    pub fn dismiss(&self, incident_id: i64, reason: &str) -> Result<Incident> {
        let incident = self.store.transition_incident(
            incident_id,
            IncidentStatus::Dismissed,
            None,
            Some(reason),
        )?;
        self.notifier.incident_updated(
            incident.id,
            incident.status.as_str(),
            incident.severity.as_str(),
        );
        Ok(incident)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lineage::LineageService;
    use aegis_core::{
        AnomalyDetail, CheckType, Dialect, EventKind, FreshnessDetail, Severity,
    };
    use chrono::Utc;

    fn pipeline(store: Arc<Store>) -> (Orchestrator, Arc<Notifier>) {
        let lineage = Arc::new(LineageService::new(store.clone()));
        let architect = Architect::new(store.clone(), lineage, None);
        let notifier = Arc::new(Notifier::new());
        (
            Orchestrator::new(store, architect, Executor, notifier.clone()),
            notifier,
        )
    }

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

    #[tokio::test]
    async fn fresh_anomaly_reaches_pending_review_with_report() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let anomaly = seeded_anomaly(&store);
        let (orchestrator, notifier) = pipeline(store.clone());
        let (_, mut rx) = notifier.subscribe(None);

        let incident = orchestrator.handle_anomaly(&anomaly).await.unwrap();
        assert_eq!(incident.status, IncidentStatus::PendingReview);
        assert!(incident.diagnosis.is_some());
        assert!(incident.remediation.is_some());
        assert!(incident.report.is_some());

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::IncidentCreated);
        assert_eq!(event.payload["incident_id"], incident.id);
        assert_eq!(event.payload["table"], "public.users");
    }

    #[tokio::test]
    async fn repeated_anomaly_merges_and_emits_update() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let anomaly = seeded_anomaly(&store);
        let (orchestrator, notifier) = pipeline(store.clone());

        let first = orchestrator.handle_anomaly(&anomaly).await.unwrap();
        let (_, mut rx) = notifier.subscribe(None);
        let second = orchestrator.handle_anomaly(&anomaly).await.unwrap();

        assert_eq!(first.id, second.id);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::IncidentUpdated);

        // One active incident for the pair, ever.
        let active = store
            .find_active_incident(anomaly.table_id, anomaly.anomaly_type)
            .unwrap()
            .unwrap();
        assert_eq!(active.id, first.id);
    }

    #[tokio::test]
    async fn approve_then_further_transitions_fail() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let anomaly = seeded_anomaly(&store);
        let (orchestrator, _) = pipeline(store.clone());

        let incident = orchestrator.handle_anomaly(&anomaly).await.unwrap();
        let resolved = orchestrator
            .approve(incident.id, "operator", None)
            .unwrap();
        assert_eq!(resolved.status, IncidentStatus::Resolved);
        assert!(resolved.resolved_at.is_some());

        let err = orchestrator.dismiss(incident.id, "changed my mind");
        assert!(matches!(err, Err(AegisError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn dismiss_without_reason_is_rejected() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let anomaly = seeded_anomaly(&store);
        let (orchestrator, _) = pipeline(store.clone());

        let incident = orchestrator.handle_anomaly(&anomaly).await.unwrap();
        assert!(matches!(
            orchestrator.dismiss(incident.id, "  "),
            Err(AegisError::MissingReason)
        ));

        let dismissed = orchestrator.dismiss(incident.id, "expected change").unwrap();
        assert_eq!(dismissed.status, IncidentStatus::Dismissed);
        assert_eq!(dismissed.dismiss_reason.as_deref(), Some("expected change"));
    }
}
