//! Incident report assembly.
//!
//! Combines the incident, its originating anomaly, the table, and the
//! optional diagnosis/remediation into the fixed report shape. Everything
//! except `generated_at` is a pure function of the inputs, so regeneration
//! is idempotent.

use aegis_core::{
    Anomaly, AnomalySection, BlastRadiusSection, Diagnosis, Incident, IncidentReport,
    MonitoredTable, RecommendedAction, Remediation, RootCauseSection, TimelineEvent,
};
use chrono::Utc;

pub fn build_report(
    incident: &Incident,
    anomaly: &Anomaly,
    table: &MonitoredTable,
    diagnosis: Option<&Diagnosis>,
    remediation: Option<&Remediation>,
) -> IncidentReport {
    let fqn = table.fully_qualified_name();
    let type_label = anomaly.anomaly_type.title();

    let root_cause = match diagnosis {
        Some(d) => RootCauseSection {
            explanation: d.root_cause.clone(),
            source_table: d.root_cause_table.clone(),
            confidence: d.confidence,
        },
        None => RootCauseSection {
            explanation: "Analysis unavailable".to_string(),
            source_table: fqn.clone(),
            confidence: 0.0,
        },
    };

    let blast_radius = match diagnosis {
        Some(d) => BlastRadiusSection {
            total_affected: d.blast_radius.len(),
            affected_tables: d.blast_radius.clone(),
        },
        None => BlastRadiusSection {
            total_affected: 0,
            affected_tables: Vec::new(),
        },
    };

    let recommended_actions = remediation
        .map(|r| {
            r.actions
                .iter()
                .map(|a| RecommendedAction {
                    action: a.action,
                    description: a.description.clone(),
                    priority: a.priority,
                    status: a.status,
                })
                .collect()
        })
        .unwrap_or_default();

    IncidentReport {
        incident_id: incident.id,
        title: format!("{type_label} on {fqn}"),
        severity: incident.severity,
        status: incident.status,
        generated_at: Utc::now(),
        summary: build_summary(type_label, &fqn, incident, &root_cause, &blast_radius),
        anomaly_details: AnomalySection {
            anomaly_type: anomaly.anomaly_type,
            table: fqn,
            detected_at: anomaly.detected_at,
            changes: serde_json::to_value(&anomaly.detail)
                .unwrap_or(serde_json::Value::Null),
        },
        root_cause,
        blast_radius,
        recommended_actions,
        timeline: build_timeline(incident, anomaly, diagnosis, remediation),
    }
}

fn build_summary(
    type_label: &str,
    fqn: &str,
    incident: &Incident,
    root_cause: &RootCauseSection,
    blast_radius: &BlastRadiusSection,
) -> String {
    let mut parts = vec![format!(
        "{type_label} detected on {fqn} ({} severity).",
        incident.severity
    )];

    if root_cause.confidence > 0.0 {
        parts.push(format!("Root cause: {}.", root_cause.explanation));
    } else {
        parts.push("Root cause analysis unavailable.".to_string());
    }

    if blast_radius.total_affected > 0 {
        parts.push(format!(
            "{} downstream table(s) affected.",
            blast_radius.total_affected
        ));
    }

    parts.join(" ")
}

fn build_timeline(
    incident: &Incident,
    anomaly: &Anomaly,
    diagnosis: Option<&Diagnosis>,
    remediation: Option<&Remediation>,
) -> Vec<TimelineEvent> {
    let mut events = vec![
        TimelineEvent {
            timestamp: anomaly.detected_at,
            event: format!("Anomaly detected: {}", anomaly.anomaly_type.title()),
        },
        TimelineEvent {
            timestamp: incident.created_at,
            event: format!("Incident created (severity: {})", incident.severity),
        },
    ];

    if let Some(d) = diagnosis {
        events.push(TimelineEvent {
            timestamp: incident.updated_at,
            event: format!(
                "Root cause identified: {} (confidence: {:.0}%)",
                d.root_cause,
                d.confidence * 100.0
            ),
        });
    }

    if let Some(r) = remediation {
        events.push(TimelineEvent {
            timestamp: r.generated_at,
            event: format!("Remediation plan generated: {} action(s)", r.actions.len()),
        });
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::{
        AnomalyDetail, AnomalyType, CheckType, FreshnessDetail, IncidentStatus, Severity,
    };

    fn fixtures() -> (Incident, Anomaly, MonitoredTable) {
        let now = Utc::now();
        let table = MonitoredTable {
            id: 1,
            connection_id: 1,
            schema_name: "analytics".into(),
            table_name: "orders".into(),
            check_types: vec![CheckType::Schema],
            freshness_sla_minutes: None,
            created_at: now,
        };
        let anomaly = Anomaly {
            id: 7,
            table_id: 1,
            anomaly_type: AnomalyType::FreshnessViolation,
            severity: Severity::Medium,
            detail: AnomalyDetail::Freshness(FreshnessDetail {
                last_update: now,
                sla_minutes: 60,
                minutes_overdue: 30,
            }),
            detected_at: now,
        };
        let incident = Incident {
            id: 3,
            anomaly_id: 7,
            table_id: 1,
            anomaly_type: AnomalyType::FreshnessViolation,
            status: IncidentStatus::PendingReview,
            severity: Severity::Medium,
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
        };
        (incident, anomaly, table)
    }

    #[test]
    fn regeneration_is_idempotent_up_to_generated_at() {
        let (incident, anomaly, table) = fixtures();
        let mut a = build_report(&incident, &anomaly, &table, None, None);
        let mut b = build_report(&incident, &anomaly, &table, None, None);
        b.generated_at = a.generated_at;
        a.generated_at = b.generated_at;
        assert_eq!(a, b);
    }

    #[test]
    fn report_without_diagnosis_says_analysis_unavailable() {
        let (incident, anomaly, table) = fixtures();
        let report = build_report(&incident, &anomaly, &table, None, None);
        assert_eq!(report.title, "Freshness Breach on analytics.orders");
        assert_eq!(report.root_cause.confidence, 0.0);
        assert!(report.summary.contains("Root cause analysis unavailable."));
        assert_eq!(report.timeline.len(), 2);
    }

    #[test]
    fn timeline_grows_with_diagnosis_and_remediation() {
        let (incident, anomaly, table) = fixtures();
        let diagnosis = Diagnosis {
            root_cause: "Loader paused".into(),
            root_cause_table: "analytics.orders".into(),
            blast_radius: vec!["mart.revenue".into()],
            severity: Severity::Medium,
            confidence: 0.8,
            recommendations: Vec::new(),
        };
        let remediation = Remediation {
            actions: Vec::new(),
            summary: String::new(),
            generated_at: Utc::now(),
        };
        let report = build_report(&incident, &anomaly, &table, Some(&diagnosis), Some(&remediation));
        assert_eq!(report.timeline.len(), 4);
        assert_eq!(report.blast_radius.total_affected, 1);
        assert!(report.summary.contains("Root cause: Loader paused."));
    }
}
