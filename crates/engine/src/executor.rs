//! Executor — turns a diagnosis into an ordered remediation plan.
//!
//! Pure transformation, no side effects. SQL is carried for operator review
//! and is never executed by this service.

use aegis_core::{
    ActionStatus, Anomaly, Diagnosis, Remediation, RemediationAction,
};
use chrono::Utc;

const BLAST_RADIUS_PREVIEW: usize = 10;

pub struct Executor;

impl Executor {
    pub fn prepare(&self, anomaly: &Anomaly, diagnosis: &Diagnosis) -> Remediation {
        let mut actions: Vec<RemediationAction> = diagnosis
            .recommendations
            .iter()
            .map(|rec| RemediationAction {
                action: rec.action,
                description: rec.description.clone(),
                status: if rec.sql.is_some() {
                    ActionStatus::PendingApproval
                } else {
                    ActionStatus::Manual
                },
                sql: rec.sql.clone(),
                priority: rec.priority.max(1),
            })
            .collect();
        actions.sort_by_key(|a| a.priority);

        Remediation {
            summary: format_summary(anomaly, diagnosis),
            actions,
            generated_at: Utc::now(),
        }
    }
}

fn format_summary(anomaly: &Anomaly, diagnosis: &Diagnosis) -> String {
    let mut lines = vec![
        format!("**Incident: {}**", anomaly.anomaly_type.title()),
        format!("Severity: {}", diagnosis.severity.as_str().to_uppercase()),
        format!("Confidence: {:.0}%", diagnosis.confidence * 100.0),
        String::new(),
        format!("**Root Cause:** {}", diagnosis.root_cause),
        format!("**Source Table:** {}", diagnosis.root_cause_table),
    ];

    if !diagnosis.blast_radius.is_empty() {
        lines.push(format!(
            "**Blast Radius:** {} downstream tables affected",
            diagnosis.blast_radius.len()
        ));
        for table in diagnosis.blast_radius.iter().take(BLAST_RADIUS_PREVIEW) {
            lines.push(format!("  - {table}"));
        }
        if diagnosis.blast_radius.len() > BLAST_RADIUS_PREVIEW {
            lines.push(format!(
                "  ... and {} more",
                diagnosis.blast_radius.len() - BLAST_RADIUS_PREVIEW
            ));
        }
    }

    lines.push(String::new());
    lines.push(format!(
        "**Recommended Actions:** {}",
        diagnosis.recommendations.len()
    ));
    for (i, rec) in diagnosis.recommendations.iter().enumerate() {
        lines.push(format!(
            "  {}. [{}] {}",
            i + 1,
            rec.action.as_str(),
            rec.description
        ));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::{
        AnomalyDetail, AnomalyType, FreshnessDetail, Recommendation, RecommendationAction,
        Severity,
    };

    fn anomaly() -> Anomaly {
        Anomaly {
            id: 1,
            table_id: 1,
            anomaly_type: AnomalyType::SchemaDrift,
            severity: Severity::Critical,
            detail: AnomalyDetail::Freshness(FreshnessDetail {
                last_update: Utc::now(),
                sla_minutes: 60,
                minutes_overdue: 30,
            }),
            detected_at: Utc::now(),
        }
    }

    fn diagnosis() -> Diagnosis {
        Diagnosis {
            root_cause: "Upstream type change".into(),
            root_cause_table: "raw.orders".into(),
            blast_radius: vec!["mart.revenue".into()],
            severity: Severity::Critical,
            confidence: 0.9,
            recommendations: vec![
                Recommendation {
                    action: RecommendationAction::NotifyTeam,
                    description: "Page the data platform team".into(),
                    sql: None,
                    priority: 2,
                },
                Recommendation {
                    action: RecommendationAction::AddCast,
                    description: "Cast price back to FLOAT".into(),
                    sql: Some("ALTER TABLE raw.orders ALTER COLUMN price TYPE FLOAT".into()),
                    priority: 1,
                },
            ],
        }
    }

    #[test]
    fn actions_are_priority_ordered() {
        let plan = Executor.prepare(&anomaly(), &diagnosis());
        assert_eq!(plan.actions.len(), 2);
        assert_eq!(plan.actions[0].priority, 1);
        assert_eq!(plan.actions[0].action, RecommendationAction::AddCast);
        assert_eq!(plan.actions[1].action, RecommendationAction::NotifyTeam);
    }

    #[test]
    fn sql_actions_require_approval_and_others_are_manual() {
        let plan = Executor.prepare(&anomaly(), &diagnosis());
        assert_eq!(plan.actions[0].status, ActionStatus::PendingApproval);
        assert_eq!(plan.actions[1].status, ActionStatus::Manual);
    }

    #[test]
    fn summary_names_root_cause_and_blast_radius() {
        let plan = Executor.prepare(&anomaly(), &diagnosis());
        assert!(plan.summary.contains("Upstream type change"));
        assert!(plan.summary.contains("1 downstream tables affected"));
        assert!(plan.summary.contains("[add_cast]"));
    }
}
