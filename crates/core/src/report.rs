//! Incident report — derived, self-contained presentation document.
//!
//! Regenerated idempotently from the incident's inputs; never a source of
//! truth.

use crate::anomaly::AnomalyType;
use crate::diagnosis::RecommendationAction;
use crate::incident::IncidentStatus;
use crate::remediation::ActionStatus;
use crate::severity::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnomalySection {
    #[serde(rename = "type")]
    pub anomaly_type: AnomalyType,
    pub table: String,
    pub detected_at: DateTime<Utc>,
    /// The serialized detector detail, verbatim.
    pub changes: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RootCauseSection {
    pub explanation: String,
    pub source_table: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlastRadiusSection {
    pub total_affected: usize,
    pub affected_tables: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendedAction {
    pub action: RecommendationAction,
    pub description: String,
    pub priority: u32,
    pub status: ActionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineEvent {
    pub timestamp: DateTime<Utc>,
    pub event: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncidentReport {
    pub incident_id: i64,
    pub title: String,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub generated_at: DateTime<Utc>,
    pub summary: String,
    pub anomaly_details: AnomalySection,
    pub root_cause: RootCauseSection,
    pub blast_radius: BlastRadiusSection,
    pub recommended_actions: Vec<RecommendedAction>,
    pub timeline: Vec<TimelineEvent>,
}
