//! Incident records and the approval state machine.
//!
//! One active (non-terminal) incident per `(table_id, anomaly_type)` at any
//! moment; `resolved` and `dismissed` are terminal.

use crate::anomaly::AnomalyType;
use crate::diagnosis::Diagnosis;
use crate::error::AegisError;
use crate::remediation::Remediation;
use crate::report::IncidentReport;
use crate::severity::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Open,
    Investigating,
    PendingReview,
    Resolved,
    Dismissed,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Open => "open",
            IncidentStatus::Investigating => "investigating",
            IncidentStatus::PendingReview => "pending_review",
            IncidentStatus::Resolved => "resolved",
            IncidentStatus::Dismissed => "dismissed",
        }
    }

    pub fn parse(s: &str) -> Option<IncidentStatus> {
        match s {
            "open" => Some(IncidentStatus::Open),
            "investigating" => Some(IncidentStatus::Investigating),
            "pending_review" => Some(IncidentStatus::PendingReview),
            "resolved" => Some(IncidentStatus::Resolved),
            "dismissed" => Some(IncidentStatus::Dismissed),
            _ => None,
        }
    }

    /// Terminal states forbid every further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, IncidentStatus::Resolved | IncidentStatus::Dismissed)
    }

    /// Active = participates in deduplication.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Validate a transition, including the internal monotonic ones.
    pub fn check_transition(self, to: IncidentStatus) -> Result<(), AegisError> {
        use IncidentStatus::*;
        let ok = match (self, to) {
            (Open, Investigating) => true,
            (Investigating, PendingReview) => true,
            (Investigating, Resolved) | (Investigating, Dismissed) => true,
            (PendingReview, Resolved) | (PendingReview, Dismissed) => true,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(AegisError::InvalidTransition {
                from: self.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A deduplicated, diagnosed, user-facing grouping of anomalies on one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: i64,
    pub anomaly_id: i64,
    pub table_id: i64,
    pub anomaly_type: AnomalyType,
    pub status: IncidentStatus,
    pub severity: Severity,
    pub diagnosis: Option<Diagnosis>,
    pub remediation: Option<Remediation>,
    pub blast_radius: Vec<String>,
    pub report: Option<IncidentReport>,
    /// Set when the Architect or Executor failed; cleared on successful retry.
    pub error: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub dismiss_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_forbid_transitions() {
        for terminal in [IncidentStatus::Resolved, IncidentStatus::Dismissed] {
            for target in [
                IncidentStatus::Open,
                IncidentStatus::Investigating,
                IncidentStatus::PendingReview,
                IncidentStatus::Resolved,
                IncidentStatus::Dismissed,
            ] {
                assert!(terminal.check_transition(target).is_err());
            }
        }
    }

    #[test]
    fn review_can_resolve_or_dismiss() {
        assert!(IncidentStatus::PendingReview
            .check_transition(IncidentStatus::Resolved)
            .is_ok());
        assert!(IncidentStatus::PendingReview
            .check_transition(IncidentStatus::Dismissed)
            .is_ok());
        assert!(IncidentStatus::PendingReview
            .check_transition(IncidentStatus::Open)
            .is_err());
    }

    #[test]
    fn internal_flow_is_monotonic() {
        assert!(IncidentStatus::Open
            .check_transition(IncidentStatus::Investigating)
            .is_ok());
        assert!(IncidentStatus::Investigating
            .check_transition(IncidentStatus::PendingReview)
            .is_ok());
        assert!(IncidentStatus::PendingReview
            .check_transition(IncidentStatus::Investigating)
            .is_err());
    }
}
