//! Remediation plans — formatted for human review, never auto-executed.

use crate::diagnosis::RecommendationAction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Carries executable SQL; an operator must approve before running it.
    PendingApproval,
    /// No SQL; the operator performs the step by hand.
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemediationAction {
    pub action: RecommendationAction,
    pub description: String,
    #[serde(default)]
    pub sql: Option<String>,
    pub status: ActionStatus,
    pub priority: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Remediation {
    /// Ordered by priority ascending.
    pub actions: Vec<RemediationAction>,
    pub summary: String,
    pub generated_at: DateTime<Utc>,
}
