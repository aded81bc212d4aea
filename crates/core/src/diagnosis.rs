//! Architect output contract.

use crate::severity::Severity;
use serde::{Deserialize, Serialize};

/// Remediation hint categories. Unrecognized tags from the model parse as
/// `Investigate` so a single odd label never discards a whole diagnosis.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationAction {
    RevertSchema,
    AddCast,
    NotifyTeam,
    PausePipeline,
    Investigate,
}

impl<'de> Deserialize<'de> for RecommendationAction {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "revert_schema" => RecommendationAction::RevertSchema,
            "add_cast" => RecommendationAction::AddCast,
            "notify_team" => RecommendationAction::NotifyTeam,
            "pause_pipeline" => RecommendationAction::PausePipeline,
            _ => RecommendationAction::Investigate,
        })
    }
}

impl RecommendationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationAction::RevertSchema => "revert_schema",
            RecommendationAction::AddCast => "add_cast",
            RecommendationAction::NotifyTeam => "notify_team",
            RecommendationAction::PausePipeline => "pause_pipeline",
            RecommendationAction::Investigate => "investigate",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub action: RecommendationAction,
    pub description: String,
    #[serde(default)]
    pub sql: Option<String>,
    /// 1 = first.
    pub priority: u32,
}

/// Root-cause analysis for one incident.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Diagnosis {
    pub root_cause: String,
    pub root_cause_table: String,
    pub blast_radius: Vec<String>,
    pub severity: Severity,
    /// 0.0 when produced by the deterministic fallback.
    pub confidence: f64,
    pub recommendations: Vec<Recommendation>,
}
