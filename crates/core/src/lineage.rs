//! Lineage graph types — directed edges between fully-qualified table names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the target derives from the source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EdgeRelationship {
    Direct,
    Derived,
    Aggregated,
}

impl EdgeRelationship {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeRelationship::Direct => "direct",
            EdgeRelationship::Derived => "derived",
            EdgeRelationship::Aggregated => "aggregated",
        }
    }

    pub fn parse(s: &str) -> Option<EdgeRelationship> {
        match s {
            "direct" => Some(EdgeRelationship::Direct),
            "derived" => Some(EdgeRelationship::Derived),
            "aggregated" => Some(EdgeRelationship::Aggregated),
            _ => None,
        }
    }
}

/// Directed edge `(source → target)`, unique per pair. Re-observation only
/// advances `last_seen_at` and never decreases `confidence`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageEdge {
    pub source_table: String,
    pub target_table: String,
    pub relationship: EdgeRelationship,
    pub confidence: f64,
    pub query_hash: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// One node reached by a traversal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineageNode {
    pub table: String,
    pub depth: u32,
    /// Product of edge confidences along the reaching path.
    pub confidence: f64,
}

/// Downstream impact of a table in the non-stale subgraph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlastRadius {
    pub table: String,
    pub affected_tables: Vec<LineageNode>,
    pub total: usize,
    pub max_depth: u32,
    /// True when any reached node has out-degree 0.
    pub has_terminal_consumers: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub relationship: EdgeRelationship,
    pub confidence: f64,
}

/// Full non-stale graph for visualization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageGraphView {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}
