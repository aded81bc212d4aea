//! Discovery shapes — API request/response bodies, never persisted.

use crate::schema::ColumnDef;
use crate::table::CheckType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role a table plays in the warehouse, inferred from naming conventions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TableRole {
    Fact,
    Dimension,
    Staging,
    Raw,
    Snapshot,
    System,
    Unknown,
}

impl TableRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableRole::Fact => "fact",
            TableRole::Dimension => "dimension",
            TableRole::Staging => "staging",
            TableRole::Raw => "raw",
            TableRole::Snapshot => "snapshot",
            TableRole::System => "system",
            TableRole::Unknown => "unknown",
        }
    }
}

/// Proposed monitoring configuration for one discovered table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableProposal {
    pub schema_name: String,
    pub table_name: String,
    pub fully_qualified_name: String,
    pub role: TableRole,
    pub columns: Vec<ColumnDef>,
    pub recommended_checks: Vec<CheckType>,
    pub suggested_sla_minutes: Option<i64>,
    pub reasoning: String,
    pub skip: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub connection_id: i64,
    pub connection_name: String,
    pub schemas_found: Vec<String>,
    pub total_tables: usize,
    pub proposals: Vec<TableProposal>,
    pub concerns: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeltaAction {
    New,
    Dropped,
}

/// One difference between warehouse state and the monitored set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDelta {
    pub action: DeltaAction,
    pub schema_name: String,
    pub table_name: String,
    pub fully_qualified_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal: Option<TableProposal>,
}

impl TableDelta {
    /// Split an FQN back into `(schema, table)`. Tables without a schema
    /// component land in `default`.
    pub fn from_fqn(action: DeltaAction, fqn: &str) -> TableDelta {
        let (schema_name, table_name) = match fqn.split_once('.') {
            Some((s, t)) => (s.to_string(), t.to_string()),
            None => ("default".to_string(), fqn.to_string()),
        };
        TableDelta {
            action,
            schema_name,
            table_name,
            fully_qualified_name: fqn.to_string(),
            proposal: None,
        }
    }
}
