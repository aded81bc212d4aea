//! Anomaly records — raw detector output, immutable after creation.

use crate::severity::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    SchemaDrift,
    FreshnessViolation,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::SchemaDrift => "schema_drift",
            AnomalyType::FreshnessViolation => "freshness_violation",
        }
    }

    pub fn parse(s: &str) -> Option<AnomalyType> {
        match s {
            "schema_drift" => Some(AnomalyType::SchemaDrift),
            "freshness_violation" => Some(AnomalyType::FreshnessViolation),
            _ => None,
        }
    }

    /// Human-readable title fragment for reports.
    pub fn title(&self) -> &'static str {
        match self {
            AnomalyType::SchemaDrift => "Schema Drift",
            AnomalyType::FreshnessViolation => "Freshness Breach",
        }
    }
}

impl std::fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed change between two schema snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum SchemaChange {
    ColumnAdded {
        column: String,
        data_type: String,
        nullable: bool,
    },
    ColumnDeleted {
        column: String,
        data_type: String,
    },
    ColumnTypeChanged {
        column: String,
        from: String,
        to: String,
    },
    /// Inferred: same ordinal, different name, compatible type.
    ColumnRenamed {
        from: String,
        to: String,
        ordinal: u32,
        data_type: String,
    },
}

impl SchemaChange {
    pub fn severity(&self) -> Severity {
        match self {
            SchemaChange::ColumnDeleted { .. } => Severity::Critical,
            SchemaChange::ColumnTypeChanged { .. } => Severity::Critical,
            SchemaChange::ColumnRenamed { .. } => Severity::High,
            SchemaChange::ColumnAdded { nullable: false, .. } => Severity::Medium,
            SchemaChange::ColumnAdded { nullable: true, .. } => Severity::Low,
        }
    }
}

/// Freshness violation measurements.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FreshnessDetail {
    pub last_update: DateTime<Utc>,
    pub sla_minutes: i64,
    pub minutes_overdue: i64,
}

/// Detector-specific payload, stored serialized on the anomaly row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnomalyDetail {
    SchemaDrift { changes: Vec<SchemaChange> },
    Freshness(FreshnessDetail),
}

impl AnomalyDetail {
    pub fn anomaly_type(&self) -> AnomalyType {
        match self {
            AnomalyDetail::SchemaDrift { .. } => AnomalyType::SchemaDrift,
            AnomalyDetail::Freshness(_) => AnomalyType::FreshnessViolation,
        }
    }
}

/// A raw detector signal. Never mutated once persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: i64,
    pub table_id: i64,
    #[serde(rename = "type")]
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub detail: AnomalyDetail,
    pub detected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_severity_table() {
        let deleted = SchemaChange::ColumnDeleted {
            column: "price".into(),
            data_type: "FLOAT".into(),
        };
        assert_eq!(deleted.severity(), Severity::Critical);

        let added_nullable = SchemaChange::ColumnAdded {
            column: "note".into(),
            data_type: "TEXT".into(),
            nullable: true,
        };
        assert_eq!(added_nullable.severity(), Severity::Low);

        let added_required = SchemaChange::ColumnAdded {
            column: "tenant".into(),
            data_type: "INT".into(),
            nullable: false,
        };
        assert_eq!(added_required.severity(), Severity::Medium);
    }

    #[test]
    fn detail_round_trips_with_tag() {
        let detail = AnomalyDetail::SchemaDrift {
            changes: vec![SchemaChange::ColumnTypeChanged {
                column: "price".into(),
                from: "FLOAT".into(),
                to: "VARCHAR(255)".into(),
            }],
        };
        let json = serde_json::to_string(&detail).unwrap();
        assert!(json.contains("\"kind\":\"schema_drift\""));
        assert!(json.contains("\"change\":\"column_type_changed\""));
        let back: AnomalyDetail = serde_json::from_str(&json).unwrap();
        assert_eq!(back, detail);
    }
}
