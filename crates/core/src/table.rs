//! Warehouse connections and monitored tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Warehouse dialect tag. Drives catalog filtering and SQL parsing hints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Postgres,
    Snowflake,
    Bigquery,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Snowflake => "snowflake",
            Dialect::Bigquery => "bigquery",
        }
    }

    pub fn parse(s: &str) -> Option<Dialect> {
        match s {
            "postgres" | "postgresql" => Some(Dialect::Postgres),
            "snowflake" => Some(Dialect::Snowflake),
            "bigquery" => Some(Dialect::Bigquery),
            _ => None,
        }
    }

    /// Catalog/system schemas that discovery and scanning must skip.
    pub fn is_system_schema(&self, schema: &str) -> bool {
        let lower = schema.to_ascii_lowercase();
        if lower == "information_schema" {
            return true;
        }
        match self {
            Dialect::Postgres => lower.starts_with("pg_"),
            Dialect::Snowflake => lower == "snowflake" || lower == "snowflake_sample_data",
            Dialect::Bigquery => lower.starts_with("_") || lower == "region-us",
        }
    }

    /// Column names recognized as update-time audit columns, in precedence
    /// order. The connector takes MAX over whichever of these exist before
    /// falling back to catalog-reported modification time.
    pub fn audit_columns() -> &'static [&'static str] {
        &[
            "updated_at",
            "modified_at",
            "created_at",
            "_loaded_at",
            "_etl_loaded_at",
        ]
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of an external warehouse. `uri` is ciphertext at rest; it is
/// decrypted only when a connector is instantiated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: i64,
    pub name: String,
    pub dialect: Dialect,
    #[serde(skip_serializing)]
    pub uri: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Which detectors run against a monitored table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    Schema,
    Freshness,
}

impl CheckType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckType::Schema => "schema",
            CheckType::Freshness => "freshness",
        }
    }

    pub fn parse(s: &str) -> Option<CheckType> {
        match s {
            "schema" => Some(CheckType::Schema),
            "freshness" => Some(CheckType::Freshness),
            _ => None,
        }
    }
}

/// A table registered for monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredTable {
    pub id: i64,
    pub connection_id: i64,
    pub schema_name: String,
    pub table_name: String,
    pub check_types: Vec<CheckType>,
    /// Absent means freshness checking is disabled for this table even when
    /// `Freshness` is among the check types.
    pub freshness_sla_minutes: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl MonitoredTable {
    /// Lineage graph key.
    pub fn fully_qualified_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.table_name)
    }

    pub fn has_check(&self, check: CheckType) -> bool {
        self.check_types.contains(&check)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_schema_filtering_per_dialect() {
        assert!(Dialect::Postgres.is_system_schema("pg_catalog"));
        assert!(Dialect::Postgres.is_system_schema("information_schema"));
        assert!(!Dialect::Postgres.is_system_schema("analytics"));
        assert!(Dialect::Snowflake.is_system_schema("SNOWFLAKE"));
        assert!(Dialect::Bigquery.is_system_schema("_internal"));
    }

    #[test]
    fn fqn_joins_schema_and_table() {
        let table = MonitoredTable {
            id: 1,
            connection_id: 1,
            schema_name: "analytics".into(),
            table_name: "orders".into(),
            check_types: vec![CheckType::Schema],
            freshness_sla_minutes: None,
            created_at: Utc::now(),
        };
        assert_eq!(table.fully_qualified_name(), "analytics.orders");
    }
}
