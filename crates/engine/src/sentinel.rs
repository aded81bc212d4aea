//! Sentinels — deterministic anomaly detectors, no LLM involvement.
//!
//! The schema sentinel compares content-addressed snapshots of a table's
//! column list; the freshness sentinel compares the last observed update
//! against the table's SLA. Both persist through the store and emit at most
//! one anomaly per inspection.

use crate::connector::WarehouseConnector;
use crate::store::Store;
use aegis_core::{
    Anomaly, AnomalyDetail, CheckType, ColumnDef, FreshnessDetail, MonitoredTable, Result,
    SchemaChange, Severity,
};
use aegis_core::schema::snapshot_hash;
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{info, warn};

// ============================================================================
// Schema drift
// ============================================================================

pub struct SchemaSentinel;

impl SchemaSentinel {
    /// Inspect one table for schema drift. Persists the new snapshot (and
    /// anomaly, when drift was found) atomically; an unchanged hash writes
    /// nothing.
    pub async fn inspect(
        &self,
        table: &MonitoredTable,
        connector: &dyn WarehouseConnector,
        store: &Store,
    ) -> Result<Option<Anomaly>> {
        let fqn = table.fully_qualified_name();
        let columns = connector
            .fetch_columns(&table.schema_name, &table.table_name)
            .await?;

        if columns.is_empty() {
            warn!(table = %fqn, "catalog reported zero columns, skipping");
            return Ok(None);
        }

        let current_hash = snapshot_hash(&columns);
        let now = Utc::now();

        let prior = store.latest_snapshot(table.id)?;
        let prior = match prior {
            None => {
                // Establishing the baseline is not drift.
                info!(table = %fqn, "first snapshot captured, no baseline to compare");
                store.insert_snapshot_with_anomaly(table.id, &columns, &current_hash, now, None)?;
                return Ok(None);
            }
            Some(prior) => prior,
        };

        if prior.snapshot_hash == current_hash {
            return Ok(None);
        }

        let changes = diff_columns(&prior.columns, &columns);
        if changes.is_empty() {
            // Hash moved without a nameable change (e.g. pure ordinal
            // shuffle); record the new baseline silently.
            store.insert_snapshot_with_anomaly(table.id, &columns, &current_hash, now, None)?;
            return Ok(None);
        }

        let severity = classify_drift(&changes);
        warn!(
            table = %fqn,
            changes = changes.len(),
            severity = %severity,
            "schema drift detected"
        );

        let detail = AnomalyDetail::SchemaDrift { changes };
        let anomaly = store.insert_snapshot_with_anomaly(
            table.id,
            &columns,
            &current_hash,
            now,
            Some((severity, &detail)),
        )?;
        Ok(anomaly)
    }
}

/// Positional + by-name diff of two column lists.
///
/// An added/deleted pair at the same ordinal with a compatible type is
/// folded into a single rename. When several candidates collide on one
/// ordinal the name-ordered first pair wins and the rest stay as raw
/// add/delete.
pub fn diff_columns(old: &[ColumnDef], new: &[ColumnDef]) -> Vec<SchemaChange> {
    let old_by_name: BTreeMap<&str, &ColumnDef> =
        old.iter().map(|c| (c.name.as_str(), c)).collect();
    let new_by_name: BTreeMap<&str, &ColumnDef> =
        new.iter().map(|c| (c.name.as_str(), c)).collect();

    let mut deleted: Vec<&ColumnDef> = old
        .iter()
        .filter(|c| !new_by_name.contains_key(c.name.as_str()))
        .collect();
    let mut added: Vec<&ColumnDef> = new
        .iter()
        .filter(|c| !old_by_name.contains_key(c.name.as_str()))
        .collect();
    deleted.sort_by(|a, b| a.name.cmp(&b.name));
    added.sort_by(|a, b| a.name.cmp(&b.name));

    let mut changes = Vec::new();

    // Rename inference: same ordinal, different name, compatible type.
    let mut renamed_old: Vec<String> = Vec::new();
    let mut renamed_new: Vec<String> = Vec::new();
    for gone in &deleted {
        if renamed_old.contains(&gone.name) {
            continue;
        }
        let candidate = added.iter().find(|came| {
            !renamed_new.contains(&came.name)
                && came.ordinal == gone.ordinal
                && types_compatible(&gone.data_type, &came.data_type)
        });
        if let Some(came) = candidate {
            changes.push(SchemaChange::ColumnRenamed {
                from: gone.name.clone(),
                to: came.name.clone(),
                ordinal: gone.ordinal,
                data_type: came.data_type.clone(),
            });
            renamed_old.push(gone.name.clone());
            renamed_new.push(came.name.clone());
        }
    }

    for gone in &deleted {
        if !renamed_old.contains(&gone.name) {
            changes.push(SchemaChange::ColumnDeleted {
                column: gone.name.clone(),
                data_type: gone.data_type.clone(),
            });
        }
    }

    for came in &added {
        if !renamed_new.contains(&came.name) {
            changes.push(SchemaChange::ColumnAdded {
                column: came.name.clone(),
                data_type: came.data_type.clone(),
                nullable: came.nullable,
            });
        }
    }

    for (name, old_col) in &old_by_name {
        if let Some(new_col) = new_by_name.get(name) {
            if !types_compatible(&old_col.data_type, &new_col.data_type) {
                changes.push(SchemaChange::ColumnTypeChanged {
                    column: (*name).to_string(),
                    from: old_col.data_type.clone(),
                    to: new_col.data_type.clone(),
                });
            }
        }
    }

    changes
}

fn types_compatible(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Severity of a drift anomaly = max over its changes.
pub fn classify_drift(changes: &[SchemaChange]) -> Severity {
    changes
        .iter()
        .map(SchemaChange::severity)
        .fold(Severity::Low, Severity::max)
}

// ============================================================================
// Freshness
// ============================================================================

pub struct FreshnessSentinel;

impl FreshnessSentinel {
    /// Inspect one table against its freshness SLA. Tables without an SLA or
    /// without any observable update time opt out silently.
    pub async fn inspect(
        &self,
        table: &MonitoredTable,
        connector: &dyn WarehouseConnector,
        store: &Store,
    ) -> Result<Option<Anomaly>> {
        if !table.has_check(CheckType::Freshness) {
            return Ok(None);
        }
        let sla_minutes = match table.freshness_sla_minutes {
            Some(sla) if sla > 0 => sla,
            _ => return Ok(None),
        };

        let fqn = table.fully_qualified_name();
        let last_update = match connector
            .fetch_last_update_time(&table.schema_name, &table.table_name)
            .await?
        {
            Some(ts) => ts,
            None => {
                info!(table = %fqn, "no update timestamp available, freshness not evaluable");
                return Ok(None);
            }
        };

        let now = Utc::now();
        let minutes_since = (now - last_update).num_minutes();
        let minutes_overdue = minutes_since - sla_minutes;
        if minutes_overdue <= 0 {
            return Ok(None);
        }

        let severity = classify_staleness(minutes_overdue, sla_minutes);
        warn!(
            table = %fqn,
            minutes_overdue,
            severity = %severity,
            "freshness violation detected"
        );

        let detail = AnomalyDetail::Freshness(FreshnessDetail {
            last_update,
            sla_minutes,
            minutes_overdue,
        });
        let anomaly = store.insert_anomaly(table.id, severity, &detail, now)?;
        Ok(Some(anomaly))
    }
}

/// Severity scales with how many SLA windows have elapsed since the breach.
pub fn classify_staleness(minutes_overdue: i64, sla_minutes: i64) -> Severity {
    let ratio = minutes_overdue as f64 / sla_minutes as f64;
    if ratio >= 4.0 {
        Severity::Critical
    } else if ratio >= 1.0 {
        Severity::High
    } else {
        Severity::Medium
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, ty: &str, nullable: bool, ordinal: u32) -> ColumnDef {
        ColumnDef {
            name: name.to_string(),
            data_type: ty.to_string(),
            nullable,
            ordinal,
        }
    }

    #[test]
    fn type_change_is_critical() {
        let old = vec![col("id", "INT", false, 1), col("price", "FLOAT", true, 2)];
        let new = vec![
            col("id", "INT", false, 1),
            col("price", "VARCHAR(255)", true, 2),
        ];
        let changes = diff_columns(&old, &new);
        assert_eq!(
            changes,
            vec![SchemaChange::ColumnTypeChanged {
                column: "price".into(),
                from: "FLOAT".into(),
                to: "VARCHAR(255)".into(),
            }]
        );
        assert_eq!(classify_drift(&changes), Severity::Critical);
    }

    #[test]
    fn rename_is_inferred_from_ordinal_and_type() {
        let old = vec![col("id", "INT", false, 1), col("cost", "FLOAT", true, 2)];
        let new = vec![col("id", "INT", false, 1), col("price", "FLOAT", true, 2)];
        let changes = diff_columns(&old, &new);
        assert_eq!(
            changes,
            vec![SchemaChange::ColumnRenamed {
                from: "cost".into(),
                to: "price".into(),
                ordinal: 2,
                data_type: "FLOAT".into(),
            }]
        );
        assert_eq!(classify_drift(&changes), Severity::High);
    }

    #[test]
    fn incompatible_type_blocks_rename_inference() {
        let old = vec![col("cost", "FLOAT", true, 1)];
        let new = vec![col("price", "TEXT", true, 1)];
        let changes = diff_columns(&old, &new);
        assert_eq!(changes.len(), 2);
        assert!(matches!(changes[0], SchemaChange::ColumnDeleted { .. }));
        assert!(matches!(changes[1], SchemaChange::ColumnAdded { .. }));
    }

    #[test]
    fn added_column_severity_follows_nullability() {
        let old = vec![col("id", "INT", false, 1)];
        let with_nullable = vec![col("id", "INT", false, 1), col("note", "TEXT", true, 2)];
        let with_required = vec![col("id", "INT", false, 1), col("tenant", "INT", false, 2)];

        assert_eq!(
            classify_drift(&diff_columns(&old, &with_nullable)),
            Severity::Low
        );
        assert_eq!(
            classify_drift(&diff_columns(&old, &with_required)),
            Severity::Medium
        );
    }

    #[test]
    fn multiple_changes_take_max_severity() {
        let old = vec![col("id", "INT", false, 1), col("price", "FLOAT", true, 2)];
        let new = vec![col("id", "INT", false, 1), col("note", "TEXT", true, 3)];
        // price deleted (critical) + note added nullable (low)
        let changes = diff_columns(&old, &new);
        assert_eq!(changes.len(), 2);
        assert_eq!(classify_drift(&changes), Severity::Critical);
    }

    #[test]
    fn staleness_severity_by_sla_ratio() {
        // 30 overdue on a 60-minute SLA: under one window.
        assert_eq!(classify_staleness(30, 60), Severity::Medium);
        assert_eq!(classify_staleness(60, 60), Severity::High);
        assert_eq!(classify_staleness(180, 60), Severity::High);
        assert_eq!(classify_staleness(240, 60), Severity::Critical);
    }

    #[test]
    fn ambiguous_renames_stay_conservative() {
        // Two columns dropped, two appeared, only one ordinal matches.
        let old = vec![col("a", "INT", true, 1), col("b", "INT", true, 2)];
        let new = vec![col("c", "INT", true, 1), col("d", "INT", true, 3)];
        let changes = diff_columns(&old, &new);

        let renames: Vec<_> = changes
            .iter()
            .filter(|c| matches!(c, SchemaChange::ColumnRenamed { .. }))
            .collect();
        assert_eq!(renames.len(), 1);
        assert!(matches!(
            renames[0],
            SchemaChange::ColumnRenamed { from, to, .. }
                if from.as_str() == "a" && to.as_str() == "c"
        ));
    }
}
