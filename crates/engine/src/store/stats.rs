//! Aggregate dashboard statistics.

use super::{db_err, Store};
use aegis_core::Result;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardStats {
    /// 0–100; share of monitored tables without an open incident.
    pub health_score: f64,
    pub total_tables: i64,
    pub healthy_tables: i64,
    pub open_incidents: i64,
    pub critical_incidents: i64,
    pub anomalies_24h: i64,
    pub avg_resolution_time_minutes: Option<f64>,
}

const ACTIVE: &str = "('open', 'investigating', 'pending_review')";

impl Store {
    pub fn dashboard_stats(&self) -> Result<DashboardStats> {
        let total_tables = self.count_tables()?;
        let anomalies_24h = self.count_anomalies_since(Utc::now() - Duration::hours(24))?;

        let conn = self.lock();

        let open_incidents: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM incidents WHERE status IN {ACTIVE}"),
                [],
                |row| row.get(0),
            )
            .map_err(db_err)?;

        let critical_incidents: i64 = conn
            .query_row(
                &format!(
                    "SELECT COUNT(*) FROM incidents
                     WHERE status IN {ACTIVE} AND severity = 'critical'"
                ),
                [],
                |row| row.get(0),
            )
            .map_err(db_err)?;

        let tables_with_incidents: i64 = conn
            .query_row(
                &format!(
                    "SELECT COUNT(DISTINCT table_id) FROM incidents WHERE status IN {ACTIVE}"
                ),
                [],
                |row| row.get(0),
            )
            .map_err(db_err)?;

        // Mean open-to-resolution interval over resolved incidents.
        let avg_resolution_time_minutes: Option<f64> = conn
            .query_row(
                "SELECT AVG((julianday(resolved_at) - julianday(created_at)) * 1440.0)
                 FROM incidents WHERE resolved_at IS NOT NULL",
                [],
                |row| row.get(0),
            )
            .map_err(db_err)?;

        let healthy_tables = (total_tables - tables_with_incidents).max(0);
        let health_score = if total_tables > 0 {
            (healthy_tables as f64 / total_tables as f64 * 1000.0).round() / 10.0
        } else {
            100.0
        };

        Ok(DashboardStats {
            health_score,
            total_tables,
            healthy_tables,
            open_incidents,
            critical_incidents,
            anomalies_24h,
            avg_resolution_time_minutes: avg_resolution_time_minutes
                .map(|m| (m * 10.0).round() / 10.0),
        })
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_store_scores_perfect_health() {
        let store = Store::open_in_memory().unwrap();
        let stats = store.dashboard_stats().unwrap();
        assert_eq!(stats.health_score, 100.0);
        assert_eq!(stats.total_tables, 0);
        assert_eq!(stats.open_incidents, 0);
        assert!(stats.avg_resolution_time_minutes.is_none());
    }
}
