//! Lineage edge storage — idempotent upserts keyed by `(source, target)`.

use super::{db_err, format_ts, parse_ts, Store};
use aegis_core::{AegisError, EdgeRelationship, LineageEdge, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

const COLS: &str = "source_table, target_table, relationship, confidence, query_hash, \
                    first_seen_at, last_seen_at";

type EdgeRow = (String, String, String, f64, String, String, String);

fn read_row(row: &Row<'_>) -> rusqlite::Result<EdgeRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn into_edge(
    (source_table, target_table, relationship, confidence, query_hash, first_seen, last_seen): EdgeRow,
) -> Result<LineageEdge> {
    Ok(LineageEdge {
        source_table,
        target_table,
        relationship: EdgeRelationship::parse(&relationship).ok_or_else(|| {
            AegisError::Storage(format!("unknown relationship {relationship:?}"))
        })?,
        confidence,
        query_hash,
        first_seen_at: parse_ts(&first_seen)?,
        last_seen_at: parse_ts(&last_seen)?,
    })
}

impl Store {
    /// Upsert: re-observation refreshes `last_seen_at` and takes the max
    /// confidence; it never lowers an existing score.
    pub fn upsert_lineage_edge(
        &self,
        source: &str,
        target: &str,
        relationship: EdgeRelationship,
        confidence: f64,
        query_hash: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO lineage_edges
                 (source_table, target_table, relationship, confidence, query_hash,
                  first_seen_at, last_seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT (source_table, target_table) DO UPDATE SET
                 last_seen_at = excluded.last_seen_at,
                 confidence = MAX(confidence, excluded.confidence),
                 query_hash = excluded.query_hash",
            params![
                source,
                target,
                relationship.as_str(),
                confidence,
                query_hash,
                format_ts(seen_at)
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Outgoing non-stale edges (`last_seen_at >= cutoff`).
    pub fn edges_from(&self, source: &str, cutoff: DateTime<Utc>) -> Result<Vec<LineageEdge>> {
        self.query_edges(
            &format!(
                "SELECT {COLS} FROM lineage_edges
                 WHERE source_table = ?1 AND last_seen_at >= ?2
                 ORDER BY target_table"
            ),
            source,
            cutoff,
        )
    }

    /// Incoming non-stale edges.
    pub fn edges_into(&self, target: &str, cutoff: DateTime<Utc>) -> Result<Vec<LineageEdge>> {
        self.query_edges(
            &format!(
                "SELECT {COLS} FROM lineage_edges
                 WHERE target_table = ?1 AND last_seen_at >= ?2
                 ORDER BY source_table"
            ),
            target,
            cutoff,
        )
    }

    fn query_edges(
        &self,
        sql: &str,
        node: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<LineageEdge>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params![node, format_ts(cutoff)], read_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        rows.into_iter().map(into_edge).collect()
    }

    /// Every non-stale edge, for graph rendering.
    pub fn all_edges(&self, cutoff: DateTime<Utc>) -> Result<Vec<LineageEdge>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {COLS} FROM lineage_edges
                 WHERE last_seen_at >= ?1
                 ORDER BY source_table, target_table"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![format_ts(cutoff)], read_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        rows.into_iter().map(into_edge).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn upsert_never_lowers_confidence() {
        let store = Store::open_in_memory().unwrap();
        let t0 = Utc::now() - Duration::hours(1);
        let t1 = Utc::now();

        store
            .upsert_lineage_edge("raw.x", "stg.x", EdgeRelationship::Direct, 1.0, "h1", t0)
            .unwrap();
        store
            .upsert_lineage_edge("raw.x", "stg.x", EdgeRelationship::Direct, 0.6, "h2", t1)
            .unwrap();

        let edges = store.edges_from("raw.x", t0 - Duration::hours(1)).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].confidence, 1.0);
        assert_eq!(edges[0].last_seen_at, parse_ts(&format_ts(t1)).unwrap());
    }

    #[test]
    fn stale_edges_are_excluded_but_kept() {
        let store = Store::open_in_memory().unwrap();
        let old = Utc::now() - Duration::days(31);

        store
            .upsert_lineage_edge("raw.x", "stg.x", EdgeRelationship::Direct, 1.0, "h", old)
            .unwrap();

        let cutoff = Utc::now() - Duration::days(30);
        assert!(store.edges_from("raw.x", cutoff).unwrap().is_empty());

        // Still in storage for auditability.
        let all_time = Utc::now() - Duration::days(365);
        assert_eq!(store.edges_from("raw.x", all_time).unwrap().len(), 1);
    }
}
