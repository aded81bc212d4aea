//! Lineage engine — SQL-log ingest and DAG queries.
//!
//! Edges live in the store keyed by `(source, target)`. Queries only see
//! edges observed within the staleness window; older edges stay stored for
//! audit but never contribute to traversals.

pub mod sql;

pub use sql::{extract_edges, ParsedEdge};

use crate::connector::WarehouseConnector;
use crate::store::Store;
use aegis_core::{
    BlastRadius, GraphEdge, GraphNode, LineageGraphView, LineageNode, Result,
};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

/// Edges unseen for this long stop contributing to queries.
pub const STALE_DAYS: i64 = 30;

/// Default traversal depth for diagnosis context.
pub const DEFAULT_DEPTH: u32 = 3;

/// Hard ceiling for blast-radius walks.
pub const MAX_DEPTH: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Upstream,
    Downstream,
}

pub struct LineageService {
    store: Arc<Store>,
}

impl LineageService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    fn cutoff() -> DateTime<Utc> {
        Utc::now() - Duration::days(STALE_DAYS)
    }

    /// Pull the query log and upsert every extracted edge. Returns the edge
    /// count observed (not necessarily newly created).
    pub async fn ingest(
        &self,
        connector: &dyn WarehouseConnector,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize> {
        let entries = connector.extract_query_log(since, limit).await?;
        let dialect = connector.dialect();
        let now = Utc::now();

        let mut observed = 0;
        for entry in &entries {
            let edges = extract_edges(&entry.sql, dialect);
            if edges.is_empty() {
                continue;
            }
            let query_hash = short_hash(&entry.sql);
            for edge in edges {
                self.store.upsert_lineage_edge(
                    &edge.source,
                    &edge.target,
                    edge.relationship,
                    edge.confidence,
                    &query_hash,
                    now,
                )?;
                observed += 1;
            }
        }

        info!(
            entries = entries.len(),
            edges = observed,
            "lineage ingest complete"
        );
        Ok(observed)
    }

    pub fn upstream(
        &self,
        table: &str,
        depth: u32,
        min_confidence: f64,
    ) -> Result<Vec<LineageNode>> {
        self.bfs(table, depth, min_confidence, Direction::Upstream)
    }

    pub fn downstream(
        &self,
        table: &str,
        depth: u32,
        min_confidence: f64,
    ) -> Result<Vec<LineageNode>> {
        self.bfs(table, depth, min_confidence, Direction::Downstream)
    }

    /// Full downstream impact in the non-stale subgraph.
    pub fn blast_radius(&self, table: &str) -> Result<BlastRadius> {
        let affected = self.downstream(table, MAX_DEPTH, 0.0)?;
        let cutoff = Self::cutoff();

        let max_depth = affected.iter().map(|n| n.depth).max().unwrap_or(0);
        let mut has_terminal_consumers = false;
        for node in &affected {
            if self.store.edges_from(&node.table, cutoff)?.is_empty() {
                has_terminal_consumers = true;
                break;
            }
        }

        Ok(BlastRadius {
            table: table.to_string(),
            total: affected.len(),
            affected_tables: affected,
            max_depth,
            has_terminal_consumers,
        })
    }

    /// Shortest dependency path by hop count; ties broken by the higher
    /// product confidence.
    pub fn path(&self, source: &str, target: &str) -> Result<Option<Vec<String>>> {
        if source == target {
            return Ok(Some(vec![source.to_string()]));
        }
        let cutoff = Self::cutoff();

        // Layered BFS: each layer is fully settled before the next is
        // expanded, so equal-hop candidates can be compared by confidence.
        let mut best: HashMap<String, (f64, Vec<String>)> = HashMap::new();
        best.insert(source.to_string(), (1.0, vec![source.to_string()]));
        let mut frontier: Vec<String> = vec![source.to_string()];
        let mut settled: BTreeSet<String> = BTreeSet::new();
        settled.insert(source.to_string());

        while !frontier.is_empty() {
            let mut next: HashMap<String, (f64, Vec<String>)> = HashMap::new();

            for node in &frontier {
                let (conf, path) = best[node].clone();
                for edge in self.store.edges_from(node, cutoff)? {
                    if settled.contains(&edge.target_table) {
                        continue;
                    }
                    let cand_conf = conf * edge.confidence;
                    let mut cand_path = path.clone();
                    cand_path.push(edge.target_table.clone());

                    let better = match next.get(&edge.target_table) {
                        None => true,
                        Some((existing_conf, existing_path)) => {
                            cand_conf > *existing_conf
                                || (cand_conf == *existing_conf && cand_path < *existing_path)
                        }
                    };
                    if better {
                        next.insert(edge.target_table.clone(), (cand_conf, cand_path));
                    }
                }
            }

            if let Some((_, path)) = next.get(target) {
                return Ok(Some(path.clone()));
            }

            frontier = next.keys().cloned().collect();
            frontier.sort();
            for (node, entry) in next {
                settled.insert(node.clone());
                best.insert(node, entry);
            }
        }

        Ok(None)
    }

    /// Full non-stale graph for visualization.
    pub fn graph(&self) -> Result<LineageGraphView> {
        let edges = self.store.all_edges(Self::cutoff())?;

        let mut nodes: BTreeSet<String> = BTreeSet::new();
        let mut view_edges = Vec::with_capacity(edges.len());
        for edge in edges {
            nodes.insert(edge.source_table.clone());
            nodes.insert(edge.target_table.clone());
            view_edges.push(GraphEdge {
                source: edge.source_table,
                target: edge.target_table,
                relationship: edge.relationship,
                confidence: edge.confidence,
            });
        }

        Ok(LineageGraphView {
            nodes: nodes
                .into_iter()
                .map(|id| GraphNode {
                    label: id.clone(),
                    id,
                })
                .collect(),
            edges: view_edges,
        })
    }

    fn bfs(
        &self,
        start: &str,
        depth: u32,
        min_confidence: f64,
        direction: Direction,
    ) -> Result<Vec<LineageNode>> {
        let cutoff = Self::cutoff();
        let mut results: Vec<LineageNode> = Vec::new();
        let mut visited: BTreeSet<String> = BTreeSet::new();
        visited.insert(start.to_string());
        let mut queue: VecDeque<(String, u32, f64)> = VecDeque::new();
        queue.push_back((start.to_string(), 0, 1.0));

        while let Some((current, current_depth, current_conf)) = queue.pop_front() {
            if current_depth >= depth {
                continue;
            }

            let edges = match direction {
                Direction::Downstream => self.store.edges_from(&current, cutoff)?,
                Direction::Upstream => self.store.edges_into(&current, cutoff)?,
            };

            // Store returns neighbors name-ordered, which makes traversal
            // order (and therefore first-reach confidence) deterministic.
            for edge in edges {
                if edge.confidence < min_confidence {
                    continue;
                }
                let neighbor = match direction {
                    Direction::Downstream => edge.target_table,
                    Direction::Upstream => edge.source_table,
                };
                if !visited.insert(neighbor.clone()) {
                    continue;
                }
                let conf = current_conf * edge.confidence;
                results.push(LineageNode {
                    table: neighbor.clone(),
                    depth: current_depth + 1,
                    confidence: conf,
                });
                queue.push_back((neighbor, current_depth + 1, conf));
            }
        }

        debug!(
            start,
            reached = results.len(),
            "lineage traversal complete"
        );
        Ok(results)
    }
}

fn short_hash(sql: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sql.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::EdgeRelationship;

    fn service_with_chain() -> LineageService {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let now = Utc::now();
        for (source, target, confidence) in [
            ("raw.x", "stg.x", 1.0),
            ("stg.x", "mart.x", 0.8),
            ("mart.x", "dash.x", 1.0),
        ] {
            store
                .upsert_lineage_edge(
                    source,
                    target,
                    EdgeRelationship::Direct,
                    confidence,
                    "h",
                    now,
                )
                .unwrap();
        }
        LineageService::new(store)
    }

    #[test]
    fn downstream_walks_depth_and_multiplies_confidence() {
        let service = service_with_chain();
        let nodes = service.downstream("raw.x", 3, 0.0).unwrap();
        assert_eq!(nodes.len(), 3);

        let mart = nodes.iter().find(|n| n.table == "mart.x").unwrap();
        assert_eq!(mart.depth, 2);
        assert!((mart.confidence - 0.8).abs() < 1e-9);

        let shallow = service.downstream("raw.x", 1, 0.0).unwrap();
        assert_eq!(shallow.len(), 1);
        assert_eq!(shallow[0].table, "stg.x");
    }

    #[test]
    fn upstream_is_the_reverse_walk() {
        let service = service_with_chain();
        let nodes = service.upstream("mart.x", 10, 0.0).unwrap();
        let tables: Vec<&str> = nodes.iter().map(|n| n.table.as_str()).collect();
        assert_eq!(tables, vec!["stg.x", "raw.x"]);
    }

    #[test]
    fn min_confidence_prunes_edges() {
        let service = service_with_chain();
        let nodes = service.downstream("raw.x", 10, 0.9).unwrap();
        // The 0.8 edge stg.x → mart.x is pruned, cutting the walk short.
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].table, "stg.x");
    }

    #[test]
    fn blast_radius_reports_terminal_consumers() {
        let service = service_with_chain();
        let radius = service.blast_radius("raw.x").unwrap();
        assert_eq!(radius.total, 3);
        assert_eq!(radius.max_depth, 3);
        assert!(radius.has_terminal_consumers);
    }

    #[test]
    fn stale_edges_do_not_contribute() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let stale = Utc::now() - Duration::days(31);
        let fresh = Utc::now();
        store
            .upsert_lineage_edge("raw.x", "stg.x", EdgeRelationship::Direct, 1.0, "h", stale)
            .unwrap();
        store
            .upsert_lineage_edge("stg.x", "mart.x", EdgeRelationship::Direct, 1.0, "h", fresh)
            .unwrap();
        let service = LineageService::new(store);

        assert_eq!(service.blast_radius("raw.x").unwrap().total, 0);
        let from_stg = service.blast_radius("stg.x").unwrap();
        assert_eq!(from_stg.total, 1);
        assert_eq!(from_stg.affected_tables[0].table, "mart.x");
    }

    #[test]
    fn cycles_terminate() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let now = Utc::now();
        store
            .upsert_lineage_edge("a.t", "b.t", EdgeRelationship::Direct, 1.0, "h", now)
            .unwrap();
        store
            .upsert_lineage_edge("b.t", "a.t", EdgeRelationship::Direct, 1.0, "h", now)
            .unwrap();
        let service = LineageService::new(store);

        let nodes = service.downstream("a.t", 10, 0.0).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].table, "b.t");
    }

    #[test]
    fn shortest_path_prefers_fewer_hops_then_confidence() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let now = Utc::now();
        // Two 2-hop routes a→{b,c}→d with different products, plus a longer
        // 3-hop route that must lose regardless of confidence.
        for (s, t, c) in [
            ("a.t", "b.t", 0.9),
            ("b.t", "d.t", 0.9),
            ("a.t", "c.t", 1.0),
            ("c.t", "d.t", 1.0),
            ("a.t", "e.t", 1.0),
            ("e.t", "f.t", 1.0),
            ("f.t", "d.t", 1.0),
        ] {
            store
                .upsert_lineage_edge(s, t, EdgeRelationship::Direct, c, "h", now)
                .unwrap();
        }
        let service = LineageService::new(store);

        let path = service.path("a.t", "d.t").unwrap().unwrap();
        assert_eq!(path, vec!["a.t", "c.t", "d.t"]);
        assert!(service.path("d.t", "a.t").unwrap().is_none());
    }
}
