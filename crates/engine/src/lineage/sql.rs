//! SQL-to-edge extraction.
//!
//! Parses captured warehouse statements and emits `(source → target)` pairs
//! for statements with a single write target (INSERT, CREATE TABLE AS,
//! MERGE). Source confidence decays with how deeply the reference is nested.

use aegis_core::{Dialect, EdgeRelationship};
use sqlparser::ast::{ObjectName, Statement, TableObject, Visit, Visitor};
use sqlparser::dialect::{BigQueryDialect, GenericDialect, PostgreSqlDialect, SnowflakeDialect};
use sqlparser::parser::Parser;
use std::collections::HashSet;
use std::ops::ControlFlow;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEdge {
    pub source: String,
    pub target: String,
    pub relationship: EdgeRelationship,
    pub confidence: f64,
}

/// Extract lineage edges from one captured statement. Unparseable SQL yields
/// no edges; the parse failure is interesting only at DEBUG.
pub fn extract_edges(sql: &str, dialect: Dialect) -> Vec<ParsedEdge> {
    let statements = match parse(sql, dialect) {
        Ok(statements) => statements,
        Err(e) => {
            debug!(error = %e, "skipping unparseable statement");
            return Vec::new();
        }
    };

    let mut edges = Vec::new();
    for statement in &statements {
        let target = match write_target(statement) {
            Some(target) => target,
            None => continue,
        };
        let aggregated = statement.to_string().to_uppercase().contains("GROUP BY");

        for (source, nesting) in collect_sources(statement) {
            if source == target {
                continue;
            }
            let confidence = match nesting {
                0 => 1.0,
                1 | 2 => 0.8,
                _ => 0.6,
            };
            let relationship = if aggregated {
                EdgeRelationship::Aggregated
            } else if nesting == 0 {
                EdgeRelationship::Direct
            } else {
                EdgeRelationship::Derived
            };
            edges.push(ParsedEdge {
                source,
                target: target.clone(),
                relationship,
                confidence,
            });
        }
    }
    edges
}

fn parse(sql: &str, dialect: Dialect) -> Result<Vec<Statement>, sqlparser::parser::ParserError> {
    match dialect {
        Dialect::Postgres => Parser::parse_sql(&PostgreSqlDialect {}, sql),
        Dialect::Snowflake => Parser::parse_sql(&SnowflakeDialect {}, sql),
        Dialect::Bigquery => Parser::parse_sql(&BigQueryDialect {}, sql)
            .or_else(|_| Parser::parse_sql(&GenericDialect {}, sql)),
    }
}

/// The single write target of the statement, when it has one.
fn write_target(statement: &Statement) -> Option<String> {
    match statement {
        Statement::Insert(insert) => match &insert.table {
            TableObject::TableName(name) => Some(object_name(name)),
            _ => None,
        },
        // Only CREATE TABLE ... AS SELECT produces lineage; a bare DDL
        // CREATE has no sources.
        Statement::CreateTable(create) if create.query.is_some() => {
            Some(object_name(&create.name))
        }
        Statement::Merge { table, .. } => {
            use sqlparser::ast::TableFactor;
            match table {
                TableFactor::Table { name, .. } => Some(object_name(name)),
                _ => None,
            }
        }
        _ => None,
    }
}

fn object_name(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|part| part.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

/// Every table referenced anywhere in the statement, deduplicated, with the
/// query-nesting level it first appears at (0 = top-level FROM). References
/// to CTE aliases are not tables and are dropped.
fn collect_sources(statement: &Statement) -> Vec<(String, u32)> {
    struct SourceCollector {
        query_depth: u32,
        cte_aliases: HashSet<String>,
        seen: HashSet<String>,
        sources: Vec<(String, u32)>,
    }

    impl Visitor for SourceCollector {
        type Break = ();

        fn pre_visit_query(&mut self, query: &sqlparser::ast::Query) -> ControlFlow<()> {
            self.query_depth += 1;
            if let Some(with) = &query.with {
                for cte in &with.cte_tables {
                    self.cte_aliases.insert(cte.alias.name.value.clone());
                }
            }
            ControlFlow::Continue(())
        }

        fn post_visit_query(&mut self, _query: &sqlparser::ast::Query) -> ControlFlow<()> {
            self.query_depth = self.query_depth.saturating_sub(1);
            ControlFlow::Continue(())
        }

        fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<()> {
            let name = object_name(relation);
            if relation.0.len() == 1 && self.cte_aliases.contains(&name) {
                return ControlFlow::Continue(());
            }
            if self.seen.insert(name.clone()) {
                // The first query level is the statement's own SELECT; only
                // deeper levels count as nesting.
                self.sources
                    .push((name, self.query_depth.saturating_sub(1)));
            }
            ControlFlow::Continue(())
        }
    }

    let mut collector = SourceCollector {
        query_depth: 0,
        cte_aliases: HashSet::new(),
        seen: HashSet::new(),
        sources: Vec::new(),
    };
    let _ = statement.visit(&mut collector);
    collector.sources
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edges(sql: &str) -> Vec<ParsedEdge> {
        extract_edges(sql, Dialect::Postgres)
    }

    #[test]
    fn insert_select_yields_direct_edge() {
        let found = edges("INSERT INTO mart.orders SELECT * FROM stg.orders");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source, "stg.orders");
        assert_eq!(found[0].target, "mart.orders");
        assert_eq!(found[0].confidence, 1.0);
        assert_eq!(found[0].relationship, EdgeRelationship::Direct);
    }

    #[test]
    fn create_table_as_is_a_write_target() {
        let found = edges("CREATE TABLE mart.daily AS SELECT * FROM stg.orders o JOIN stg.users u ON o.user_id = u.id");
        assert_eq!(found.len(), 2);
        let sources: Vec<&str> = found.iter().map(|e| e.source.as_str()).collect();
        assert!(sources.contains(&"stg.orders"));
        assert!(sources.contains(&"stg.users"));
        assert!(found.iter().all(|e| e.target == "mart.daily"));
        assert!(found.iter().all(|e| e.confidence == 1.0));
    }

    #[test]
    fn bare_create_table_has_no_edges() {
        assert!(edges("CREATE TABLE mart.empty (id INT)").is_empty());
    }

    #[test]
    fn subquery_sources_decay() {
        let found = edges(
            "INSERT INTO mart.top SELECT * FROM stg.orders WHERE user_id IN \
             (SELECT id FROM raw.vips)",
        );
        let direct = found.iter().find(|e| e.source == "stg.orders").unwrap();
        let nested = found.iter().find(|e| e.source == "raw.vips").unwrap();
        assert_eq!(direct.confidence, 1.0);
        assert_eq!(nested.confidence, 0.8);
        assert_eq!(nested.relationship, EdgeRelationship::Derived);
    }

    #[test]
    fn cte_sources_decay_and_aliases_are_not_tables() {
        let found = edges(
            "INSERT INTO mart.summary WITH recent AS (SELECT * FROM raw.events) \
             SELECT * FROM recent",
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source, "raw.events");
        assert_eq!(found[0].confidence, 0.8);
    }

    #[test]
    fn merge_uses_using_clause_as_source() {
        let found = edges(
            "MERGE INTO mart.users AS t USING stg.users AS s ON t.id = s.id \
             WHEN MATCHED THEN UPDATE SET name = s.name",
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source, "stg.users");
        assert_eq!(found[0].target, "mart.users");
    }

    #[test]
    fn group_by_marks_aggregation() {
        let found = edges(
            "INSERT INTO mart.daily SELECT day, count(*) FROM stg.orders GROUP BY day",
        );
        assert_eq!(found[0].relationship, EdgeRelationship::Aggregated);
    }

    #[test]
    fn self_edge_is_dropped() {
        let found = edges("INSERT INTO stg.orders SELECT * FROM stg.orders WHERE false");
        assert!(found.is_empty());
    }

    #[test]
    fn plain_select_has_no_target() {
        assert!(edges("SELECT * FROM stg.orders").is_empty());
    }

    #[test]
    fn unparseable_sql_is_skipped() {
        assert!(edges("THIS IS NOT SQL AT ALL ;;;").is_empty());
    }
}
