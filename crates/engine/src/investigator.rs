//! Investigator — warehouse discovery, classification, and rediscovery.
//!
//! Discovery has two paths. The primary path gives a chat model five
//! introspection tools bound to the live connector and lineage engine, and
//! bounds it by tool-call count and wall-clock time. The fallback walks the
//! catalog and classifies every table by naming convention. Rediscovery is
//! purely deterministic and never touches a model.

use crate::connector::WarehouseConnector;
use crate::lineage::{LineageService, DEFAULT_DEPTH};
use crate::llm::{ChatMessage, ChatRequest, LlmChatClient, ToolCall, ToolDef};
use crate::store::Store;
use aegis_core::{
    AegisError, CheckType, ColumnDef, Connection, DeltaAction, Dialect, DiscoveryReport, Result,
    TableDelta, TableProposal, TableRole,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Hard cap on agent tool calls per discovery run.
const MAX_TOOL_CALLS: usize = 25;

/// Wall-clock budget for one discovery run.
const DISCOVERY_DEADLINE: Duration = Duration::from_secs(120);

const SYSTEM_PROMPT: &str = "\
You are a data warehouse surveyor. Explore the warehouse with the provided \
tools, classify each table by its role (fact, dimension, staging, raw, \
snapshot, system, unknown), and propose a monitoring configuration.

When you are done, respond with a single JSON object:
{
  \"proposals\": [
    {\"schema_name\": string, \"table_name\": string,
     \"fully_qualified_name\": string, \"role\": string,
     \"columns\": [{\"name\": string, \"data_type\": string, \"nullable\": bool, \"ordinal\": int}],
     \"recommended_checks\": [\"schema\" | \"freshness\"],
     \"suggested_sla_minutes\": int or null,
     \"reasoning\": string, \"skip\": bool}
  ],
  \"concerns\": [string]
}

Mark temporary and backup tables with skip=true. Suggest freshness checks \
only for tables with an update timestamp column.";

pub struct Investigator {
    store: Arc<Store>,
    lineage: Arc<LineageService>,
    client: Option<Arc<dyn LlmChatClient>>,
}

impl Investigator {
    pub fn new(
        store: Arc<Store>,
        lineage: Arc<LineageService>,
        client: Option<Arc<dyn LlmChatClient>>,
    ) -> Self {
        Investigator {
            store,
            lineage,
            client,
        }
    }

    /// Survey a warehouse and propose a monitoring configuration per table.
    pub async fn discover(
        &self,
        connector: &dyn WarehouseConnector,
        connection: &Connection,
    ) -> Result<DiscoveryReport> {
        if let Some(client) = &self.client {
            let bounded = tokio::time::timeout(
                DISCOVERY_DEADLINE,
                self.agent_discover(client.as_ref(), connector, connection),
            )
            .await;
            match bounded {
                Ok(Ok(report)) => return Ok(report),
                Ok(Err(e)) => {
                    warn!(error = %e, "agent discovery failed, using rule-based walk");
                }
                Err(_) => {
                    warn!("agent discovery hit the wall-clock budget, using rule-based walk");
                }
            }
        }

        self.fallback_discover(connector, connection).await
    }

    /// Compare warehouse state against the monitored set. Deterministic,
    /// delta-only, no proposals and no model.
    pub async fn rediscover(
        &self,
        connector: &dyn WarehouseConnector,
        connection_id: i64,
    ) -> Result<Vec<TableDelta>> {
        let mut warehouse_fqns: BTreeSet<String> = BTreeSet::new();
        for schema in connector.list_schemas().await? {
            for entry in connector.list_tables(&schema).await? {
                warehouse_fqns.insert(format!("{schema}.{}", entry.name));
            }
        }

        let monitored_fqns = self.store.monitored_fqns(connection_id)?;

        let mut deltas: Vec<TableDelta> = Vec::new();
        for fqn in warehouse_fqns.difference(&monitored_fqns) {
            deltas.push(TableDelta::from_fqn(DeltaAction::New, fqn));
        }
        for fqn in monitored_fqns.difference(&warehouse_fqns) {
            deltas.push(TableDelta::from_fqn(DeltaAction::Dropped, fqn));
        }
        Ok(deltas)
    }

    // ------------------------------------------------------------------
    // Agent path
    // ------------------------------------------------------------------

    async fn agent_discover(
        &self,
        client: &dyn LlmChatClient,
        connector: &dyn WarehouseConnector,
        connection: &Connection,
    ) -> Result<DiscoveryReport> {
        let toolbox = Toolbox {
            connector,
            lineage: &self.lineage,
        };
        let mut messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Survey the warehouse behind connection `{}` (dialect: {}).",
                connection.name, connection.dialect
            )),
        ];
        let mut calls_used = 0;

        loop {
            let response = client
                .chat(ChatRequest {
                    messages: messages.clone(),
                    tools: toolbox.definitions(),
                    json_response: false,
                })
                .await?;

            if !response.tool_calls.is_empty() {
                if calls_used + response.tool_calls.len() > MAX_TOOL_CALLS {
                    return Err(AegisError::LlmUnavailable(format!(
                        "discovery exceeded the {MAX_TOOL_CALLS}-tool-call budget"
                    )));
                }
                let raw = response.raw_tool_calls.clone().unwrap_or_default();
                messages.push(ChatMessage::assistant_tool_calls(raw));
                for call in &response.tool_calls {
                    calls_used += 1;
                    let output = toolbox.execute(call).await;
                    messages.push(ChatMessage::tool(call.id.clone(), output));
                }
                continue;
            }

            let content = response
                .content
                .ok_or_else(|| AegisError::Parse("empty discovery reply".to_string()))?;
            let report = parse_agent_report(&content, connection)?;
            info!(
                tables = report.total_tables,
                tool_calls = calls_used,
                "agent discovery complete"
            );
            return Ok(report);
        }
    }

    // ------------------------------------------------------------------
    // Deterministic fallback
    // ------------------------------------------------------------------

    async fn fallback_discover(
        &self,
        connector: &dyn WarehouseConnector,
        connection: &Connection,
    ) -> Result<DiscoveryReport> {
        let mut proposals: Vec<TableProposal> = Vec::new();
        let mut schemas_found: Vec<String> = Vec::new();

        for schema in connector.list_schemas().await? {
            schemas_found.push(schema.clone());
            for entry in connector.list_tables(&schema).await? {
                let columns = match connector.fetch_columns(&schema, &entry.name).await {
                    Ok(columns) => columns,
                    Err(e) => {
                        warn!(table = %entry.name, error = %e, "column fetch failed during discovery");
                        Vec::new()
                    }
                };
                proposals.push(classify_table(&schema, &entry.name, columns));
            }
        }

        Ok(DiscoveryReport {
            connection_id: connection.id,
            connection_name: connection.name.clone(),
            schemas_found,
            total_tables: proposals.len(),
            proposals,
            concerns: Vec::new(),
            generated_at: Utc::now(),
        })
    }
}

/// Classify one table by naming convention and column shape.
pub fn classify_table(schema: &str, table_name: &str, columns: Vec<ColumnDef>) -> TableProposal {
    let name = table_name.to_ascii_lowercase();
    let schema_lower = schema.to_ascii_lowercase();
    let has_timestamp = columns.iter().any(|c| {
        Dialect::audit_columns().contains(&c.name.to_ascii_lowercase().as_str())
    });

    let (role, checks, sla, reasoning, skip): (
        TableRole,
        Vec<CheckType>,
        Option<i64>,
        String,
        bool,
    ) = if ["_tmp", "_temp", "_test", "_backup"]
        .iter()
        .any(|p| name.starts_with(p))
    {
        (
            TableRole::System,
            Vec::new(),
            None,
            "Temporary or backup table".to_string(),
            true,
        )
    } else if name.starts_with("stg_") || matches!(schema_lower.as_str(), "staging" | "stg") {
        (
            TableRole::Staging,
            vec![CheckType::Schema],
            Some(60),
            format!("Staging table in {schema}"),
            false,
        )
    } else if name.starts_with("raw_") || matches!(schema_lower.as_str(), "raw" | "landing") {
        (
            TableRole::Raw,
            vec![CheckType::Schema],
            Some(1440),
            format!("Raw ingestion table in {schema}"),
            false,
        )
    } else if name.starts_with("dim_") {
        dimensional(TableRole::Dimension, "Dimension table (dim_ prefix)", has_timestamp)
    } else if name.starts_with("fct_") || name.starts_with("fact_") {
        dimensional(TableRole::Fact, "Fact table (fct_/fact_ prefix)", has_timestamp)
    } else if name.ends_with("_snapshot") || name.contains("_hist") {
        (
            TableRole::Snapshot,
            vec![CheckType::Schema],
            None,
            "Snapshot or history table".to_string(),
            false,
        )
    } else if has_timestamp {
        (
            TableRole::Unknown,
            vec![CheckType::Schema, CheckType::Freshness],
            None,
            "Has update timestamp columns; role unknown".to_string(),
            false,
        )
    } else {
        (
            TableRole::Unknown,
            vec![CheckType::Schema],
            None,
            "No timestamp columns detected; role unknown".to_string(),
            false,
        )
    };

    TableProposal {
        schema_name: schema.to_string(),
        table_name: table_name.to_string(),
        fully_qualified_name: format!("{schema}.{table_name}"),
        role,
        columns,
        recommended_checks: checks,
        suggested_sla_minutes: sla,
        reasoning,
        skip,
    }
}

fn dimensional(
    role: TableRole,
    reasoning: &str,
    has_timestamp: bool,
) -> (TableRole, Vec<CheckType>, Option<i64>, String, bool) {
    if has_timestamp {
        (
            role,
            vec![CheckType::Schema, CheckType::Freshness],
            Some(360),
            reasoning.to_string(),
            false,
        )
    } else {
        (role, vec![CheckType::Schema], None, reasoning.to_string(), false)
    }
}

// ----------------------------------------------------------------------
// Toolbox — five tools bound to one discovery invocation
// ----------------------------------------------------------------------

struct Toolbox<'a> {
    connector: &'a dyn WarehouseConnector,
    lineage: &'a LineageService,
}

impl Toolbox<'_> {
    fn definitions(&self) -> Vec<ToolDef> {
        let schema_arg = json!({
            "type": "object",
            "properties": {"schema": {"type": "string"}},
            "required": ["schema"],
        });
        let table_args = json!({
            "type": "object",
            "properties": {
                "schema": {"type": "string"},
                "table": {"type": "string"},
            },
            "required": ["schema", "table"],
        });

        vec![
            ToolDef {
                name: "list_warehouse_schemas".to_string(),
                description: "List all non-system schemas in the warehouse.".to_string(),
                parameters: json!({"type": "object", "properties": {}}),
            },
            ToolDef {
                name: "list_schema_tables".to_string(),
                description: "List the tables and views in one schema.".to_string(),
                parameters: schema_arg,
            },
            ToolDef {
                name: "inspect_table_columns".to_string(),
                description: "Fetch the ordered column list of one table.".to_string(),
                parameters: table_args.clone(),
            },
            ToolDef {
                name: "check_table_freshness".to_string(),
                description: "Fetch the last observed update time of one table.".to_string(),
                parameters: table_args,
            },
            ToolDef {
                name: "get_known_lineage".to_string(),
                description: "Known upstream and downstream tables for a fully qualified name."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {"fqn": {"type": "string"}},
                    "required": ["fqn"],
                }),
            },
        ]
    }

    async fn execute(&self, call: &ToolCall) -> String {
        match self.dispatch(call).await {
            Ok(value) => value.to_string(),
            Err(e) => json!({"error": e.to_string()}).to_string(),
        }
    }

    async fn dispatch(&self, call: &ToolCall) -> Result<serde_json::Value> {
        let arg = |key: &str| -> Result<String> {
            call.arguments
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| AegisError::Parse(format!("tool call missing `{key}`")))
        };

        match call.name.as_str() {
            "list_warehouse_schemas" => {
                let schemas = self.connector.list_schemas().await?;
                Ok(json!({"schemas": schemas}))
            }
            "list_schema_tables" => {
                let tables = self.connector.list_tables(&arg("schema")?).await?;
                Ok(json!({
                    "tables": tables
                        .iter()
                        .map(|t| json!({"name": t.name, "kind": t.kind}))
                        .collect::<Vec<_>>()
                }))
            }
            "inspect_table_columns" => {
                let columns = self
                    .connector
                    .fetch_columns(&arg("schema")?, &arg("table")?)
                    .await?;
                Ok(serde_json::to_value(&columns)
                    .map_err(|e| AegisError::Parse(e.to_string()))?)
            }
            "check_table_freshness" => {
                let last_update = self
                    .connector
                    .fetch_last_update_time(&arg("schema")?, &arg("table")?)
                    .await?;
                Ok(json!({"last_update": last_update}))
            }
            "get_known_lineage" => {
                let fqn = arg("fqn")?;
                let upstream = self.lineage.upstream(&fqn, DEFAULT_DEPTH, 0.0)?;
                let downstream = self.lineage.downstream(&fqn, DEFAULT_DEPTH, 0.0)?;
                Ok(json!({
                    "upstream": upstream.iter().map(|n| &n.table).collect::<Vec<_>>(),
                    "downstream": downstream.iter().map(|n| &n.table).collect::<Vec<_>>(),
                }))
            }
            other => Err(AegisError::Parse(format!("unknown tool `{other}`"))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AgentReport {
    proposals: Vec<TableProposal>,
    #[serde(default)]
    concerns: Vec<String>,
}

fn parse_agent_report(content: &str, connection: &Connection) -> Result<DiscoveryReport> {
    // The reply may wrap the JSON object in prose; take the outermost braces.
    let start = content.find('{');
    let end = content.rfind('}');
    let json_slice = match (start, end) {
        (Some(s), Some(e)) if e > s => &content[s..=e],
        _ => return Err(AegisError::Parse("no JSON object in discovery reply".to_string())),
    };

    let report: AgentReport = serde_json::from_str(json_slice)
        .map_err(|e| AegisError::Parse(format!("discovery reply did not match schema: {e}")))?;

    let schemas_found: BTreeSet<String> = report
        .proposals
        .iter()
        .map(|p| p.schema_name.clone())
        .collect();

    Ok(DiscoveryReport {
        connection_id: connection.id,
        connection_name: connection.name.clone(),
        schemas_found: schemas_found.into_iter().collect(),
        total_tables: report.proposals.len(),
        proposals: report.proposals,
        concerns: report.concerns,
        generated_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::Warehouse;
    use aegis_core::CheckType;

    fn col(name: &str, ordinal: u32) -> ColumnDef {
        ColumnDef {
            name: name.to_string(),
            data_type: "TIMESTAMP".to_string(),
            nullable: true,
            ordinal,
        }
    }

    #[test]
    fn classification_follows_naming_conventions() {
        let tmp = classify_table("public", "_tmp_load", Vec::new());
        assert_eq!(tmp.role, TableRole::System);
        assert!(tmp.skip);
        assert!(tmp.recommended_checks.is_empty());

        let stg = classify_table("public", "stg_orders", Vec::new());
        assert_eq!(stg.role, TableRole::Staging);
        assert_eq!(stg.suggested_sla_minutes, Some(60));

        let raw = classify_table("landing", "events", Vec::new());
        assert_eq!(raw.role, TableRole::Raw);
        assert_eq!(raw.suggested_sla_minutes, Some(1440));

        let snap = classify_table("public", "orders_history", Vec::new());
        assert_eq!(snap.role, TableRole::Snapshot);
        assert_eq!(snap.suggested_sla_minutes, None);
    }

    #[test]
    fn dimensional_tables_get_freshness_only_with_timestamps() {
        let with_ts = classify_table("mart", "fct_sales", vec![col("updated_at", 1)]);
        assert_eq!(with_ts.role, TableRole::Fact);
        assert!(with_ts.recommended_checks.contains(&CheckType::Freshness));
        assert_eq!(with_ts.suggested_sla_minutes, Some(360));

        let without = classify_table("mart", "dim_customer", vec![col("name", 1)]);
        assert_eq!(without.role, TableRole::Dimension);
        assert_eq!(without.recommended_checks, vec![CheckType::Schema]);
        assert_eq!(without.suggested_sla_minutes, None);
    }

    #[tokio::test]
    async fn rediscover_emits_sorted_new_and_dropped_deltas() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let connection = store
            .insert_connection("wh", Dialect::Postgres, "sealed", true)
            .unwrap();
        store
            .insert_table(connection.id, "public", "a", &[CheckType::Schema], None)
            .unwrap();
        store
            .insert_table(connection.id, "public", "gone", &[CheckType::Schema], None)
            .unwrap();

        let warehouse = Warehouse::new()
            .with_table("public", "a", Vec::new())
            .with_table("public", "b", Vec::new());

        let lineage = Arc::new(LineageService::new(store.clone()));
        let investigator = Investigator::new(store, lineage, None);
        let deltas = investigator
            .rediscover(&warehouse, connection.id)
            .await
            .unwrap();

        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].action, DeltaAction::New);
        assert_eq!(deltas[0].fully_qualified_name, "public.b");
        assert!(deltas[0].proposal.is_none());
        assert_eq!(deltas[1].action, DeltaAction::Dropped);
        assert_eq!(deltas[1].fully_qualified_name, "public.gone");
    }

    #[tokio::test]
    async fn rediscover_is_quiet_when_in_sync() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let connection = store
            .insert_connection("wh", Dialect::Postgres, "sealed", true)
            .unwrap();
        store
            .insert_table(connection.id, "public", "a", &[CheckType::Schema], None)
            .unwrap();

        let warehouse = Warehouse::new().with_table("public", "a", Vec::new());
        let lineage = Arc::new(LineageService::new(store.clone()));
        let investigator = Investigator::new(store, lineage, None);

        let deltas = investigator
            .rediscover(&warehouse, connection.id)
            .await
            .unwrap();
        assert!(deltas.is_empty());
    }

    #[tokio::test]
    async fn fallback_discovery_walks_every_schema() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let connection = store
            .insert_connection("wh", Dialect::Postgres, "sealed", true)
            .unwrap();
        let warehouse = Warehouse::new()
            .with_table("staging", "stg_orders", vec![col("updated_at", 1)])
            .with_table("mart", "fct_sales", vec![col("updated_at", 1)]);

        let lineage = Arc::new(LineageService::new(store.clone()));
        let investigator = Investigator::new(store, lineage, None);
        let report = investigator.discover(&warehouse, &connection).await.unwrap();

        assert_eq!(report.total_tables, 2);
        assert_eq!(report.schemas_found.len(), 2);
        assert!(report
            .proposals
            .iter()
            .any(|p| p.role == TableRole::Staging));
        assert!(report.proposals.iter().any(|p| p.role == TableRole::Fact));
    }
}
