//! Architect — root-cause diagnosis.
//!
//! Primary path asks the configured chat model for a structured diagnosis
//! built from the anomaly, the surrounding lineage, recent anomaly history,
//! and table metadata. The fallback is deterministic, has no external
//! dependencies, and always succeeds: downstream lineage as blast radius,
//! anomaly severity carried over, zero confidence.

use crate::lineage::{LineageService, DEFAULT_DEPTH, MAX_DEPTH};
use crate::llm::{with_retries, ChatMessage, ChatRequest, LlmChatClient};
use crate::store::Store;
use aegis_core::{
    AegisError, Anomaly, AnomalyDetail, Diagnosis, MonitoredTable, Recommendation,
    RecommendationAction, Result, SchemaChange,
};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Edges weaker than this are noise for diagnosis purposes.
const MIN_CONFIDENCE: f64 = 0.5;

/// History window fed to the model.
const DEFAULT_HISTORY_DAYS: i64 = 30;

const HISTORY_LIMIT: usize = 10;

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);

const SYSTEM_PROMPT: &str = "\
You are a data reliability analyst. You are given a data anomaly together \
with the affected table's lineage and recent history, and you perform \
root-cause analysis.

Respond with a single JSON object matching this schema:
{
  \"root_cause\": string,
  \"root_cause_table\": string (fully qualified),
  \"blast_radius\": [string],
  \"severity\": \"critical\" | \"high\" | \"medium\" | \"low\",
  \"confidence\": number between 0 and 1,
  \"recommendations\": [
    {\"action\": \"revert_schema\" | \"add_cast\" | \"notify_team\" | \"pause_pipeline\" | \"investigate\",
     \"description\": string, \"sql\": string or null, \"priority\": integer starting at 1}
  ]
}

Consider: what upstream change could have caused this? How far does the \
impact reach downstream? What is the simplest fix?";

pub struct Architect {
    store: Arc<Store>,
    lineage: Arc<LineageService>,
    client: Option<Arc<dyn LlmChatClient>>,
    history_days: i64,
}

impl Architect {
    pub fn new(
        store: Arc<Store>,
        lineage: Arc<LineageService>,
        client: Option<Arc<dyn LlmChatClient>>,
    ) -> Self {
        Architect {
            store,
            lineage,
            client,
            history_days: DEFAULT_HISTORY_DAYS,
        }
    }

    /// Diagnose an anomaly. Falls back to the rule-based path whenever the
    /// model is unconfigured, unreachable after retries, or keeps returning
    /// output that does not parse.
    pub async fn diagnose(&self, anomaly: &Anomaly) -> Result<Diagnosis> {
        let table = self
            .store
            .get_table(anomaly.table_id)?
            .ok_or_else(|| AegisError::NotFound(format!("table {}", anomaly.table_id)))?;
        let fqn = table.fully_qualified_name();

        if let Some(client) = &self.client {
            match self.llm_diagnose(client.as_ref(), anomaly, &table).await {
                Ok(diagnosis) => return Ok(diagnosis),
                Err(e) => {
                    warn!(table = %fqn, error = %e, "llm diagnosis failed, using rule-based fallback");
                }
            }
        }

        Ok(self.fallback(anomaly, &fqn))
    }

    async fn llm_diagnose(
        &self,
        client: &dyn LlmChatClient,
        anomaly: &Anomaly,
        table: &MonitoredTable,
    ) -> Result<Diagnosis> {
        let prompt = self.build_prompt(anomaly, table)?;
        let request = ChatRequest {
            messages: vec![
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(prompt.clone()),
            ],
            tools: Vec::new(),
            json_response: true,
        };

        let response = with_retries(RETRY_ATTEMPTS, RETRY_BASE_DELAY, || {
            client.chat(request.clone())
        })
        .await?;
        let content = response
            .content
            .ok_or_else(|| AegisError::Parse("empty diagnosis reply".to_string()))?;

        match parse_diagnosis(&content) {
            Ok(diagnosis) => Ok(diagnosis),
            Err(parse_err) => {
                // One strict re-prompt on malformed structured output.
                info!(error = %parse_err, "malformed diagnosis, re-prompting once");
                let strict = ChatRequest {
                    messages: vec![
                        ChatMessage::system(SYSTEM_PROMPT),
                        ChatMessage::user(prompt),
                        ChatMessage::assistant(content),
                        ChatMessage::user(
                            "That reply did not match the required schema. Respond again \
                             with only the JSON object, no prose.",
                        ),
                    ],
                    tools: Vec::new(),
                    json_response: true,
                };
                let retry = client.chat(strict).await?;
                let content = retry
                    .content
                    .ok_or_else(|| AegisError::Parse("empty diagnosis reply".to_string()))?;
                parse_diagnosis(&content)
            }
        }
    }

    fn build_prompt(&self, anomaly: &Anomaly, table: &MonitoredTable) -> Result<String> {
        let fqn = table.fully_qualified_name();
        let mut sections: Vec<String> = Vec::new();

        sections.push(format!(
            "## Anomaly\nType: {}\nTable: {}\nSeverity: {}\nDetected: {}",
            anomaly.anomaly_type,
            fqn,
            anomaly.severity,
            anomaly.detected_at.to_rfc3339(),
        ));
        sections.push(describe_detail(&anomaly.detail));

        let upstream = self.lineage.upstream(&fqn, DEFAULT_DEPTH, MIN_CONFIDENCE)?;
        let downstream = self.lineage.downstream(&fqn, DEFAULT_DEPTH, MIN_CONFIDENCE)?;
        if !upstream.is_empty() || !downstream.is_empty() {
            let mut lines = vec!["## Lineage".to_string()];
            if !upstream.is_empty() {
                lines.push(format!(
                    "Upstream: {}",
                    upstream
                        .iter()
                        .map(|n| n.table.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ));
            }
            if !downstream.is_empty() {
                lines.push(format!(
                    "Downstream: {}",
                    downstream
                        .iter()
                        .map(|n| n.table.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ));
            }
            sections.push(lines.join("\n"));
        }

        // History covers the table and its one-hop neighborhood.
        let mut neighborhood = vec![table.id];
        for node in self
            .lineage
            .upstream(&fqn, 1, MIN_CONFIDENCE)?
            .iter()
            .chain(self.lineage.downstream(&fqn, 1, MIN_CONFIDENCE)?.iter())
        {
            if let Some(neighbor) = self.store.table_by_fqn(&node.table)? {
                neighborhood.push(neighbor.id);
            }
        }
        let since = Utc::now() - ChronoDuration::days(self.history_days);
        let history =
            self.store
                .recent_anomalies(&neighborhood, since, Some(anomaly.id), HISTORY_LIMIT)?;
        if !history.is_empty() {
            let lines: Vec<String> = history
                .iter()
                .map(|a| {
                    format!(
                        "- {} ({}) at {}",
                        a.anomaly_type,
                        a.severity,
                        a.detected_at.to_rfc3339()
                    )
                })
                .collect();
            sections.push(format!("## Recent History\n{}", lines.join("\n")));
        }

        if let Some(snapshot) = self.store.latest_snapshot(table.id)? {
            let columns: Vec<String> = snapshot
                .columns
                .iter()
                .map(|c| format!("{} {}", c.name, c.data_type))
                .collect();
            sections.push(format!(
                "## Table Metadata\nColumns: {}\nFreshness SLA: {}",
                columns.join(", "),
                table
                    .freshness_sla_minutes
                    .map(|m| format!("{m} minutes"))
                    .unwrap_or_else(|| "none".to_string()),
            ));
        }

        Ok(sections.join("\n\n"))
    }

    fn fallback(&self, anomaly: &Anomaly, fqn: &str) -> Diagnosis {
        let blast_radius = self
            .lineage
            .downstream(fqn, MAX_DEPTH, 0.0)
            .map(|nodes| nodes.into_iter().map(|n| n.table).collect())
            .unwrap_or_default();

        Diagnosis {
            root_cause: "Automated analysis unavailable. Manual investigation required."
                .to_string(),
            root_cause_table: fqn.to_string(),
            blast_radius,
            severity: anomaly.severity,
            confidence: 0.0,
            recommendations: vec![Recommendation {
                action: RecommendationAction::Investigate,
                description: "Manual investigation required.".to_string(),
                sql: None,
                priority: 1,
            }],
        }
    }
}

fn describe_detail(detail: &AnomalyDetail) -> String {
    match detail {
        AnomalyDetail::SchemaDrift { changes } => {
            let lines: Vec<String> = changes.iter().map(describe_change).collect();
            format!("Changes:\n{}", lines.join("\n"))
        }
        AnomalyDetail::Freshness(f) => format!(
            "Detail: last update {}, SLA {} minutes, {} minutes overdue",
            f.last_update.to_rfc3339(),
            f.sla_minutes,
            f.minutes_overdue
        ),
    }
}

fn describe_change(change: &SchemaChange) -> String {
    match change {
        SchemaChange::ColumnAdded {
            column, data_type, ..
        } => format!("- column_added: `{column}` {data_type}"),
        SchemaChange::ColumnDeleted { column, .. } => {
            format!("- column_deleted: `{column}`")
        }
        SchemaChange::ColumnTypeChanged { column, from, to } => {
            format!("- column_type_changed: `{column}` {from} -> {to}")
        }
        SchemaChange::ColumnRenamed { from, to, .. } => {
            format!("- column_renamed: `{from}` -> `{to}`")
        }
    }
}

fn parse_diagnosis(content: &str) -> Result<Diagnosis> {
    let mut diagnosis: Diagnosis = serde_json::from_str(content.trim())
        .map_err(|e| AegisError::Parse(format!("diagnosis did not match schema: {e}")))?;
    diagnosis.confidence = diagnosis.confidence.clamp(0.0, 1.0);
    diagnosis
        .recommendations
        .sort_by_key(|r| r.priority.max(1));
    Ok(diagnosis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::ScriptedLlm;
    use aegis_core::{CheckType, Dialect, FreshnessDetail, Severity};

    fn seeded(store: &Arc<Store>) -> Anomaly {
        let conn = store
            .insert_connection("wh", Dialect::Postgres, "sealed", true)
            .unwrap();
        let table = store
            .insert_table(
                conn.id,
                "analytics",
                "orders",
                &[CheckType::Freshness],
                Some(60),
            )
            .unwrap();
        store
            .insert_anomaly(
                table.id,
                Severity::Medium,
                &AnomalyDetail::Freshness(FreshnessDetail {
                    last_update: Utc::now(),
                    sla_minutes: 60,
                    minutes_overdue: 30,
                }),
                Utc::now(),
            )
            .unwrap()
    }

    fn chain(store: &Arc<Store>) {
        for (s, t) in [("analytics.orders", "mart.revenue"), ("mart.revenue", "dash.kpi")] {
            store
                .upsert_lineage_edge(
                    s,
                    t,
                    aegis_core::EdgeRelationship::Direct,
                    1.0,
                    "h",
                    Utc::now(),
                )
                .unwrap();
        }
    }

    #[tokio::test]
    async fn fallback_uses_downstream_as_blast_radius() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let anomaly = seeded(&store);
        chain(&store);
        let lineage = Arc::new(LineageService::new(store.clone()));

        let architect = Architect::new(store, lineage, None);
        let diagnosis = architect.diagnose(&anomaly).await.unwrap();

        assert_eq!(diagnosis.confidence, 0.0);
        assert_eq!(diagnosis.severity, Severity::Medium);
        assert_eq!(
            diagnosis.blast_radius,
            vec!["mart.revenue".to_string(), "dash.kpi".to_string()]
        );
        assert_eq!(diagnosis.recommendations.len(), 1);
        assert_eq!(
            diagnosis.recommendations[0].action,
            RecommendationAction::Investigate
        );
    }

    #[tokio::test]
    async fn malformed_reply_gets_one_strict_retry() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let anomaly = seeded(&store);
        let lineage = Arc::new(LineageService::new(store.clone()));

        let good = serde_json::json!({
            "root_cause": "Upstream loader paused",
            "root_cause_table": "analytics.orders",
            "blast_radius": [],
            "severity": "medium",
            "confidence": 0.7,
            "recommendations": [
                {"action": "investigate", "description": "Check the loader", "sql": null, "priority": 1}
            ]
        });
        let llm = Arc::new(ScriptedLlm::with_replies(vec![
            "this is not json".to_string(),
            good.to_string(),
        ]));

        let architect = Architect::new(store, lineage, Some(llm.clone()));
        let diagnosis = architect.diagnose(&anomaly).await.unwrap();

        assert_eq!(diagnosis.confidence, 0.7);
        assert_eq!(diagnosis.root_cause, "Upstream loader paused");
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_llm_failure_engages_fallback() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let anomaly = seeded(&store);
        let lineage = Arc::new(LineageService::new(store.clone()));
        let llm = Arc::new(ScriptedLlm::always_failing());

        let architect = Architect::new(store, lineage, Some(llm));
        let diagnosis = architect.diagnose(&anomaly).await.unwrap();
        assert_eq!(diagnosis.confidence, 0.0);
    }
}
