//! In-memory doubles for tests: a scriptable warehouse connector and a
//! scriptable chat model.

use crate::connector::{QueryLogEntry, TableEntry, TableKind, WarehouseConnector};
use crate::llm::{ChatRequest, ChatResponse, LlmChatClient};
use aegis_core::{AegisError, ColumnDef, Dialect, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

/// Fake warehouse with a builder API. Cloneable state lives behind plain
/// collections; mutation happens only at build time.
#[derive(Default)]
pub struct Warehouse {
    tables: BTreeMap<String, BTreeMap<String, Vec<ColumnDef>>>,
    last_updates: HashMap<(String, String), DateTime<Utc>>,
    query_log: Vec<QueryLogEntry>,
    unreachable: bool,
    disposed: AtomicBool,
}

impl Warehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, schema: &str, table: &str, columns: Vec<ColumnDef>) -> Self {
        self.tables
            .entry(schema.to_string())
            .or_default()
            .insert(table.to_string(), columns);
        self
    }

    pub fn with_last_update(mut self, schema: &str, table: &str, ts: DateTime<Utc>) -> Self {
        self.last_updates
            .insert((schema.to_string(), table.to_string()), ts);
        self
    }

    pub fn with_query(mut self, sql: &str, executed_at: DateTime<Utc>) -> Self {
        self.query_log.push(QueryLogEntry {
            sql: sql.to_string(),
            user: Some("etl".to_string()),
            executed_at,
            duration_ms: Some(40),
        });
        self
    }

    /// Every call fails with a connectivity error.
    pub fn unreachable() -> Self {
        Warehouse {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn was_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable {
            Err(AegisError::Connectivity("warehouse unreachable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl WarehouseConnector for Warehouse {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn list_schemas(&self) -> Result<BTreeSet<String>> {
        self.check_reachable()?;
        Ok(self.tables.keys().cloned().collect())
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<TableEntry>> {
        self.check_reachable()?;
        Ok(self
            .tables
            .get(schema)
            .map(|tables| {
                tables
                    .keys()
                    .map(|name| TableEntry {
                        name: name.clone(),
                        kind: TableKind::Table,
                        schema: schema.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnDef>> {
        self.check_reachable()?;
        self.tables
            .get(schema)
            .and_then(|tables| tables.get(table))
            .cloned()
            .ok_or_else(|| AegisError::Permission(format!("{schema}.{table} not readable")))
    }

    async fn fetch_last_update_time(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        self.check_reachable()?;
        Ok(self
            .last_updates
            .get(&(schema.to_string(), table.to_string()))
            .copied())
    }

    async fn extract_query_log(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueryLogEntry>> {
        self.check_reachable()?;
        Ok(self
            .query_log
            .iter()
            .filter(|e| e.executed_at >= since)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn probe(&self) -> Result<()> {
        self.check_reachable()
    }

    async fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

/// Chat model double that pops scripted replies in order.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
    calls: AtomicU32,
    always_fail: bool,
}

impl ScriptedLlm {
    pub fn with_replies(replies: Vec<String>) -> Self {
        ScriptedLlm {
            replies: Mutex::new(replies.into()),
            calls: AtomicU32::new(0),
            always_fail: false,
        }
    }

    pub fn always_failing() -> Self {
        ScriptedLlm {
            replies: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
            always_fail: true,
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmChatClient for ScriptedLlm {
    async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.always_fail {
            return Err(AegisError::LlmUnavailable("scripted outage".to_string()));
        }
        let reply = self
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| AegisError::LlmUnavailable("script exhausted".to_string()))?;
        Ok(ChatResponse {
            content: Some(reply),
            tool_calls: Vec::new(),
            raw_tool_calls: None,
        })
    }
}
