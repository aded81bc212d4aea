//! Aegis Engine Library
//!
//! Everything between the warehouse and the API surface: the entity store,
//! the warehouse connector contract, the lineage engine, the schema and
//! freshness sentinels, the orchestrator state machine, the architect and
//! executor, the investigator, the event notifier, and the scanner loop.

pub mod architect;
pub mod connector;
pub mod crypto;
pub mod executor;
pub mod investigator;
pub mod lineage;
pub mod llm;
pub mod notifier;
pub mod orchestrator;
pub mod reporter;
pub mod scanner;
pub mod sentinel;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod testkit;

pub use architect::Architect;
pub use connector::{
    ConnectorFactory, QueryLogEntry, TableEntry, TableKind, WarehouseConnector,
};
pub use crypto::UriCipher;
pub use executor::Executor;
pub use investigator::Investigator;
pub use lineage::LineageService;
pub use llm::{
    ChatMessage, ChatRequest, ChatResponse, LlmChatClient, OpenAiClient, ToolCall, ToolDef,
};
pub use notifier::Notifier;
pub use orchestrator::Orchestrator;
pub use reporter::build_report;
pub use scanner::{CycleSummary, Scanner, ScannerConfig};
pub use sentinel::{FreshnessSentinel, SchemaSentinel};
pub use store::{DashboardStats, IncidentFilter, Store};
