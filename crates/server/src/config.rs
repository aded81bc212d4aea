//! Environment-driven configuration.

use aegis_core::{AegisError, Result};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Shared secret for API auth. Unset means auth is disabled (local dev).
    pub api_key: Option<String>,
    pub db_path: PathBuf,
    pub bind_addr: String,
    pub scan_interval: Duration,
    pub lineage_refresh_interval: Duration,
    pub rediscovery_interval: Duration,
    /// Base64, 32 bytes once decoded.
    pub encryption_key: String,
    pub log_level: String,
    pub openai_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Config> {
        Ok(Config {
            api_key: optional("AEGIS_API_KEY"),
            db_path: PathBuf::from(
                optional("AEGIS_DB_PATH").unwrap_or_else(|| "aegis.db".to_string()),
            ),
            bind_addr: optional("AEGIS_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            scan_interval: seconds("AEGIS_SCAN_INTERVAL_SECONDS", 300)?,
            lineage_refresh_interval: seconds("AEGIS_LINEAGE_REFRESH_SECONDS", 3600)?,
            rediscovery_interval: seconds("AEGIS_REDISCOVERY_INTERVAL_SECONDS", 86400)?,
            encryption_key: optional("AEGIS_ENCRYPTION_KEY").ok_or_else(|| {
                AegisError::Config("AEGIS_ENCRYPTION_KEY is required".to_string())
            })?,
            log_level: optional("AEGIS_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            openai_api_key: optional("OPENAI_API_KEY"),
        })
    }
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn seconds(name: &str, default: u64) -> Result<Duration> {
    match optional(name) {
        None => Ok(Duration::from_secs(default)),
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| AegisError::Config(format!("{name} must be an integer, got {raw:?}"))),
    }
}
