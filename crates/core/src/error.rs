//! Error taxonomy for the service.
//!
//! Three families: recoverable-external failures (warehouse, LLM), domain
//! validation failures surfaced to API callers, and integrity/storage
//! failures. Each variant maps to a stable wire code.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AegisError>;

#[derive(Debug, Error)]
pub enum AegisError {
    // Recoverable-external: log, skip the unit of work, retry next cycle.
    #[error("warehouse unreachable: {0}")]
    Connectivity(String),

    #[error("catalog not readable: {0}")]
    Permission(String),

    #[error("operation not available on this dialect: {0}")]
    Unsupported(String),

    #[error("rate limited")]
    RateLimited {
        /// Server-provided wait hint, seconds.
        retry_after: Option<u64>,
    },

    #[error("deadline exceeded: {0}")]
    Timeout(String),

    #[error("llm unavailable: {0}")]
    LlmUnavailable(String),

    #[error("parse failure: {0}")]
    Parse(String),

    // Domain-validation: reported to the caller, never retried internally.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("dismissal requires a non-empty reason")]
    MissingReason,

    #[error("table is already enrolled: {0}")]
    DuplicateEnrollment(String),

    #[error("not found: {0}")]
    NotFound(String),

    // Integrity / infrastructure.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl AegisError {
    /// True for failures the scan loop skips and retries next cycle.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AegisError::Connectivity(_)
                | AegisError::Permission(_)
                | AegisError::Unsupported(_)
                | AegisError::RateLimited { .. }
                | AegisError::Timeout(_)
                | AegisError::LlmUnavailable(_)
                | AegisError::Parse(_)
        )
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            AegisError::Connectivity(_) => ErrorCode::Connectivity,
            AegisError::Permission(_) => ErrorCode::Permission,
            AegisError::Unsupported(_) => ErrorCode::Unsupported,
            AegisError::RateLimited { .. } => ErrorCode::RateLimited,
            AegisError::Timeout(_) => ErrorCode::Timeout,
            AegisError::LlmUnavailable(_) => ErrorCode::LlmUnavailable,
            AegisError::Parse(_) => ErrorCode::Parse,
            AegisError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            AegisError::MissingReason => ErrorCode::MissingReason,
            AegisError::DuplicateEnrollment(_) => ErrorCode::DuplicateEnrollment,
            AegisError::NotFound(_) => ErrorCode::NotFound,
            AegisError::Storage(_) => ErrorCode::Storage,
            AegisError::Crypto(_) => ErrorCode::Crypto,
            AegisError::Config(_) => ErrorCode::Config,
        }
    }
}

/// Stable wire codes for the API error envelope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Connectivity,
    Permission,
    Unsupported,
    RateLimited,
    Timeout,
    LlmUnavailable,
    Parse,
    InvalidTransition,
    MissingReason,
    DuplicateEnrollment,
    NotFound,
    Storage,
    Crypto,
    Config,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Connectivity => "connectivity_error",
            ErrorCode::Permission => "permission_error",
            ErrorCode::Unsupported => "unsupported_error",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::Timeout => "timeout",
            ErrorCode::LlmUnavailable => "llm_unavailable",
            ErrorCode::Parse => "parse_error",
            ErrorCode::InvalidTransition => "invalid_transition",
            ErrorCode::MissingReason => "missing_reason",
            ErrorCode::DuplicateEnrollment => "duplicate_enrollment",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Storage => "storage_error",
            ErrorCode::Crypto => "crypto_error",
            ErrorCode::Config => "config_error",
        }
    }
}
