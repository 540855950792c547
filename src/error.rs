//! Error types for rca-core.

use thiserror::Error;

use crate::datasource::AdapterErrorCode;
use crate::safety::TrippedLimit;

/// Result type alias using rca-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during an investigation.
///
/// Variants split into terminal faults (schema discovery, circuit breaker,
/// synthesis-stage LLM failures) and recoverable ones (query failures feed
/// the reflexion loop, validator failures are logged and dropped). The
/// orchestrator pattern-matches on variants to decide which is which.
#[derive(Error, Debug)]
pub enum Error {
    /// Schema discovery failed or returned zero tables. Terminal: an
    /// investigation cannot proceed without schema.
    #[error("Schema discovery failed: {0}")]
    SchemaDiscovery(String),

    /// A circuit breaker safety limit was exceeded. Terminal: the run is
    /// stopped and a partial finding returned.
    #[error("Circuit breaker tripped: {0}")]
    CircuitBreaker(TrippedLimit),

    /// LLM call failed. `retryable` indicates whether the failure is likely
    /// transient (rate limit, server error) and worth retrying.
    #[error("LLM error: {message}")]
    Llm { message: String, retryable: bool },

    /// A warehouse query failed with a typed adapter error code.
    #[error("Query failed ({code}): {message}")]
    Query {
        code: AdapterErrorCode,
        message: String,
    },

    /// A generated query was rejected by the SQL preflight guard.
    #[error("Query rejected: {0}")]
    QueryRejected(String),

    /// Feedback log or training signal storage error.
    #[error("Feedback storage error: {0}")]
    Feedback(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a schema discovery error.
    pub fn schema_discovery(message: impl Into<String>) -> Self {
        Self::SchemaDiscovery(message.into())
    }

    /// Create an LLM error.
    pub fn llm(message: impl Into<String>, retryable: bool) -> Self {
        Self::Llm {
            message: message.into(),
            retryable,
        }
    }

    /// Create a query failure with an adapter error code.
    pub fn query(code: AdapterErrorCode, message: impl Into<String>) -> Self {
        Self::Query {
            code,
            message: message.into(),
        }
    }

    /// Whether this error may succeed on retry within the same step.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Llm { retryable: true, .. })
    }

    /// Whether this error counts as a query failure for the reflexion loop.
    pub fn is_query_failure(&self) -> bool {
        matches!(self, Self::Query { .. } | Self::QueryRejected(_))
    }
}
