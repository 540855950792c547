//! Circuit breaker: safety limits that stop runaway investigations.
//!
//! All checks are pure functions over the event log, run before each query
//! and LLM call. Any limit violation surfaces as `Error::CircuitBreaker`
//! carrying the specific limit that fired.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::state::{self, Event};

/// Configuration for circuit breaker limits.
///
/// Generous enough for normal investigations, strict enough to prevent
/// runaway execution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Maximum queries across all hypotheses.
    pub max_total_queries: usize,
    /// Maximum queries for a single hypothesis.
    pub max_queries_per_hypothesis: usize,
    /// Maximum retry attempts per hypothesis.
    pub max_retries_per_hypothesis: usize,
    /// Maximum consecutive query failures.
    pub max_consecutive_failures: usize,
    /// Maximum investigation duration.
    pub max_duration_seconds: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_total_queries: 50,
            max_queries_per_hypothesis: 5,
            max_retries_per_hypothesis: 2,
            max_consecutive_failures: 3,
            max_duration_seconds: 600,
        }
    }
}

/// The specific limit that fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrippedLimit {
    TotalQueries { count: usize, limit: usize },
    HypothesisQueries { hypothesis_id: String, count: usize, limit: usize },
    HypothesisRetries { hypothesis_id: String, count: usize, limit: usize },
    ConsecutiveFailures { count: usize, limit: usize },
    DurationExceeded { elapsed_seconds: u64, limit_seconds: u64 },
    DuplicateQuery { hypothesis_id: String },
}

impl TrippedLimit {
    /// Whether this limit is scoped to the whole run. Global trips are
    /// terminal; per-hypothesis trips only stop the worker that hit them.
    pub fn is_global(&self) -> bool {
        matches!(
            self,
            Self::TotalQueries { .. }
                | Self::ConsecutiveFailures { .. }
                | Self::DurationExceeded { .. }
        )
    }
}

impl std::fmt::Display for TrippedLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TotalQueries { count, limit } => {
                write!(f, "total query limit reached: {}/{}", count, limit)
            }
            Self::HypothesisQueries { hypothesis_id, count, limit } => write!(
                f,
                "query limit for hypothesis {} reached: {}/{}",
                hypothesis_id, count, limit
            ),
            Self::HypothesisRetries { hypothesis_id, count, limit } => write!(
                f,
                "retry limit for hypothesis {} reached: {}/{}",
                hypothesis_id, count, limit
            ),
            Self::ConsecutiveFailures { count, limit } => {
                write!(f, "consecutive failure limit reached: {}/{}", count, limit)
            }
            Self::DurationExceeded { elapsed_seconds, limit_seconds } => write!(
                f,
                "investigation duration exceeded: {}s/{}s",
                elapsed_seconds, limit_seconds
            ),
            Self::DuplicateQuery { hypothesis_id } => write!(
                f,
                "duplicate query detected for hypothesis {} - investigation stalled",
                hypothesis_id
            ),
        }
    }
}

/// Stateless safety checker parameterized by its config.
#[derive(Debug, Clone, Copy, Default)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run every check whose scope matches. The global checks always run;
    /// per-hypothesis checks run when an id is given. Check order is fixed
    /// but nothing may depend on which limit fires first.
    pub fn check(
        &self,
        events: &[Event],
        now: DateTime<Utc>,
        hypothesis_id: Option<&str>,
    ) -> Result<()> {
        self.check_total_queries(events)?;
        self.check_consecutive_failures(events)?;
        self.check_duration(events, now)?;

        if let Some(h) = hypothesis_id {
            self.check_duplicate_queries(events, h)?;
            self.check_hypothesis_queries(events, h)?;
            self.check_hypothesis_retries(events, h)?;
        }

        Ok(())
    }

    fn check_total_queries(&self, events: &[Event]) -> Result<()> {
        let count = state::query_count(events);
        if count >= self.config.max_total_queries {
            return Err(Error::CircuitBreaker(TrippedLimit::TotalQueries {
                count,
                limit: self.config.max_total_queries,
            }));
        }
        Ok(())
    }

    fn check_hypothesis_queries(&self, events: &[Event], hypothesis_id: &str) -> Result<()> {
        let count = state::hypothesis_query_count(events, hypothesis_id);
        if count >= self.config.max_queries_per_hypothesis {
            return Err(Error::CircuitBreaker(TrippedLimit::HypothesisQueries {
                hypothesis_id: hypothesis_id.to_string(),
                count,
                limit: self.config.max_queries_per_hypothesis,
            }));
        }
        Ok(())
    }

    fn check_hypothesis_retries(&self, events: &[Event], hypothesis_id: &str) -> Result<()> {
        let count = state::retry_count(events, hypothesis_id);
        if count >= self.config.max_retries_per_hypothesis {
            return Err(Error::CircuitBreaker(TrippedLimit::HypothesisRetries {
                hypothesis_id: hypothesis_id.to_string(),
                count,
                limit: self.config.max_retries_per_hypothesis,
            }));
        }
        Ok(())
    }

    fn check_consecutive_failures(&self, events: &[Event]) -> Result<()> {
        let count = state::consecutive_failures(events);
        if count >= self.config.max_consecutive_failures {
            return Err(Error::CircuitBreaker(TrippedLimit::ConsecutiveFailures {
                count,
                limit: self.config.max_consecutive_failures,
            }));
        }
        Ok(())
    }

    fn check_duration(&self, events: &[Event], now: DateTime<Utc>) -> Result<()> {
        let Some(started) = state::started_at(events) else {
            return Ok(());
        };
        let elapsed = (now - started).num_seconds().max(0) as u64;
        if elapsed >= self.config.max_duration_seconds {
            return Err(Error::CircuitBreaker(TrippedLimit::DurationExceeded {
                elapsed_seconds: elapsed,
                limit_seconds: self.config.max_duration_seconds,
            }));
        }
        Ok(())
    }

    /// Stall detection: the LLM keeps generating the same failing query.
    /// Comparison is exact string equality on the raw SQL.
    fn check_duplicate_queries(&self, events: &[Event], hypothesis_id: &str) -> Result<()> {
        let queries = state::all_queries(events, hypothesis_id);
        if queries.len() >= 2 && queries[queries.len() - 1] == queries[queries.len() - 2] {
            return Err(Error::CircuitBreaker(TrippedLimit::DuplicateQuery {
                hypothesis_id: hypothesis_id.to_string(),
            }));
        }
        Ok(())
    }
}
