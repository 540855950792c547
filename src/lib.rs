//! # rca-core
//!
//! A root-cause analysis orchestration library for data-quality anomalies.
//! Given a structured anomaly alert referencing a dataset in a warehouse,
//! it runs a multi-step LLM-driven investigation: discover schema and
//! lineage, generate ranked causal hypotheses, test each with read-only SQL,
//! interpret results as evidence, and synthesize a final finding.
//!
//! ## Core Components
//!
//! - **State**: Event-sourced investigation state; every counter derives
//!   from the append-only event log
//! - **Safety**: Circuit breaker limits and read-only SQL preflight
//! - **Context**: Schema (required, fail-fast) and lineage (optional)
//! - **Agents**: The four LLM roles with strict structured outputs
//! - **Quality**: LLM-as-judge scoring and training-signal capture
//! - **Orchestrator**: Fan-out/fan-in state machine driving the workflow
//!
//! ## Example
//!
//! ```rust,ignore
//! use rca_core::{
//!     AgentClient, AnthropicClient, CircuitBreaker, CircuitBreakerConfig,
//!     ClientConfig, ContextEngine, InvestigationOrchestrator,
//!     InvestigationState, OrchestratorConfig,
//! };
//!
//! let llm = Arc::new(AnthropicClient::new(ClientConfig::new(api_key)));
//! let orchestrator = InvestigationOrchestrator::new(
//!     Arc::new(AgentClient::new(llm)),
//!     ContextEngine::new(),
//!     CircuitBreaker::new(CircuitBreakerConfig::default()),
//!     OrchestratorConfig::default(),
//! );
//!
//! let state = InvestigationState::new(id, tenant_id, alert);
//! let outcome = orchestrator.run_investigation(state, adapter).await?;
//! println!("{:?}", outcome.finding.root_cause);
//! ```

pub mod agents;
pub mod context;
pub mod datasource;
pub mod domain;
pub mod error;
pub mod feedback;
pub mod lineage;
pub mod llm;
pub mod orchestrator;
pub mod quality;
pub mod safety;
pub mod state;

// Re-exports for convenience
pub use agents::{
    AgentClient, HypothesesResponse, HypothesisDraft, InterpretationResponse, InvestigationAgent,
    PreviousAttempt, QueryResponse, StreamHandlers, SynthesisResponse,
};
pub use context::ContextEngine;
pub use datasource::{
    AdapterErrorCode, AdapterRegistry, ColumnSchema, ColumnType, DataSourceAdapter, QueryColumn,
    QueryResult, SchemaFilter, SchemaResponse, SourceType, TableSchema,
};
pub use domain::{
    AnomalyAlert, Evidence, Finding, FindingStatus, Hypothesis, HypothesisCategory,
    InvestigationContext, LineageContext, MetricKind, MetricSpec,
};
pub use error::{Error, Result};
pub use feedback::{
    ActorType, FeedbackEmitter, FeedbackEvent, FeedbackEventType, SqliteFeedbackStore,
};
pub use lineage::{Dataset, DatasetId, LineageAdapter};
pub use llm::{
    AnthropicClient, ChatMessage, ChatRole, ClientConfig, CompletionRequest, CompletionResponse,
    LLMClient, StopReason, TokenUsage,
};
pub use orchestrator::{
    InvestigationOrchestrator, OrchestratorConfig, RunOutcome, SharedEventLog,
};
pub use quality::{
    LlmJudgeValidator, QualityAssessment, QualityValidator, SignalType, TrainingSignal,
    TrainingSignalSink, ValidationResult,
};
pub use safety::{CircuitBreaker, CircuitBreakerConfig, SqlGuard, TrippedLimit};
pub use state::{Event, EventType, InvestigationState, RunStatus};
