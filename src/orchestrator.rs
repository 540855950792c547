//! Investigation orchestrator.
//!
//! Drives the full workflow: gather context (fail fast on empty schema),
//! generate hypotheses, investigate them in parallel with a per-hypothesis
//! retry/reflexion loop, then synthesize all evidence into a finding.
//!
//! The orchestrator holds no per-run mutable state of its own - everything
//! derives from the event log. Workers append their events through a single
//! shared log handle, which totally orders the run and lets the circuit
//! breaker see global counts.

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::agents::{InvestigationAgent, InterpretationResponse, PreviousAttempt, SynthesisResponse};
use crate::context::ContextEngine;
use crate::datasource::{AdapterErrorCode, DataSourceAdapter, SchemaResponse};
use crate::domain::{Evidence, Finding, Hypothesis};
use crate::error::{Error, Result};
use crate::feedback::{ActorType, FeedbackEmitter, FeedbackEventType};
use crate::quality::{QualityValidator, SignalType, TrainingSignal, TrainingSignalSink};
use crate::safety::{CircuitBreaker, SqlGuard};
use crate::state::{self, Event, InvestigationState};

/// Configuration for the investigation orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum number of hypotheses to generate.
    pub max_hypotheses: usize,
    /// Maximum queries per hypothesis.
    pub max_queries_per_hypothesis: usize,
    /// Maximum retry attempts per hypothesis.
    pub max_retries_per_hypothesis: usize,
    /// Timeout for individual queries.
    pub query_timeout_seconds: u64,
    /// Stop a hypothesis early once evidence confidence exceeds this.
    pub high_confidence_threshold: f64,
    /// Whether to validate LLM outputs.
    pub validation_enabled: bool,
    /// Minimum composite score to pass validation.
    pub validation_pass_threshold: f64,
    /// Maximum retries on validation failure.
    pub validation_max_retries: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_hypotheses: 5,
            max_queries_per_hypothesis: 3,
            max_retries_per_hypothesis: 2,
            query_timeout_seconds: 30,
            high_confidence_threshold: 0.85,
            validation_enabled: true,
            validation_pass_threshold: 0.6,
            validation_max_retries: 2,
        }
    }
}

/// A finished run: the finding plus the final event-sourced state. Persisting
/// both is the caller's concern.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub finding: Finding,
    pub state: InvestigationState,
}

/// The single append point for a run's event log.
///
/// All appends - the orchestrator's and every worker's - go through one
/// handle, which totally orders the log by append without a lock on any bare
/// list. `check_and_append` runs the circuit breaker under the write lock so
/// safety limits are enforced atomically at the append point.
#[derive(Clone)]
pub struct SharedEventLog {
    events: Arc<RwLock<Vec<Event>>>,
}

impl SharedEventLog {
    pub fn new(seed: Vec<Event>) -> Self {
        Self {
            events: Arc::new(RwLock::new(seed)),
        }
    }

    pub async fn append(&self, event: Event) {
        self.events.write().await.push(event);
    }

    pub async fn snapshot(&self) -> Vec<Event> {
        self.events.read().await.clone()
    }

    /// Run the breaker against the current log and append only if every
    /// limit passes.
    pub async fn check_and_append(
        &self,
        breaker: &CircuitBreaker,
        hypothesis_id: &str,
        event: Event,
    ) -> Result<()> {
        let mut events = self.events.write().await;
        breaker.check(&events, Utc::now(), Some(hypothesis_id))?;
        events.push(event);
        Ok(())
    }
}

/// Everything a hypothesis worker needs, cloned per task.
#[derive(Clone)]
struct WorkerEnv {
    agent: Arc<dyn InvestigationAgent>,
    adapter: Arc<dyn DataSourceAdapter>,
    validator: Option<Arc<dyn QualityValidator>>,
    training: Option<Arc<dyn TrainingSignalSink>>,
    log: SharedEventLog,
    semaphore: Arc<Semaphore>,
    breaker: CircuitBreaker,
    guard: SqlGuard,
    config: OrchestratorConfig,
    schema: SchemaResponse,
    tenant_id: Uuid,
    investigation_id: String,
}

/// Orchestrates the investigation workflow.
///
/// Flow: context -> hypothesize -> parallel investigation -> synthesis.
pub struct InvestigationOrchestrator {
    agent: Arc<dyn InvestigationAgent>,
    context_engine: ContextEngine,
    breaker: CircuitBreaker,
    guard: SqlGuard,
    config: OrchestratorConfig,
    feedback: Option<Arc<dyn FeedbackEmitter>>,
    validator: Option<Arc<dyn QualityValidator>>,
    training: Option<Arc<dyn TrainingSignalSink>>,
}

impl InvestigationOrchestrator {
    pub fn new(
        agent: Arc<dyn InvestigationAgent>,
        context_engine: ContextEngine,
        breaker: CircuitBreaker,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            agent,
            context_engine,
            breaker,
            guard: SqlGuard::new(),
            config,
            feedback: None,
            validator: None,
            training: None,
        }
    }

    /// Attach a feedback emitter for boundary events.
    pub fn with_feedback(mut self, feedback: Arc<dyn FeedbackEmitter>) -> Self {
        self.feedback = Some(feedback);
        self
    }

    /// Attach a quality validator for LLM outputs.
    pub fn with_validator(mut self, validator: Arc<dyn QualityValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Attach a sink for captured training signals.
    pub fn with_training_sink(mut self, training: Arc<dyn TrainingSignalSink>) -> Self {
        self.training = Some(training);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Execute a complete investigation.
    ///
    /// Returns the finding and final state. A `SchemaDiscovery` error
    /// propagates with no finding; a circuit breaker trip returns a partial
    /// finding with `status = failed`.
    #[instrument(skip_all, fields(investigation_id = %state.id, dataset = %state.alert.dataset_id))]
    pub async fn run_investigation(
        &self,
        state: InvestigationState,
        adapter: Arc<dyn DataSourceAdapter>,
    ) -> Result<RunOutcome> {
        let started = Instant::now();
        let dataset_id = state.alert.dataset_id.clone();

        info!("starting investigation");
        let mut state = state.append_event(Event::investigation_started(&dataset_id));
        self.emit_feedback(
            &state,
            FeedbackEventType::InvestigationStarted,
            json!({ "dataset_id": dataset_id }),
        )
        .await;

        // 1. Gather context (fail fast if schema is empty).
        let context = match self.context_engine.gather(&state.alert, adapter.as_ref()).await {
            Ok(context) => context,
            Err(e) => {
                state = state.append_event(Event::schema_discovery_failed(&e.to_string()));
                warn!(error = %e, "schema discovery failed - investigation aborted");
                return Err(e);
            }
        };

        state = state
            .with_context(context.schema.clone(), context.lineage.clone())
            .append_event(Event::context_gathered(
                context.schema.table_count(),
                context.lineage.is_some(),
            ));
        info!(tables = context.schema.table_count(), "context gathered");
        self.emit_feedback(
            &state,
            FeedbackEventType::ContextGathered,
            json!({
                "tables_found": context.schema.table_count(),
                "has_lineage": context.lineage.is_some(),
            }),
        )
        .await;

        // 2. Generate hypotheses.
        let hypotheses = match self
            .agent
            .generate_hypotheses(&state.alert, &context, self.config.max_hypotheses, None)
            .await
        {
            Ok(hypotheses) => hypotheses,
            Err(e) => {
                state = state.append_event(Event::investigation_failed(&e.to_string()));
                return Err(e);
            }
        };
        for h in &hypotheses {
            state = state.append_event(Event::hypothesis_generated(
                &h.id,
                &h.title,
                &h.category.to_string(),
            ));
        }
        info!(count = hypotheses.len(), "hypotheses generated");

        // 3. Parallel fan-out, bounded by the adapter's concurrency limit.
        let log = SharedEventLog::new(state.events.clone());
        let semaphore = Arc::new(Semaphore::new(adapter.max_concurrent_queries().max(1)));
        let schema = context.schema.clone();

        let handles: Vec<_> = hypotheses
            .into_iter()
            .map(|hypothesis| {
                let env = WorkerEnv {
                    agent: Arc::clone(&self.agent),
                    adapter: Arc::clone(&adapter),
                    validator: self.validator.clone(),
                    training: self.training.clone(),
                    log: log.clone(),
                    semaphore: Arc::clone(&semaphore),
                    breaker: self.breaker,
                    guard: self.guard,
                    config: self.config,
                    schema: schema.clone(),
                    tenant_id: state.tenant_id,
                    investigation_id: state.id.clone(),
                };
                tokio::spawn(investigate_hypothesis(env, hypothesis))
            })
            .collect();

        let results = join_all(handles).await;

        // Fold worker events back into the master state, in append order.
        let all_events = log.snapshot().await;
        for event in all_events.into_iter().skip(state.events.len()) {
            state = state.append_event(event);
        }

        let mut evidence: Vec<Evidence> = Vec::new();
        let mut breaker_trip: Option<Error> = None;
        for result in results {
            match result {
                Ok(Ok(worker_evidence)) => evidence.extend(worker_evidence),
                Ok(Err(e @ Error::CircuitBreaker(_))) => breaker_trip = Some(e),
                Ok(Err(e)) => {
                    // One broken hypothesis must not kill the run.
                    warn!(error = %e, "hypothesis investigation failed");
                }
                Err(e) => {
                    warn!(error = %e, "hypothesis worker panicked");
                }
            }
        }
        info!(evidence_count = evidence.len(), "investigation complete");

        if let Some(trip) = breaker_trip {
            warn!(reason = %trip, "circuit breaker tripped");
            state = state.append_event(Event::investigation_failed(&trip.to_string()));
            let finding = Finding::safety_stop(&state.id, started.elapsed().as_secs_f64());
            return Ok(RunOutcome { finding, state });
        }

        // 4. Fan-in synthesis. Runs even with zero evidence; the agent will
        // return an inconclusive finding.
        let finding = match self
            .agent
            .synthesize_findings(&state.alert, &evidence, None)
            .await
        {
            Ok(finding) => finding,
            Err(e) => {
                state = state.append_event(Event::investigation_failed(&e.to_string()));
                return Err(e);
            }
        };

        let finding = Finding {
            investigation_id: state.id.clone(),
            duration_seconds: started.elapsed().as_secs_f64(),
            evidence,
            ..finding
        };

        state = state.append_event(Event::synthesis_completed(
            finding.root_cause.as_deref(),
            finding.confidence,
        ));
        info!(
            root_cause = finding.root_cause.as_deref().unwrap_or("(none)"),
            confidence = finding.confidence,
            "synthesis complete"
        );

        if self.config.validation_enabled {
            self.validate_synthesis(&finding, &state).await;
        }

        self.emit_feedback(
            &state,
            FeedbackEventType::InvestigationCompleted,
            json!({
                "root_cause": finding.root_cause,
                "confidence": finding.confidence,
                "duration_seconds": finding.duration_seconds,
            }),
        )
        .await;

        Ok(RunOutcome { finding, state })
    }

    /// Fire-and-forget feedback emission; failures never affect the run.
    async fn emit_feedback(
        &self,
        state: &InvestigationState,
        event_type: FeedbackEventType,
        event_data: serde_json::Value,
    ) {
        let Some(feedback) = &self.feedback else {
            return;
        };
        if let Err(e) = feedback
            .emit(
                state.tenant_id,
                event_type,
                event_data,
                Some(&state.id),
                Some(&state.alert.dataset_id),
                None,
                ActorType::System,
            )
            .await
        {
            warn!(error = %e, "feedback emit failed");
        }
    }

    /// Validate the synthesis output and capture a training signal. Logged
    /// only; never affects the finding.
    async fn validate_synthesis(&self, finding: &Finding, state: &InvestigationState) {
        let Some(validator) = &self.validator else {
            return;
        };

        let supporting_evidence: Vec<String> = finding
            .evidence
            .iter()
            .filter(|e| !e.interpretation.is_empty())
            .map(|e| e.interpretation.chars().take(200).collect())
            .collect();

        let response = SynthesisResponse {
            root_cause: finding.root_cause.clone(),
            confidence: finding.confidence,
            causal_chain: finding.causal_chain.clone(),
            estimated_onset: finding
                .estimated_onset
                .clone()
                .or_else(|| Some(state.alert.anomaly_date.clone())),
            affected_scope: finding
                .affected_scope
                .clone()
                .or_else(|| Some(format!("Table: {}", state.alert.dataset_id))),
            supporting_evidence: if supporting_evidence.is_empty() {
                vec!["No supporting evidence captured".to_string()]
            } else {
                supporting_evidence
            },
            recommendations: finding.recommendations.clone(),
        };

        let alert_summary = format!(
            "{} anomaly in {}: expected {}, actual {} ({}% deviation)",
            state.alert.metric_spec.display_name,
            state.alert.dataset_id,
            state.alert.expected_value,
            state.alert.actual_value,
            state.alert.deviation_pct,
        );

        match validator.validate_synthesis(&response, &alert_summary).await {
            Ok(result) => {
                info!(
                    passed = result.passed,
                    composite = result.assessment.composite_score,
                    "synthesis validated"
                );
                if let Some(training) = &self.training {
                    let signal = TrainingSignal {
                        signal_type: SignalType::Synthesis,
                        tenant_id: state.tenant_id,
                        investigation_id: state.id.clone(),
                        input_context: json!({
                            "alert_summary": alert_summary,
                            "evidence_count": finding.evidence.len(),
                        }),
                        output_response: serde_json::to_value(&response).unwrap_or_default(),
                        automated_score: result.assessment.composite_score,
                        automated_dimensions: result.assessment.training_signals(),
                    };
                    if let Err(e) = training.record_signal(signal).await {
                        warn!(error = %e, "training signal write failed");
                    }
                }
            }
            Err(e) => warn!(error = %e, "synthesis validation failed"),
        }
    }
}

/// Investigate a single hypothesis with the retry/reflexion loop.
///
/// Per iteration: breaker check, query generation (reflexion mode on
/// retries), duplicate short-circuit, SQL preflight, bounded execution,
/// interpretation. Stops early on high confidence, duplicate query, or
/// exhausted retries.
async fn investigate_hypothesis(env: WorkerEnv, hypothesis: Hypothesis) -> Result<Vec<Evidence>> {
    let mut evidence: Vec<Evidence> = Vec::new();

    for iteration in 0..env.config.max_queries_per_hypothesis {
        let events = env.log.snapshot().await;
        // Per-hypothesis limits stop this worker only; global limits are
        // terminal for the run.
        match env.breaker.check(&events, Utc::now(), Some(&hypothesis.id)) {
            Ok(()) => {}
            Err(Error::CircuitBreaker(limit)) if !limit.is_global() => break,
            Err(e) => return Err(e),
        }

        // Reflexion context: the last failed attempt for this hypothesis.
        let previous_attempt = if iteration > 0 {
            last_failed_attempt(&events, &hypothesis.id)
        } else {
            None
        };

        let raw_sql = env
            .agent
            .generate_query(&hypothesis, &env.schema, previous_attempt.as_ref(), None)
            .await?;

        // The guard may rewrite (LIMIT injection/clamp); the submitted text
        // is the one that reaches the adapter.
        let (submitted_sql, guard_rejection) = match env.guard.validate(&raw_sql) {
            Ok(guarded) => (guarded, None),
            Err(e) => (raw_sql.clone(), Some(e)),
        };

        // Duplicate-query short-circuit: exact string equality against
        // everything already submitted for this hypothesis.
        if state::all_queries(&events, &hypothesis.id).contains(&submitted_sql) {
            warn!(hypothesis_id = %hypothesis.id, "duplicate query detected - stopping hypothesis");
            break;
        }

        match env
            .log
            .check_and_append(
                &env.breaker,
                &hypothesis.id,
                Event::query_submitted(&hypothesis.id, &submitted_sql),
            )
            .await
        {
            Ok(()) => {}
            Err(Error::CircuitBreaker(limit)) if !limit.is_global() => break,
            Err(e) => return Err(e),
        }

        let exec_result = match guard_rejection {
            Some(rejection) => Err(rejection),
            None => execute_bounded(&env, &submitted_sql).await,
        };

        match exec_result {
            Ok(result) => {
                env.log
                    .append(Event::query_succeeded(&hypothesis.id, result.row_count))
                    .await;

                let ev = env
                    .agent
                    .interpret_evidence(&hypothesis, &submitted_sql, &result, None)
                    .await?;

                if env.config.validation_enabled {
                    validate_interpretation(&env, &ev, &hypothesis, &submitted_sql).await;
                }

                info!(
                    hypothesis_id = %hypothesis.id,
                    row_count = result.row_count,
                    confidence = ev.confidence,
                    "query succeeded"
                );
                let confident = ev.confidence > env.config.high_confidence_threshold;
                evidence.push(ev);

                if confident {
                    info!(hypothesis_id = %hypothesis.id, "high confidence reached - stopping hypothesis");
                    break;
                }
            }
            Err(e) if e.is_query_failure() => {
                env.log
                    .append(Event::query_failed(
                        &hypothesis.id,
                        &submitted_sql,
                        &e.to_string(),
                    ))
                    .await;
                warn!(hypothesis_id = %hypothesis.id, error = %e, "query failed");

                let events = env.log.snapshot().await;
                let retries = state::retry_count(&events, &hypothesis.id);
                if retries >= env.config.max_retries_per_hypothesis {
                    info!(hypothesis_id = %hypothesis.id, "max retries reached - stopping hypothesis");
                    break;
                }
                env.log
                    .append(Event::reflexion_attempted(&hypothesis.id, retries + 1))
                    .await;
            }
            // Anything else is an unexpected worker fault, not a query
            // failure; it must not drive the reflexion loop.
            Err(e) => return Err(e),
        }
    }

    Ok(evidence)
}

/// The most recent failed query and its error for a hypothesis.
fn last_failed_attempt(events: &[Event], hypothesis_id: &str) -> Option<PreviousAttempt> {
    let queries = state::failed_queries(events, hypothesis_id);
    let errors = state::failed_query_errors(events, hypothesis_id);
    match (queries.last(), errors.last()) {
        (Some(query), Some(error)) => Some(PreviousAttempt {
            query: query.clone(),
            error: error.clone(),
        }),
        _ => None,
    }
}

/// Execute one query under the adapter's concurrency bound with a per-call
/// timeout. A timeout surfaces as a normal query failure.
async fn execute_bounded(
    env: &WorkerEnv,
    sql: &str,
) -> Result<crate::datasource::QueryResult> {
    let _permit = env
        .semaphore
        .acquire()
        .await
        .map_err(|e| Error::Internal(format!("semaphore closed: {}", e)))?;

    let timeout = Duration::from_secs(env.config.query_timeout_seconds);
    match tokio::time::timeout(
        timeout,
        env.adapter
            .execute_query(sql, None, env.config.query_timeout_seconds, None),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(Error::query(
            AdapterErrorCode::QueryTimeout,
            format!("query exceeded {}s timeout", env.config.query_timeout_seconds),
        )),
    }
}

/// Validate one interpretation and capture a training signal. Logged only.
async fn validate_interpretation(
    env: &WorkerEnv,
    evidence: &Evidence,
    hypothesis: &Hypothesis,
    sql: &str,
) {
    let Some(validator) = &env.validator else {
        return;
    };

    let response = InterpretationResponse {
        supports_hypothesis: evidence.supports_hypothesis,
        confidence: evidence.confidence,
        interpretation: evidence.interpretation.clone(),
        causal_chain: evidence.causal_chain.clone(),
        trigger_identified: evidence.trigger_identified.clone(),
        differentiating_evidence: evidence.differentiating_evidence.clone(),
        key_findings: evidence.key_findings.clone(),
        next_investigation_step: evidence.next_investigation_step.clone(),
    };

    match validator
        .validate_interpretation(&response, &hypothesis.title, sql)
        .await
    {
        Ok(result) => {
            info!(
                hypothesis_id = %hypothesis.id,
                passed = result.passed,
                composite = result.assessment.composite_score,
                "interpretation validated"
            );
            if let Some(training) = &env.training {
                let signal = TrainingSignal {
                    signal_type: SignalType::Interpretation,
                    tenant_id: env.tenant_id,
                    investigation_id: env.investigation_id.clone(),
                    input_context: json!({
                        "hypothesis_title": hypothesis.title,
                        "hypothesis_reasoning": hypothesis.reasoning,
                        "query": sql,
                    }),
                    output_response: serde_json::to_value(&response).unwrap_or_default(),
                    automated_score: result.assessment.composite_score,
                    automated_dimensions: result.assessment.training_signals(),
                };
                if let Err(e) = training.record_signal(signal).await {
                    warn!(error = %e, "training signal write failed");
                }
            }
        }
        Err(e) => warn!(error = %e, "interpretation validation failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::{
        ColumnSchema, ColumnType, QueryColumn, QueryResult, SchemaFilter, SourceType, TableSchema,
    };
    use crate::domain::{
        AnomalyAlert, FindingStatus, HypothesisCategory, InvestigationContext, MetricSpec,
    };
    use crate::safety::CircuitBreakerConfig;
    use crate::state::EventType;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_config_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_hypotheses, 5);
        assert_eq!(config.max_queries_per_hypothesis, 3);
        assert_eq!(config.max_retries_per_hypothesis, 2);
        assert_eq!(config.query_timeout_seconds, 30);
        assert_eq!(config.high_confidence_threshold, 0.85);
        assert!(config.validation_enabled);
        assert_eq!(config.validation_pass_threshold, 0.6);
        assert_eq!(config.validation_max_retries, 2);
    }

    // ====================== scripted collaborators ======================

    /// Per-hypothesis scripts for query generation and interpretation.
    #[derive(Default)]
    struct AgentScript {
        hypotheses: Vec<Hypothesis>,
        /// hypothesis id -> successive SQL strings (last one repeats).
        queries: HashMap<String, Vec<String>>,
        /// hypothesis id -> successive (supports, confidence) interpretations.
        interpretations: HashMap<String, Vec<(Option<bool>, f64)>>,
        /// Synthesis output: (root_cause, confidence).
        synthesis: Option<(Option<String>, f64)>,
    }

    struct ScriptedAgent {
        script: AgentScript,
        query_cursor: Mutex<HashMap<String, usize>>,
        interpret_cursor: Mutex<HashMap<String, usize>>,
        hypothesis_calls: AtomicUsize,
        reflexion_attempts: Mutex<Vec<PreviousAttempt>>,
    }

    impl ScriptedAgent {
        fn new(script: AgentScript) -> Self {
            Self {
                script,
                query_cursor: Mutex::new(HashMap::new()),
                interpret_cursor: Mutex::new(HashMap::new()),
                hypothesis_calls: AtomicUsize::new(0),
                reflexion_attempts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl InvestigationAgent for ScriptedAgent {
        async fn generate_hypotheses(
            &self,
            _alert: &AnomalyAlert,
            _context: &InvestigationContext,
            _num_hypotheses: usize,
            _handlers: Option<&crate::agents::StreamHandlers>,
        ) -> Result<Vec<Hypothesis>> {
            self.hypothesis_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.script.hypotheses.clone())
        }

        async fn generate_query(
            &self,
            hypothesis: &Hypothesis,
            _schema: &SchemaResponse,
            previous_attempt: Option<&PreviousAttempt>,
            _handlers: Option<&crate::agents::StreamHandlers>,
        ) -> Result<String> {
            if let Some(attempt) = previous_attempt {
                self.reflexion_attempts.lock().unwrap().push(attempt.clone());
            }
            let mut cursor = self.query_cursor.lock().unwrap();
            let index = cursor.entry(hypothesis.id.clone()).or_insert(0);
            let queries = &self.script.queries[&hypothesis.id];
            let sql = queries[(*index).min(queries.len() - 1)].clone();
            *index += 1;
            Ok(sql)
        }

        async fn interpret_evidence(
            &self,
            hypothesis: &Hypothesis,
            sql: &str,
            results: &QueryResult,
            _handlers: Option<&crate::agents::StreamHandlers>,
        ) -> Result<Evidence> {
            let mut cursor = self.interpret_cursor.lock().unwrap();
            let index = cursor.entry(hypothesis.id.clone()).or_insert(0);
            let scripts = &self.script.interpretations[&hypothesis.id];
            let (supports, confidence) = scripts[(*index).min(scripts.len() - 1)];
            *index += 1;
            Ok(Evidence {
                hypothesis_id: hypothesis.id.clone(),
                query: sql.to_string(),
                result_summary: results.to_summary(),
                row_count: results.row_count,
                supports_hypothesis: supports,
                confidence,
                interpretation: "scripted interpretation".to_string(),
                causal_chain: None,
                trigger_identified: None,
                differentiating_evidence: None,
                key_findings: vec![],
                next_investigation_step: None,
            })
        }

        async fn synthesize_findings(
            &self,
            _alert: &AnomalyAlert,
            evidence: &[Evidence],
            _handlers: Option<&crate::agents::StreamHandlers>,
        ) -> Result<Finding> {
            let (root_cause, confidence) = self
                .script
                .synthesis
                .clone()
                .expect("synthesis script not set");
            let status = if root_cause.is_some() {
                FindingStatus::Completed
            } else {
                FindingStatus::Inconclusive
            };
            Ok(Finding {
                investigation_id: String::new(),
                status,
                root_cause,
                confidence,
                evidence: evidence.to_vec(),
                recommendations: vec!["Re-run stg_users backfill".to_string()],
                duration_seconds: 0.0,
                causal_chain: vec![
                    "job stall at 03:14".to_string(),
                    "orders JOIN produces NULLs".to_string(),
                ],
                estimated_onset: Some("03:14 UTC".to_string()),
                affected_scope: Some("sales.orders".to_string()),
            })
        }
    }

    /// Adapter with a fixed schema and per-SQL scripted results.
    #[derive(Debug)]
    struct ScriptedAdapter {
        schema: SchemaResponse,
        /// SQL -> result; anything absent succeeds with a default result.
        failures: HashMap<String, AdapterErrorCode>,
        row_count: u64,
        executed: Mutex<Vec<String>>,
    }

    impl ScriptedAdapter {
        fn new(schema: SchemaResponse) -> Self {
            Self {
                schema,
                failures: HashMap::new(),
                row_count: 42,
                executed: Mutex::new(Vec::new()),
            }
        }

        fn failing_on(mut self, sql: &str, code: AdapterErrorCode) -> Self {
            self.failures.insert(sql.to_string(), code);
            self
        }
    }

    #[async_trait]
    impl DataSourceAdapter for ScriptedAdapter {
        async fn execute_query(
            &self,
            sql: &str,
            _params: Option<&HashMap<String, serde_json::Value>>,
            _timeout_seconds: u64,
            _limit: Option<u64>,
        ) -> Result<QueryResult> {
            self.executed.lock().unwrap().push(sql.to_string());
            if let Some(code) = self.failures.get(sql) {
                return Err(Error::query(*code, format!("scripted failure for {}", sql)));
            }
            Ok(QueryResult {
                columns: vec![QueryColumn {
                    name: "user_id".to_string(),
                    data_type: ColumnType::Integer,
                }],
                rows: vec![],
                row_count: self.row_count,
                truncated: false,
                execution_time_ms: Some(3),
            })
        }

        async fn get_schema(&self, _filter: Option<&SchemaFilter>) -> Result<SchemaResponse> {
            Ok(self.schema.clone())
        }

        fn source_type(&self) -> SourceType {
            SourceType::Postgres
        }
    }

    fn alert() -> AnomalyAlert {
        AnomalyAlert {
            dataset_id: "sales.orders".to_string(),
            metric_spec: MetricSpec::from_column("user_id"),
            anomaly_type: "null_rate".to_string(),
            expected_value: 0.5,
            actual_value: 12.3,
            deviation_pct: 2360.0,
            anomaly_date: "2024-01-15".to_string(),
            severity: "high".to_string(),
            source_system: None,
            source_alert_id: None,
            source_url: None,
            metadata: None,
        }
    }

    fn two_table_schema() -> SchemaResponse {
        SchemaResponse::new(vec![
            TableSchema {
                name: "sales.orders".to_string(),
                columns: vec![ColumnSchema {
                    name: "user_id".to_string(),
                    data_type: ColumnType::Integer,
                    nullable: true,
                }],
                row_count_estimate: None,
            },
            TableSchema {
                name: "sales.stg_users".to_string(),
                columns: vec![ColumnSchema {
                    name: "id".to_string(),
                    data_type: ColumnType::Integer,
                    nullable: false,
                }],
                row_count_estimate: None,
            },
        ])
    }

    fn hypothesis(id: &str) -> Hypothesis {
        Hypothesis {
            id: id.to_string(),
            title: format!("Scripted hypothesis {}", id),
            category: HypothesisCategory::UpstreamDependency,
            reasoning: "scripted reasoning for a test hypothesis".to_string(),
            suggested_query: "SELECT 1 LIMIT 1".to_string(),
            expected_if_true: "rows clustered after 03:00".to_string(),
            expected_if_false: "no clustering at all".to_string(),
        }
    }

    fn fresh_state() -> InvestigationState {
        InvestigationState::new("inv-1", Uuid::new_v4(), alert())
    }

    fn orchestrator(
        agent: Arc<ScriptedAgent>,
        breaker_config: CircuitBreakerConfig,
    ) -> InvestigationOrchestrator {
        InvestigationOrchestrator::new(
            agent,
            ContextEngine::new(),
            CircuitBreaker::new(breaker_config),
            OrchestratorConfig {
                validation_enabled: false,
                ..OrchestratorConfig::default()
            },
        )
    }

    fn count_events(state: &InvestigationState, event_type: EventType) -> usize {
        state
            .events
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    /// I5: every query_submitted pairs with exactly one later
    /// succeeded/failed for the same hypothesis.
    fn assert_query_pairing(state: &InvestigationState) {
        let ids: std::collections::HashSet<String> = state
            .events
            .iter()
            .filter_map(|e| e.hypothesis_id().map(str::to_string))
            .collect();
        for h in ids {
            let submitted = state.hypothesis_query_count(&h);
            let resolved = state
                .events
                .iter()
                .filter(|e| {
                    matches!(
                        e.event_type,
                        EventType::QuerySucceeded | EventType::QueryFailed
                    ) && e.hypothesis_id() == Some(h.as_str())
                })
                .count();
            assert_eq!(submitted, resolved, "unpaired queries for {}", h);
        }
    }

    // ============================ scenarios ============================

    #[tokio::test]
    async fn test_happy_path() {
        // Three hypotheses; h1 finds the answer with one high-confidence
        // query, the others produce low-confidence evidence and stop on the
        // duplicate short-circuit.
        let script = AgentScript {
            hypotheses: vec![hypothesis("h1"), hypothesis("h2"), hypothesis("h3")],
            queries: HashMap::from([
                (
                    "h1".to_string(),
                    vec!["SELECT * FROM sales.orders WHERE user_id IS NULL LIMIT 100".to_string()],
                ),
                (
                    "h2".to_string(),
                    vec!["SELECT count(*) FROM sales.stg_users LIMIT 1".to_string()],
                ),
                (
                    "h3".to_string(),
                    vec!["SELECT severity FROM sales.orders LIMIT 10".to_string()],
                ),
            ]),
            interpretations: HashMap::from([
                ("h1".to_string(), vec![(Some(true), 0.92)]),
                ("h2".to_string(), vec![(Some(false), 0.5)]),
                ("h3".to_string(), vec![(None, 0.4)]),
            ]),
            synthesis: Some((Some("stg_users ETL job stalled at 03:14 UTC".to_string()), 0.88)),
        };
        let agent = Arc::new(ScriptedAgent::new(script));
        let adapter = Arc::new(ScriptedAdapter::new(two_table_schema()));
        let orchestrator = orchestrator(agent.clone(), CircuitBreakerConfig::default());

        let outcome = orchestrator
            .run_investigation(fresh_state(), adapter)
            .await
            .unwrap();

        let finding = &outcome.finding;
        assert_eq!(finding.status, FindingStatus::Completed);
        assert_eq!(finding.confidence, 0.88);
        assert_eq!(finding.investigation_id, "inv-1");
        assert!(finding.evidence.len() >= 1);
        assert!(finding.duration_seconds >= 0.0);

        let state = &outcome.state;
        assert_eq!(state.events[0].event_type, EventType::InvestigationStarted);
        let gathered = state
            .events
            .iter()
            .find(|e| e.event_type == EventType::ContextGathered)
            .unwrap();
        assert_eq!(gathered.data["tables_found"], 2);
        assert_eq!(count_events(state, EventType::HypothesisGenerated), 3);

        // h1 stopped after one high-confidence query.
        assert_eq!(state.hypothesis_query_count("h1"), 1);
        let synthesis = state
            .events
            .iter()
            .find(|e| e.event_type == EventType::SynthesisCompleted)
            .unwrap();
        assert_eq!(synthesis.data["confidence"], 0.88);

        assert_query_pairing(state);
    }

    #[tokio::test]
    async fn test_empty_schema_fails_fast() {
        let script = AgentScript {
            hypotheses: vec![hypothesis("h1")],
            queries: HashMap::from([("h1".to_string(), vec!["SELECT 1 LIMIT 1".to_string()])]),
            interpretations: HashMap::from([("h1".to_string(), vec![(Some(true), 0.9)])]),
            synthesis: Some((None, 0.0)),
        };
        let agent = Arc::new(ScriptedAgent::new(script));
        let adapter = Arc::new(ScriptedAdapter::new(SchemaResponse::new(Vec::new())));
        let orchestrator = orchestrator(agent.clone(), CircuitBreakerConfig::default());

        let err = orchestrator
            .run_investigation(fresh_state(), adapter)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SchemaDiscovery(_)));
        // No hypothesis generation ever happened.
        assert_eq!(agent.hypothesis_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reflexion_loop_corrects_failed_query() {
        let typo = "SELECT * FROM sales.ordrs LIMIT 100";
        let fixed = "SELECT * FROM sales.orders LIMIT 100";
        let script = AgentScript {
            hypotheses: vec![hypothesis("h1")],
            queries: HashMap::from([(
                "h1".to_string(),
                vec![typo.to_string(), fixed.to_string()],
            )]),
            interpretations: HashMap::from([("h1".to_string(), vec![(Some(true), 0.9)])]),
            synthesis: Some((Some("typo fixed, cause found upstream".to_string()), 0.8)),
        };
        let agent = Arc::new(ScriptedAgent::new(script));
        let adapter = Arc::new(
            ScriptedAdapter::new(two_table_schema())
                .failing_on(typo, AdapterErrorCode::QuerySyntaxError),
        );
        let orchestrator = orchestrator(agent.clone(), CircuitBreakerConfig::default());

        let outcome = orchestrator
            .run_investigation(fresh_state(), adapter)
            .await
            .unwrap();
        let state = &outcome.state;

        // submitted -> failed -> reflexion{1} -> submitted -> succeeded
        let h1_events: Vec<EventType> = state
            .events
            .iter()
            .filter(|e| e.hypothesis_id() == Some("h1"))
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            h1_events,
            vec![
                EventType::QuerySubmitted,
                EventType::QueryFailed,
                EventType::ReflexionAttempted,
                EventType::QuerySubmitted,
                EventType::QuerySucceeded,
            ]
        );
        let reflexion = state
            .events
            .iter()
            .find(|e| e.event_type == EventType::ReflexionAttempted)
            .unwrap();
        assert_eq!(reflexion.data["retry_number"], 1);

        // I4: consecutive submissions differ.
        let queries = state.all_queries("h1");
        assert_eq!(queries, vec![typo.to_string(), fixed.to_string()]);

        // I2: retries within bounds.
        assert!(state.retry_count("h1") <= 2);

        // The reflexion prompt carried the failed SQL and its error.
        let attempts = agent.reflexion_attempts.lock().unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].query, typo);
        assert!(attempts[0].error.contains("scripted failure"));

        assert_query_pairing(state);
    }

    #[tokio::test]
    async fn test_duplicate_query_short_circuits() {
        // Agent emits the same SQL forever; interpretation stays below the
        // confidence bar, so only the duplicate check stops the worker.
        let same = "SELECT count(*) FROM sales.orders LIMIT 10";
        let script = AgentScript {
            hypotheses: vec![hypothesis("h1")],
            queries: HashMap::from([("h1".to_string(), vec![same.to_string()])]),
            interpretations: HashMap::from([("h1".to_string(), vec![(Some(false), 0.5)])]),
            synthesis: Some((None, 0.3)),
        };
        let agent = Arc::new(ScriptedAgent::new(script));
        let adapter = Arc::new(ScriptedAdapter::new(two_table_schema()));
        let orchestrator = orchestrator(agent, CircuitBreakerConfig::default());

        let outcome = orchestrator
            .run_investigation(fresh_state(), adapter)
            .await
            .unwrap();
        let state = &outcome.state;

        assert_eq!(state.hypothesis_query_count("h1"), 1);
        assert_eq!(count_events(state, EventType::QueryFailed), 0);
        assert_eq!(count_events(state, EventType::QuerySucceeded), 1);
    }

    #[tokio::test]
    async fn test_circuit_breaker_trips_on_total_queries() {
        let script = AgentScript {
            hypotheses: vec![hypothesis("h1"), hypothesis("h2"), hypothesis("h3")],
            queries: HashMap::from([
                ("h1".to_string(), vec!["SELECT a FROM sales.orders LIMIT 1".to_string()]),
                ("h2".to_string(), vec!["SELECT b FROM sales.orders LIMIT 1".to_string()]),
                ("h3".to_string(), vec!["SELECT c FROM sales.orders LIMIT 1".to_string()]),
            ]),
            interpretations: HashMap::from([
                ("h1".to_string(), vec![(Some(true), 0.9)]),
                ("h2".to_string(), vec![(Some(true), 0.9)]),
                ("h3".to_string(), vec![(Some(true), 0.9)]),
            ]),
            synthesis: Some((Some("unused".to_string()), 0.9)),
        };
        let agent = Arc::new(ScriptedAgent::new(script));
        let adapter = Arc::new(ScriptedAdapter::new(two_table_schema()));
        let orchestrator = orchestrator(
            agent,
            CircuitBreakerConfig {
                max_total_queries: 2,
                ..CircuitBreakerConfig::default()
            },
        );

        let outcome = orchestrator
            .run_investigation(fresh_state(), adapter)
            .await
            .unwrap();

        assert_eq!(outcome.finding.status, FindingStatus::Failed);
        assert!(outcome.finding.evidence.is_empty());
        assert_eq!(
            outcome.finding.recommendations,
            vec!["Investigation was stopped due to safety limits".to_string()]
        );

        let state = &outcome.state;
        // I3: the limit held.
        assert!(state.query_count() <= 2);
        assert_eq!(
            state.events.last().unwrap().event_type,
            EventType::InvestigationFailed
        );
    }

    #[tokio::test]
    async fn test_inconclusive_synthesis() {
        let script = AgentScript {
            hypotheses: vec![hypothesis("h1"), hypothesis("h2"), hypothesis("h3")],
            queries: HashMap::from([
                ("h1".to_string(), vec!["SELECT a FROM sales.orders LIMIT 1".to_string()]),
                ("h2".to_string(), vec!["SELECT b FROM sales.orders LIMIT 1".to_string()]),
                ("h3".to_string(), vec!["SELECT c FROM sales.orders LIMIT 1".to_string()]),
            ]),
            interpretations: HashMap::from([
                ("h1".to_string(), vec![(Some(false), 0.3)]),
                ("h2".to_string(), vec![(Some(false), 0.35)]),
                ("h3".to_string(), vec![(Some(false), 0.2)]),
            ]),
            synthesis: Some((None, 0.4)),
        };
        let agent = Arc::new(ScriptedAgent::new(script));
        let adapter = Arc::new(ScriptedAdapter::new(two_table_schema()));
        let orchestrator = orchestrator(agent, CircuitBreakerConfig::default());

        let outcome = orchestrator
            .run_investigation(fresh_state(), adapter)
            .await
            .unwrap();

        assert_eq!(outcome.finding.status, FindingStatus::Inconclusive);
        assert_eq!(outcome.finding.root_cause, None);
        assert_eq!(outcome.finding.evidence.len(), 3);

        let synthesis = outcome
            .state
            .events
            .iter()
            .find(|e| e.event_type == EventType::SynthesisCompleted)
            .unwrap();
        assert_eq!(synthesis.data["confidence"], 0.4);
        assert_query_pairing(&outcome.state);
    }

    #[tokio::test]
    async fn test_guard_rejection_feeds_reflexion_loop() {
        // First query is mutation DML: rejected by the guard, recorded as a
        // failed query, corrected through reflexion.
        let bad = "DELETE FROM sales.orders";
        let fixed = "SELECT count(*) FROM sales.orders LIMIT 10";
        let script = AgentScript {
            hypotheses: vec![hypothesis("h1")],
            queries: HashMap::from([(
                "h1".to_string(),
                vec![bad.to_string(), fixed.to_string()],
            )]),
            interpretations: HashMap::from([("h1".to_string(), vec![(Some(true), 0.9)])]),
            synthesis: Some((Some("found it after guard rejection".to_string()), 0.8)),
        };
        let agent = Arc::new(ScriptedAgent::new(script));
        let adapter = Arc::new(ScriptedAdapter::new(two_table_schema()));
        let orchestrator = orchestrator(agent, CircuitBreakerConfig::default());

        let outcome = orchestrator
            .run_investigation(fresh_state(), adapter.clone())
            .await
            .unwrap();
        let state = &outcome.state;

        // The rejected statement never reached the adapter.
        let executed = adapter.executed.lock().unwrap().clone();
        assert_eq!(executed, vec![fixed.to_string()]);

        assert_eq!(count_events(state, EventType::QueryFailed), 1);
        assert_eq!(count_events(state, EventType::ReflexionAttempted), 1);
        assert_eq!(count_events(state, EventType::QuerySucceeded), 1);
        assert_query_pairing(state);
    }

    #[tokio::test]
    async fn test_retries_exhaust_then_worker_stops() {
        // Every query fails; the worker burns its retries, the breaker's
        // per-hypothesis retry limit stops it, and the run still
        // synthesizes (inconclusive).
        let q1 = "SELECT a FROM sales.orders LIMIT 1";
        let q2 = "SELECT b FROM sales.orders LIMIT 1";
        let q3 = "SELECT c FROM sales.orders LIMIT 1";
        let script = AgentScript {
            hypotheses: vec![hypothesis("h1")],
            queries: HashMap::from([(
                "h1".to_string(),
                vec![q1.to_string(), q2.to_string(), q3.to_string()],
            )]),
            interpretations: HashMap::from([("h1".to_string(), vec![(None, 0.3)])]),
            synthesis: Some((None, 0.2)),
        };
        let agent = Arc::new(ScriptedAgent::new(script));
        let adapter = Arc::new(
            ScriptedAdapter::new(two_table_schema())
                .failing_on(q1, AdapterErrorCode::QuerySyntaxError)
                .failing_on(q2, AdapterErrorCode::QueryTimeout)
                .failing_on(q3, AdapterErrorCode::InternalError),
        );
        let orchestrator = orchestrator(agent, CircuitBreakerConfig::default());

        let outcome = orchestrator
            .run_investigation(fresh_state(), adapter)
            .await
            .unwrap();
        let state = &outcome.state;

        // I2: exactly max_retries reflexion attempts; the third query is
        // never generated because the retry limit stops the worker first.
        assert_eq!(state.retry_count("h1"), 2);
        assert_eq!(count_events(state, EventType::QueryFailed), 2);
        assert_eq!(state.hypothesis_query_count("h1"), 2);
        assert_eq!(outcome.finding.status, FindingStatus::Inconclusive);
        assert_eq!(outcome.finding.evidence.len(), 0);
        assert_query_pairing(state);
    }

    #[tokio::test]
    async fn test_feedback_boundary_events() {
        use crate::feedback::SqliteFeedbackStore;

        let script = AgentScript {
            hypotheses: vec![hypothesis("h1")],
            queries: HashMap::from([(
                "h1".to_string(),
                vec!["SELECT a FROM sales.orders LIMIT 1".to_string()],
            )]),
            interpretations: HashMap::from([("h1".to_string(), vec![(Some(true), 0.9)])]),
            synthesis: Some((Some("stg_users stalled at 03:14".to_string()), 0.88)),
        };
        let agent = Arc::new(ScriptedAgent::new(script));
        let adapter = Arc::new(ScriptedAdapter::new(two_table_schema()));
        let store = Arc::new(SqliteFeedbackStore::in_memory().unwrap());
        let orchestrator =
            orchestrator(agent, CircuitBreakerConfig::default()).with_feedback(store.clone());

        orchestrator
            .run_investigation(fresh_state(), adapter)
            .await
            .unwrap();

        let events = store.events_for_investigation("inv-1").unwrap();
        let types: Vec<FeedbackEventType> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                FeedbackEventType::InvestigationStarted,
                FeedbackEventType::ContextGathered,
                FeedbackEventType::InvestigationCompleted,
            ]
        );
    }

    #[tokio::test]
    async fn test_shared_event_log_check_and_append_enforces_limit() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            max_total_queries: 1,
            ..CircuitBreakerConfig::default()
        });
        let log = SharedEventLog::new(vec![Event::investigation_started("sales.orders")]);

        log.check_and_append(&breaker, "h1", Event::query_submitted("h1", "SELECT 1 LIMIT 1"))
            .await
            .unwrap();
        let err = log
            .check_and_append(&breaker, "h2", Event::query_submitted("h2", "SELECT 2 LIMIT 1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CircuitBreaker(_)));

        // The rejected event was not appended.
        let events = log.snapshot().await;
        assert_eq!(state::query_count(&events), 1);
    }
}
