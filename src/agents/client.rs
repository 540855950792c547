//! Agent client: the four-operation LLM facade.
//!
//! Each operation prompts for a strict structured output, extracts and
//! validates the JSON, and retries the full call when the model misses the
//! shape. The facade records no events; the orchestrator is the sole writer
//! of the investigation log.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::datasource::{QueryResult, SchemaResponse};
use crate::domain::{
    AnomalyAlert, Evidence, Finding, FindingStatus, Hypothesis, InvestigationContext,
};
use crate::error::{Error, Result};
use crate::llm::{ChatMessage, CompletionRequest, LLMClient};

use super::models::{
    extract_json, HypothesesResponse, InterpretationResponse, QueryResponse, SynthesisResponse,
};
use super::prompts::{hypothesis, interpretation, query, reflexion, synthesis};
use super::stream::StreamHandlers;

/// The failed attempt fed back into reflexion-mode query generation.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviousAttempt {
    /// The SQL that failed.
    pub query: String,
    /// The error the adapter returned.
    pub error: String,
}

/// The four LLM operations the orchestrator depends on.
///
/// Abstracted as a trait so the orchestrator (and its tests) never touch a
/// concrete provider.
#[async_trait]
pub trait InvestigationAgent: Send + Sync {
    /// Generate ranked causal hypotheses for the anomaly.
    async fn generate_hypotheses(
        &self,
        alert: &AnomalyAlert,
        context: &InvestigationContext,
        num_hypotheses: usize,
        handlers: Option<&StreamHandlers>,
    ) -> Result<Vec<Hypothesis>>;

    /// Generate an investigative SELECT; reflexion mode when a previous
    /// attempt is given.
    async fn generate_query(
        &self,
        hypothesis: &Hypothesis,
        schema: &SchemaResponse,
        previous_attempt: Option<&PreviousAttempt>,
        handlers: Option<&StreamHandlers>,
    ) -> Result<String>;

    /// Interpret query results as evidence for or against a hypothesis.
    /// Never fails: interpretation faults degrade to low-confidence
    /// placeholder evidence.
    async fn interpret_evidence(
        &self,
        hypothesis: &Hypothesis,
        sql: &str,
        results: &QueryResult,
        handlers: Option<&StreamHandlers>,
    ) -> Result<Evidence>;

    /// Synthesize all evidence into the final finding. Failure here is fatal
    /// to the run.
    async fn synthesize_findings(
        &self,
        alert: &AnomalyAlert,
        evidence: &[Evidence],
        handlers: Option<&StreamHandlers>,
    ) -> Result<Finding>;
}

/// LLM-backed implementation of the four investigation agents.
pub struct AgentClient {
    client: Arc<dyn LLMClient>,
    model: Option<String>,
    max_retries: u32,
}

impl AgentClient {
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self {
            client,
            model: None,
            max_retries: 3,
        }
    }

    /// Override the model for all four agents.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Max full-call retries when structured output fails to parse.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// One structured call: complete, extract JSON, deserialize, validate.
    /// The whole call retries on failure; a response that still fails after
    /// retries is a non-retryable LLM error.
    async fn ask<T, V>(
        &self,
        system: String,
        user: String,
        handlers: Option<&StreamHandlers>,
        validate: V,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        V: Fn(&T) -> Result<()>,
    {
        let mut last_error: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                debug!(attempt, "retrying structured agent call");
            }

            let mut request = CompletionRequest::new()
                .with_system(system.clone())
                .with_message(ChatMessage::user(user.clone()));
            if let Some(model) = &self.model {
                request = request.with_model(model.clone());
            }

            let response = match handlers {
                Some(h) if h.wants_tokens() => {
                    let forward = |chunk: &str| h.emit_token(chunk);
                    self.client.complete_streaming(request, &forward).await
                }
                _ => self.client.complete(request).await,
            };

            // Transport faults: retry only what the client tagged retryable;
            // a 400-class error will not get better on a second ask.
            let response = match response {
                Ok(r) => r,
                Err(e) if e.is_retryable() => {
                    last_error = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            match extract_json(&response.content).and_then(|value| {
                if let Some(h) = handlers {
                    h.emit_partial(&value);
                }
                let parsed: T = serde_json::from_value(value)
                    .map_err(|e| Error::llm(format!("structured output mismatch: {}", e), false))?;
                validate(&parsed)?;
                Ok(parsed)
            }) {
                Ok(parsed) => {
                    if let Some(h) = handlers {
                        h.emit_complete(&response.content);
                    }
                    return Ok(parsed);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "structured output failed validation");
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(Error::Llm { message, .. }) => Error::llm(
                format!("structured output failed after retries: {}", message),
                false,
            ),
            Some(other) => other,
            None => Error::llm("structured output failed after retries", false),
        })
    }
}

#[async_trait]
impl InvestigationAgent for AgentClient {
    async fn generate_hypotheses(
        &self,
        alert: &AnomalyAlert,
        context: &InvestigationContext,
        num_hypotheses: usize,
        handlers: Option<&StreamHandlers>,
    ) -> Result<Vec<Hypothesis>> {
        let system = hypothesis::build_system(num_hypotheses);
        let user = hypothesis::build_user(alert, context);

        let response: HypothesesResponse = self
            .ask(system, user, handlers, |r: &HypothesesResponse| {
                if r.hypotheses.is_empty() {
                    return Err(Error::llm("model returned zero hypotheses", false));
                }
                Ok(())
            })
            .await
            .map_err(|e| Error::llm(format!("hypothesis generation failed: {}", e), false))?;

        let hypotheses = response.into_valid_hypotheses();
        if hypotheses.is_empty() {
            return Err(Error::llm(
                "hypothesis generation produced no valid hypotheses",
                false,
            ));
        }
        Ok(hypotheses)
    }

    async fn generate_query(
        &self,
        hypothesis: &Hypothesis,
        schema: &SchemaResponse,
        previous_attempt: Option<&PreviousAttempt>,
        handlers: Option<&StreamHandlers>,
    ) -> Result<String> {
        let (system, user) = match previous_attempt {
            Some(attempt) => (
                reflexion::build_system(schema),
                reflexion::build_user(hypothesis, &attempt.query, &attempt.error),
            ),
            None => (query::build_system(schema), query::build_user(hypothesis)),
        };

        let response: QueryResponse = self
            .ask(system, user, handlers, |r: &QueryResponse| {
                if r.query.trim().is_empty() {
                    return Err(Error::llm("model returned an empty query", false));
                }
                Ok(())
            })
            .await
            .map_err(|e| Error::llm(format!("query generation failed: {}", e), true))?;

        // Returned as-is: SQL safety is the preflight guard's job.
        Ok(response.query)
    }

    async fn interpret_evidence(
        &self,
        hypothesis: &Hypothesis,
        sql: &str,
        results: &QueryResult,
        handlers: Option<&StreamHandlers>,
    ) -> Result<Evidence> {
        let system = interpretation::build_system();
        let user = interpretation::build_user(hypothesis, sql, results);

        let outcome: Result<InterpretationResponse> = self
            .ask(system, user, handlers, InterpretationResponse::validate)
            .await;

        match outcome {
            Ok(response) => Ok(Evidence {
                hypothesis_id: hypothesis.id.clone(),
                query: sql.to_string(),
                result_summary: results.to_summary(),
                row_count: results.row_count,
                supports_hypothesis: response.supports_hypothesis,
                confidence: response.confidence,
                interpretation: response.interpretation,
                causal_chain: response.causal_chain,
                trigger_identified: response.trigger_identified,
                differentiating_evidence: response.differentiating_evidence,
                key_findings: response.key_findings,
                next_investigation_step: response.next_investigation_step,
            }),
            // Degrade instead of propagating: one broken interpretation must
            // not abort the whole run.
            Err(e) => {
                warn!(hypothesis_id = %hypothesis.id, error = %e, "interpretation failed - returning fallback evidence");
                Ok(Evidence::interpretation_failed(
                    &hypothesis.id,
                    sql,
                    results.to_summary(),
                    results.row_count,
                    &e.to_string(),
                ))
            }
        }
    }

    async fn synthesize_findings(
        &self,
        alert: &AnomalyAlert,
        evidence: &[Evidence],
        handlers: Option<&StreamHandlers>,
    ) -> Result<Finding> {
        let system = synthesis::build_system();
        let user = synthesis::build_user(alert, evidence);

        let response: SynthesisResponse = self
            .ask(system, user, handlers, SynthesisResponse::validate)
            .await
            .map_err(|e| Error::llm(format!("synthesis failed: {}", e), false))?;

        // Below 0.5 the contract forces an inconclusive finding regardless
        // of what the model put in root_cause.
        let root_cause = if response.confidence < 0.5 {
            None
        } else {
            response.root_cause
        };

        let status = if root_cause.is_some() {
            FindingStatus::Completed
        } else {
            FindingStatus::Inconclusive
        };

        Ok(Finding {
            // Identity and duration are stamped by the orchestrator.
            investigation_id: String::new(),
            status,
            root_cause,
            confidence: response.confidence,
            evidence: evidence.to_vec(),
            recommendations: response.recommendations,
            duration_seconds: 0.0,
            causal_chain: response.causal_chain,
            estimated_onset: response.estimated_onset,
            affected_scope: response.affected_scope,
        })
    }
}
