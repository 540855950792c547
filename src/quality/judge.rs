//! LLM-as-judge quality validator.
//!
//! Scores interpretation and synthesis outputs along three weighted
//! dimensions with a fixed rubric. Validation runs after the call it is
//! judging and never aborts the investigation; the dimensional breakdown
//! becomes a training signal.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::agents::{extract_json, InterpretationResponse, SynthesisResponse};
use crate::error::{Error, Result};
use crate::llm::{ChatMessage, CompletionRequest, LLMClient};

use super::assessment::{QualityAssessment, ValidationResult};

/// Default minimum composite score to pass validation.
pub const DEFAULT_PASS_THRESHOLD: f64 = 0.6;

const JUDGE_SYSTEM_PROMPT: &str = r#"You evaluate root cause analysis quality on three dimensions.

## Causal Depth (50% weight)

CRITICAL DISTINCTION:
- "ETL job failed" is NOT a root cause - it's a HYPOTHESIS
- "ETL job failed because the source API returned 429 rate limit errors" IS a root cause

A true causal chain must include:
1. The TRIGGER (what changed? API error, config change, deploy, etc.)
2. The MECHANISM (how did the trigger cause the symptom?)
3. The TIMELINE (when did each step occur?)

Scoring:
- 0.0-0.2: Just confirms the symptom exists ("NULLs appeared on Jan 10")
- 0.3-0.4: Names a cause category without evidence ("ETL failure", "data corruption")
- 0.5-0.6: Names a specific component but no trigger ("users ETL job stopped")
- 0.7-0.8: Has trigger + mechanism but vague timing ("API timeout caused ETL to fail")
- 0.9-1.0: Complete: trigger + mechanism + timeline
  ("API rate limit at 03:14 -> ETL timeout -> users table stale -> JOIN NULLs")

RED FLAGS (cap the score at 0.4):
- Vague cause categories: "data corruption", "infrastructure failure", "ETL malfunction"
- Says "suggests", "indicates", "consistent with" without concrete evidence
- No specific component names (which job? which table? which API?)
- No timestamps more precise than the day
- trigger_identified field is empty or vague

## Specificity (30% weight)
Evaluate key_findings and supporting_evidence:
- 0.0-0.2: No concrete data
- 0.3-0.4: Vague quantities ("many rows")
- 0.5-0.6: Some numbers but no timestamps
- 0.7-0.8: Numbers + timestamps OR entity names
- 0.9-1.0: Timestamps + counts + specific table/column names

## Actionability (20% weight)
Evaluate recommendations:
- 0.0-0.2: "Investigate the issue"
- 0.3-0.4: "Check the ETL job"
- 0.5-0.6: "Check the stg_users ETL job logs"
- 0.7-0.8: "Check CloudWatch for stg_users job failures around 03:14 UTC"
- 0.9-1.0: "Run: airflow trigger_dag stg_users --conf '{"backfill": true}'"

## Differentiation Bonus/Penalty
If differentiating_evidence is present:
- Specific and unique ("Error code ETL-5012 in job logs"): +0.1 bonus to the composite
- Vague ("Pattern matches known failure signature"): no change
- Empty/null while confidence > 0.7: -0.1 penalty to the composite

Be calibrated: most responses score 0.3-0.6. Reserve 0.8+ for responses with
concrete triggers, mechanisms, and timelines. Be HARSH on vague cause categories.

Always identify the lowest_dimension and provide a specific improvement_suggestion
(at least 20 characters) explaining how to improve that dimension.

Respond with a single JSON object:
{"causal_depth": 0.0, "specificity": 0.0, "actionability": 0.0,
 "composite_score": 0.0, "lowest_dimension": "...", "improvement_suggestion": "..."}"#;

/// Interface for LLM output quality validation.
///
/// Implementations may judge semantically (LLM-as-judge), by rules, or with
/// a learned scorer. All return dimensional scores for training-signal
/// capture.
#[async_trait]
pub trait QualityValidator: Send + Sync {
    /// Validate an interpretation response.
    async fn validate_interpretation(
        &self,
        response: &InterpretationResponse,
        hypothesis_title: &str,
        query: &str,
    ) -> Result<ValidationResult>;

    /// Validate a synthesis response.
    async fn validate_synthesis(
        &self,
        response: &SynthesisResponse,
        alert_summary: &str,
    ) -> Result<ValidationResult>;
}

/// Quality validator backed by an LLM judge with the fixed rubric above.
pub struct LlmJudgeValidator {
    client: Arc<dyn LLMClient>,
    model: Option<String>,
    pass_threshold: f64,
    max_retries: u32,
}

impl LlmJudgeValidator {
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self {
            client,
            model: None,
            pass_threshold: DEFAULT_PASS_THRESHOLD,
            max_retries: 2,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_pass_threshold(mut self, threshold: f64) -> Self {
        self.pass_threshold = threshold;
        self
    }

    async fn judge(&self, prompt: String) -> Result<ValidationResult> {
        let mut last_error: Option<Error> = None;

        for _ in 0..=self.max_retries {
            let mut request = CompletionRequest::new()
                .with_system(JUDGE_SYSTEM_PROMPT)
                .with_message(ChatMessage::user(prompt.clone()));
            if let Some(model) = &self.model {
                request = request.with_model(model.clone());
            }

            let outcome = match self.client.complete(request).await {
                Ok(response) => extract_json(&response.content).and_then(|value| {
                    let assessment: QualityAssessment = serde_json::from_value(value)
                        .map_err(|e| Error::llm(format!("judge output mismatch: {}", e), false))?;
                    assessment.validate()?;
                    Ok(assessment)
                }),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(assessment) => {
                    // The composite may differ from the weighted dimensional
                    // sum only by the differentiation adjustment (at most
                    // 0.1 either way). Larger drift means the judge is not
                    // following its own rubric.
                    let drift =
                        (assessment.composite_score - assessment.weighted_composite()).abs();
                    if drift > 0.1 + 1e-6 {
                        warn!(
                            composite = assessment.composite_score,
                            weighted = assessment.weighted_composite(),
                            "judge composite drifts beyond the differentiation adjustment"
                        );
                    }

                    let passed = assessment.composite_score >= self.pass_threshold;
                    debug!(
                        passed,
                        composite = assessment.composite_score,
                        lowest = %assessment.lowest_dimension,
                        "quality assessment complete"
                    );
                    return Ok(ValidationResult { passed, assessment });
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::llm("judge failed after retries", false)))
    }
}

#[async_trait]
impl QualityValidator for LlmJudgeValidator {
    async fn validate_interpretation(
        &self,
        response: &InterpretationResponse,
        hypothesis_title: &str,
        query: &str,
    ) -> Result<ValidationResult> {
        let trigger = response.trigger_identified.as_deref().unwrap_or("NOT PROVIDED");
        let diff = response
            .differentiating_evidence
            .as_deref()
            .unwrap_or("NOT PROVIDED");

        let prompt = format!(
            "Evaluate this interpretation:\n\
             \n\
             HYPOTHESIS TESTED: {hypothesis_title}\n\
             QUERY RUN: {query}\n\
             \n\
             RESPONSE:\n\
             - interpretation: {interpretation}\n\
             - causal_chain: {causal_chain}\n\
             - trigger_identified: {trigger}\n\
             - differentiating_evidence: {diff}\n\
             - confidence: {confidence}\n\
             - key_findings: {key_findings:?}\n\
             - supports_hypothesis: {supports:?}\n\
             \n\
             Score each dimension. Apply the differentiation bonus/penalty based on\n\
             differentiating_evidence. Identify what needs improvement.",
            hypothesis_title = hypothesis_title,
            query = query,
            interpretation = response.interpretation,
            causal_chain = response.causal_chain.as_deref().unwrap_or("NOT PROVIDED"),
            trigger = trigger,
            diff = diff,
            confidence = response.confidence,
            key_findings = response.key_findings,
            supports = response.supports_hypothesis,
        );

        self.judge(prompt).await
    }

    async fn validate_synthesis(
        &self,
        response: &SynthesisResponse,
        alert_summary: &str,
    ) -> Result<ValidationResult> {
        let prompt = format!(
            "Evaluate this root cause analysis:\n\
             \n\
             ORIGINAL ANOMALY: {alert_summary}\n\
             \n\
             RESPONSE:\n\
             - root_cause: {root_cause}\n\
             - confidence: {confidence}\n\
             - causal_chain: {causal_chain}\n\
             - estimated_onset: {onset}\n\
             - affected_scope: {scope}\n\
             - supporting_evidence: {evidence:?}\n\
             - recommendations: {recommendations:?}\n\
             \n\
             Score each dimension and identify what needs improvement.",
            alert_summary = alert_summary,
            root_cause = response.root_cause.as_deref().unwrap_or("null"),
            confidence = response.confidence,
            causal_chain = response.causal_chain.join(" -> "),
            onset = response.estimated_onset.as_deref().unwrap_or("NOT PROVIDED"),
            scope = response.affected_scope.as_deref().unwrap_or("NOT PROVIDED"),
            evidence = response.supporting_evidence,
            recommendations = response.recommendations,
        );

        self.judge(prompt).await
    }
}
