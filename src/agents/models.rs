//! Structured-output response models for the agent operations.
//!
//! Each agent call prompts for a single JSON object matching one of these
//! shapes. `extract_json` pulls the object out of raw model output (models
//! wrap JSON in fences or prose more often than not); deserialization plus
//! the `validate` hooks enforce the contract before anything reaches the
//! orchestrator.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::domain::{Hypothesis, HypothesisCategory};
use crate::error::{Error, Result};

/// Pull the first balanced JSON object out of raw model output.
///
/// Handles bare objects, ```json fences, and leading/trailing prose. String
/// literals are tracked so braces inside them do not unbalance the scan.
pub fn extract_json(raw: &str) -> Result<Value> {
    let text = raw.trim();

    // Fenced block first: take what's between the fences.
    let candidate = if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        match after.find("```") {
            Some(end) => after[..end].trim(),
            None => after.trim(),
        }
    } else {
        text
    };

    let bytes = candidate.as_bytes();
    let open = candidate
        .find('{')
        .ok_or_else(|| Error::llm("no JSON object in model output", false))?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let object = &candidate[open..=i];
                    return serde_json::from_str(object).map_err(|e| {
                        Error::llm(format!("invalid JSON in model output: {}", e), false)
                    });
                }
            }
            _ => {}
        }
    }

    Err(Error::llm("unbalanced JSON object in model output", false))
}

/// One hypothesis as drafted by the model, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypothesisDraft {
    pub id: String,
    pub title: String,
    pub category: HypothesisCategory,
    pub reasoning: String,
    pub suggested_query: String,
    #[serde(default)]
    pub expected_if_true: String,
    #[serde(default)]
    pub expected_if_false: String,
}

impl HypothesisDraft {
    /// Check the required-field contract. Returns the reason a draft is
    /// unusable, or None when it passes.
    fn rejection_reason(&self) -> Option<&'static str> {
        if self.id.trim().is_empty() {
            return Some("empty id");
        }
        if self.title.len() < 10 || self.title.len() > 200 {
            return Some("title out of range (10-200 chars)");
        }
        if self.reasoning.len() < 20 {
            return Some("reasoning too short (20+ chars)");
        }
        if self.suggested_query.trim().is_empty() {
            return Some("empty suggested_query");
        }
        if self.expected_if_true.trim().is_empty() || self.expected_if_false.trim().is_empty() {
            return Some("missing testability clauses");
        }
        None
    }
}

/// Hypothesis generation output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypothesesResponse {
    pub hypotheses: Vec<HypothesisDraft>,
}

impl HypothesesResponse {
    /// Drop drafts that fail validation and convert the rest.
    pub fn into_valid_hypotheses(self) -> Vec<Hypothesis> {
        self.hypotheses
            .into_iter()
            .filter_map(|draft| match draft.rejection_reason() {
                Some(reason) => {
                    warn!(id = %draft.id, reason, "dropping invalid hypothesis draft");
                    None
                }
                None => Some(Hypothesis {
                    id: draft.id,
                    title: draft.title,
                    category: draft.category,
                    reasoning: draft.reasoning,
                    suggested_query: draft.suggested_query,
                    expected_if_true: draft.expected_if_true,
                    expected_if_false: draft.expected_if_false,
                }),
            })
            .collect()
    }
}

/// Query generation output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub query: String,
}

/// Evidence interpretation output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpretationResponse {
    /// True if evidence supports, false if it refutes, null if inconclusive.
    pub supports_hypothesis: Option<bool>,
    pub confidence: f64,
    pub interpretation: String,
    #[serde(default)]
    pub causal_chain: Option<String>,
    #[serde(default)]
    pub trigger_identified: Option<String>,
    #[serde(default)]
    pub differentiating_evidence: Option<String>,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub next_investigation_step: Option<String>,
}

impl InterpretationResponse {
    /// Contract check: confidence in range; a follow-up step is required
    /// when confidence is low or no trigger was identified.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::llm(
                format!("interpretation confidence out of range: {}", self.confidence),
                false,
            ));
        }
        let needs_next_step = self.confidence < 0.8 || self.trigger_identified.is_none();
        if needs_next_step && self.next_investigation_step.is_none() {
            return Err(Error::llm(
                "interpretation missing next_investigation_step despite low confidence or no trigger",
                false,
            ));
        }
        Ok(())
    }
}

/// Synthesis output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisResponse {
    /// The upstream cause, or null when inconclusive.
    pub root_cause: Option<String>,
    pub confidence: f64,
    #[serde(default)]
    pub causal_chain: Vec<String>,
    #[serde(default)]
    pub estimated_onset: Option<String>,
    #[serde(default)]
    pub affected_scope: Option<String>,
    #[serde(default)]
    pub supporting_evidence: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl SynthesisResponse {
    /// Contract check: confidence in range, causal chain length when a root
    /// cause is named, recommendation count bounds.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::llm(
                format!("synthesis confidence out of range: {}", self.confidence),
                false,
            ));
        }
        if self.root_cause.is_some() {
            if !(2..=6).contains(&self.causal_chain.len()) {
                return Err(Error::llm(
                    format!(
                        "causal chain must have 2-6 steps, got {}",
                        self.causal_chain.len()
                    ),
                    false,
                ));
            }
            if !(1..=10).contains(&self.supporting_evidence.len()) {
                return Err(Error::llm(
                    format!(
                        "expected 1-10 supporting evidence items, got {}",
                        self.supporting_evidence.len()
                    ),
                    false,
                ));
            }
            if self.confidence < 0.5 {
                return Err(Error::llm(
                    "root cause named but confidence below 0.5",
                    false,
                ));
            }
        }
        if self.recommendations.is_empty() || self.recommendations.len() > 5 {
            return Err(Error::llm(
                format!("expected 1-5 recommendations, got {}", self.recommendations.len()),
                false,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn valid_draft() -> HypothesisDraft {
        HypothesisDraft {
            id: "h1".to_string(),
            title: "Upstream users ETL stalled".to_string(),
            category: HypothesisCategory::UpstreamDependency,
            reasoning: "The stg_users table feeds the join that produces user_id".to_string(),
            suggested_query: "SELECT count(*) FROM sales.stg_users LIMIT 1".to_string(),
            expected_if_true: "Zero rows loaded after 03:00 UTC".to_string(),
            expected_if_false: "Normal row volume through the day".to_string(),
        }
    }

    #[test]
    fn test_extract_bare_json() {
        let value = extract_json(r#"{"query": "SELECT 1 LIMIT 1"}"#).unwrap();
        assert_eq!(value["query"], "SELECT 1 LIMIT 1");
    }

    #[test]
    fn test_extract_fenced_json() {
        let raw = "Here is the query:\n```json\n{\"query\": \"SELECT 1 LIMIT 1\"}\n```\nDone.";
        let value = extract_json(raw).unwrap();
        assert_eq!(value["query"], "SELECT 1 LIMIT 1");
    }

    #[test]
    fn test_extract_json_with_prose_prefix() {
        let raw = "Sure! {\"confidence\": 0.9, \"note\": \"braces {inside} strings\"} trailing";
        let value = extract_json(raw).unwrap();
        assert_eq!(value["confidence"], 0.9);
        assert_eq!(value["note"], "braces {inside} strings");
    }

    #[test]
    fn test_extract_json_failure_is_non_retryable_llm_error() {
        let err = extract_json("no json here at all").unwrap_err();
        assert!(matches!(err, Error::Llm { retryable: false, .. }));
    }

    #[test]
    fn test_valid_draft_converts() {
        let response = HypothesesResponse {
            hypotheses: vec![valid_draft()],
        };
        let hypotheses = response.into_valid_hypotheses();
        assert_eq!(hypotheses.len(), 1);
        assert_eq!(hypotheses[0].id, "h1");
    }

    #[test]
    fn test_invalid_drafts_are_dropped() {
        let mut short_title = valid_draft();
        short_title.title = "too short".to_string();
        let mut no_testability = valid_draft();
        no_testability.expected_if_true = String::new();

        let response = HypothesesResponse {
            hypotheses: vec![short_title, valid_draft(), no_testability],
        };
        assert_eq!(response.into_valid_hypotheses().len(), 1);
    }

    #[test]
    fn test_interpretation_requires_next_step_when_low_confidence() {
        let response: InterpretationResponse = serde_json::from_value(json!({
            "supports_hypothesis": true,
            "confidence": 0.6,
            "interpretation": "NULLs cluster after 03:14",
            "trigger_identified": "ETL stall at 03:14",
        }))
        .unwrap();
        assert!(response.validate().is_err());
    }

    #[test]
    fn test_interpretation_high_confidence_with_trigger_passes() {
        let response: InterpretationResponse = serde_json::from_value(json!({
            "supports_hypothesis": true,
            "confidence": 0.92,
            "interpretation": "NULLs began exactly at 03:14 UTC",
            "trigger_identified": "stg_users job failure at 03:14",
        }))
        .unwrap();
        assert!(response.validate().is_ok());
    }

    #[test]
    fn test_synthesis_chain_length_enforced_with_root_cause() {
        let response: SynthesisResponse = serde_json::from_value(json!({
            "root_cause": "stg_users ETL job stalled at 03:14 UTC",
            "confidence": 0.88,
            "causal_chain": ["only one step"],
            "recommendations": ["Re-run stg_users backfill"],
        }))
        .unwrap();
        assert!(response.validate().is_err());
    }

    #[test]
    fn test_synthesis_inconclusive_skips_chain_check() {
        let response: SynthesisResponse = serde_json::from_value(json!({
            "root_cause": null,
            "confidence": 0.4,
            "causal_chain": [],
            "recommendations": ["Collect ETL job logs for the anomaly window"],
        }))
        .unwrap();
        assert!(response.validate().is_ok());
    }
}
