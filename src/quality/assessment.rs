//! Quality assessment types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};

/// Dimensional weights used by the judge rubric.
pub const CAUSAL_DEPTH_WEIGHT: f64 = 0.5;
pub const SPECIFICITY_WEIGHT: f64 = 0.3;
pub const ACTIONABILITY_WEIGHT: f64 = 0.2;

/// Dimensional quality scores for one validated LLM output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    /// Trigger + mechanism + timeline completeness (weight 0.5).
    pub causal_depth: f64,
    /// Counts, timestamps, named tables/columns (weight 0.3).
    pub specificity: f64,
    /// Whether recommendations name specific jobs/tables/commands (weight 0.2).
    pub actionability: f64,
    /// Weighted composite, including the differentiation adjustment.
    pub composite_score: f64,
    /// Name of the weakest dimension.
    pub lowest_dimension: String,
    /// Concrete advice for improving the weakest dimension (20+ chars).
    pub improvement_suggestion: String,
}

impl QualityAssessment {
    /// Contract check on the judge's output.
    pub fn validate(&self) -> Result<()> {
        for (name, score) in [
            ("causal_depth", self.causal_depth),
            ("specificity", self.specificity),
            ("actionability", self.actionability),
            ("composite_score", self.composite_score),
        ] {
            if !(0.0..=1.0).contains(&score) {
                return Err(Error::llm(
                    format!("assessment {} out of range: {}", name, score),
                    false,
                ));
            }
        }
        if self.improvement_suggestion.len() < 20 {
            return Err(Error::llm(
                "improvement_suggestion too short (20+ chars required)",
                false,
            ));
        }
        Ok(())
    }

    /// The weighted composite implied by the dimensional scores, before any
    /// differentiation adjustment.
    pub fn weighted_composite(&self) -> f64 {
        self.causal_depth * CAUSAL_DEPTH_WEIGHT
            + self.specificity * SPECIFICITY_WEIGHT
            + self.actionability * ACTIONABILITY_WEIGHT
    }

    /// Dimensional breakdown as a flat map; this becomes the training
    /// signal.
    pub fn training_signals(&self) -> HashMap<String, f64> {
        HashMap::from([
            ("causal_depth".to_string(), self.causal_depth),
            ("specificity".to_string(), self.specificity),
            ("actionability".to_string(), self.actionability),
            ("composite_score".to_string(), self.composite_score),
        ])
    }
}

/// Outcome of validating one LLM output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Whether the composite met the pass threshold.
    pub passed: bool,
    pub assessment: QualityAssessment,
}
