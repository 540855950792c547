//! Quality validation and training-signal capture.

mod assessment;
mod judge;

pub use assessment::{
    QualityAssessment, ValidationResult, ACTIONABILITY_WEIGHT, CAUSAL_DEPTH_WEIGHT,
    SPECIFICITY_WEIGHT,
};
pub use judge::{LlmJudgeValidator, QualityValidator, DEFAULT_PASS_THRESHOLD};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::Result;

/// What kind of LLM output a training signal was captured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Interpretation,
    Synthesis,
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interpretation => write!(f, "interpretation"),
            Self::Synthesis => write!(f, "synthesis"),
        }
    }
}

/// One captured training signal: the judged output plus its scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSignal {
    pub signal_type: SignalType,
    pub tenant_id: Uuid,
    pub investigation_id: String,
    /// What the model was given (hypothesis title, query, alert summary...).
    pub input_context: serde_json::Value,
    /// The model output that was judged.
    pub output_response: serde_json::Value,
    pub automated_score: f64,
    pub automated_dimensions: HashMap<String, f64>,
}

/// Sink for captured training signals.
///
/// Recording is fire-and-forget from the orchestrator's perspective; a
/// failing sink never affects the investigation.
#[async_trait]
pub trait TrainingSignalSink: Send + Sync {
    async fn record_signal(&self, signal: TrainingSignal) -> Result<()>;
}
