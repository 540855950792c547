//! Core domain values for root-cause investigations.
//!
//! Everything in this module is an immutable value: constructed whole,
//! cloned freely, never mutated in place. The orchestrator threads these
//! through the workflow; adapters and the agent layer only ever read them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::datasource::SchemaResponse;

/// What kind of metric is anomalous.
///
/// The variant drives prompt framing: a bare column gets NULL/join/filter
/// focus, a SQL expression gets input-column focus, a dbt metric gets
/// upstream-model focus, and a free-text description is matched against the
/// schema by the model itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "metric_type", rename_all = "snake_case")]
pub enum MetricKind {
    Column {
        name: String,
    },
    SqlExpression {
        sql: String,
        #[serde(default)]
        columns_referenced: Vec<String>,
    },
    DbtMetric {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_url: Option<String>,
    },
    Description {
        text: String,
    },
}

/// Specification of the anomalous metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    #[serde(flatten)]
    pub kind: MetricKind,
    /// Human-readable name for logs and prompts.
    pub display_name: String,
}

impl MetricSpec {
    /// Convenience constructor for simple column metrics.
    pub fn from_column(column_name: impl Into<String>) -> Self {
        let name = column_name.into();
        Self {
            display_name: name.clone(),
            kind: MetricKind::Column { name },
        }
    }

    /// Convenience constructor for SQL expression metrics.
    pub fn from_sql(
        sql: impl Into<String>,
        display_name: impl Into<String>,
        columns: Vec<String>,
    ) -> Self {
        Self {
            kind: MetricKind::SqlExpression {
                sql: sql.into(),
                columns_referenced: columns,
            },
            display_name: display_name.into(),
        }
    }

    /// Convenience constructor for named dbt/metric-layer metrics.
    pub fn from_dbt_metric(name: impl Into<String>, source_url: Option<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            kind: MetricKind::DbtMetric { name, source_url },
        }
    }

    /// Convenience constructor for free-text descriptions.
    pub fn from_description(
        text: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            kind: MetricKind::Description { text: text.into() },
            display_name: display_name.into(),
        }
    }

    /// Stable tag for the metric kind, used in logs and prompts.
    pub fn metric_type(&self) -> &'static str {
        match &self.kind {
            MetricKind::Column { .. } => "column",
            MetricKind::SqlExpression { .. } => "sql_expression",
            MetricKind::DbtMetric { .. } => "dbt_metric",
            MetricKind::Description { .. } => "description",
        }
    }

    /// The underlying metric expression (column name, SQL, metric name, or
    /// description text).
    pub fn expression(&self) -> &str {
        match &self.kind {
            MetricKind::Column { name } => name,
            MetricKind::SqlExpression { sql, .. } => sql,
            MetricKind::DbtMetric { name, .. } => name,
            MetricKind::Description { text } => text,
        }
    }
}

/// Input: the anomaly that triggered the investigation.
///
/// This system performs root cause analysis, not anomaly detection. The
/// upstream detector supplies this structured alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyAlert {
    /// The affected table in "schema.table_name" format.
    pub dataset_id: String,
    pub metric_spec: MetricSpec,
    /// What kind of anomaly: null_rate, row_count, freshness, custom, etc.
    pub anomaly_type: String,
    pub expected_value: f64,
    pub actual_value: f64,
    pub deviation_pct: f64,
    /// Date of the anomaly in "YYYY-MM-DD" format.
    pub anomaly_date: String,
    pub severity: String,
    /// Origin system (monte_carlo, great_expectations, dbt, etc.).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_alert_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// Categories of potential root causes for anomalies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HypothesisCategory {
    UpstreamDependency,
    TransformationBug,
    DataQuality,
    Infrastructure,
    ExpectedVariance,
}

impl std::fmt::Display for HypothesisCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::UpstreamDependency => "upstream_dependency",
            Self::TransformationBug => "transformation_bug",
            Self::DataQuality => "data_quality",
            Self::Infrastructure => "infrastructure",
            Self::ExpectedVariance => "expected_variance",
        };
        write!(f, "{}", s)
    }
}

/// A potential explanation for the anomaly.
///
/// `expected_if_true` and `expected_if_false` form the testability contract:
/// mutually exclusive statements of what query results would confirm or
/// refute the hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    /// Unique within the investigation (e.g. "h1").
    pub id: String,
    /// Short descriptive title (10-200 chars).
    pub title: String,
    pub category: HypothesisCategory,
    /// Why this could be the cause (20+ chars).
    pub reasoning: String,
    /// Initial SQL to investigate. SELECT-only, must carry a row limit.
    pub suggested_query: String,
    /// What query results would confirm this hypothesis.
    pub expected_if_true: String,
    /// What query results would refute this hypothesis.
    pub expected_if_false: String,
}

/// Result of executing one query to test one hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub hypothesis_id: String,
    /// The exact SQL that ran.
    pub query: String,
    /// Truncated/sampled results for display and prompts.
    pub result_summary: String,
    pub row_count: u64,
    /// True if the evidence supports the hypothesis, false if it refutes,
    /// None if inconclusive. Finding the predicted anomaly means "supports",
    /// not "bad".
    pub supports_hypothesis: Option<bool>,
    /// Confidence score in [0, 1].
    pub confidence: f64,
    /// What the results reveal about the root cause.
    pub interpretation: String,
    /// Trigger -> mechanism -> timeline narrative, when identified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causal_chain: Option<String>,
    /// The specific upstream change that caused the symptom.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_identified: Option<String>,
    /// What in the data points to this hypothesis over alternatives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub differentiating_evidence: Option<String>,
    /// Specific findings with data points (counts, timestamps, names).
    #[serde(default)]
    pub key_findings: Vec<String>,
    /// Suggested follow-up query when the trigger is not yet pinned down.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_investigation_step: Option<String>,
}

impl Evidence {
    /// Low-confidence placeholder produced when interpretation itself fails.
    /// Keeps one broken interpretation from aborting the whole run.
    pub fn interpretation_failed(
        hypothesis_id: impl Into<String>,
        query: impl Into<String>,
        result_summary: impl Into<String>,
        row_count: u64,
        error: &str,
    ) -> Self {
        Self {
            hypothesis_id: hypothesis_id.into(),
            query: query.into(),
            result_summary: result_summary.into(),
            row_count,
            supports_hypothesis: None,
            confidence: 0.3,
            interpretation: format!("Interpretation failed: {}", error),
            causal_chain: None,
            trigger_identified: None,
            differentiating_evidence: None,
            key_findings: Vec::new(),
            next_investigation_step: None,
        }
    }
}

/// Final status of an investigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    Completed,
    Inconclusive,
    Failed,
}

impl std::fmt::Display for FindingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::Inconclusive => "inconclusive",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// The final output of an investigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub investigation_id: String,
    pub status: FindingStatus,
    /// The upstream cause, if determined. None means inconclusive.
    pub root_cause: Option<String>,
    pub confidence: f64,
    pub evidence: Vec<Evidence>,
    pub recommendations: Vec<String>,
    pub duration_seconds: f64,
    /// Step-by-step chain from root cause to observed symptom (2-6 steps).
    #[serde(default)]
    pub causal_chain: Vec<String>,
    /// When the issue started, from evidence timestamps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_onset: Option<String>,
    /// Blast radius: downstream tables, reports, consumers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_scope: Option<String>,
}

impl Finding {
    /// Partial finding returned when the circuit breaker stops the run.
    pub fn safety_stop(investigation_id: impl Into<String>, duration_seconds: f64) -> Self {
        Self {
            investigation_id: investigation_id.into(),
            status: FindingStatus::Failed,
            root_cause: None,
            confidence: 0.0,
            evidence: Vec::new(),
            recommendations: vec!["Investigation was stopped due to safety limits".to_string()],
            duration_seconds,
            causal_chain: Vec::new(),
            estimated_onset: None,
            affected_scope: None,
        }
    }
}

/// Upstream and downstream dependencies for a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageContext {
    /// The target table being investigated.
    pub target: String,
    /// Tables that feed into the target.
    pub upstream: Vec<String>,
    /// Tables that depend on the target.
    pub downstream: Vec<String>,
}

impl LineageContext {
    /// Format lineage for an LLM prompt.
    pub fn to_prompt_string(&self) -> String {
        let mut lines = vec![format!("TARGET TABLE: {}", self.target)];

        if !self.upstream.is_empty() {
            lines.push("\nUPSTREAM DEPENDENCIES (data flows FROM these):".to_string());
            for t in &self.upstream {
                lines.push(format!("  - {}", t));
            }
        }

        if !self.downstream.is_empty() {
            lines.push("\nDOWNSTREAM DEPENDENCIES (data flows TO these):".to_string());
            for t in &self.downstream {
                lines.push(format!("  - {}", t));
            }
        }

        lines.join("\n")
    }
}

/// Combined context for an investigation: schema plus optional lineage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationContext {
    pub schema: SchemaResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineage: Option<LineageContext>,
}
