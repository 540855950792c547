//! Prompt builders for the investigation agents.
//!
//! Each module exposes `build_system`/`build_user` pairs. Structured-output
//! instructions live here too: every agent call asks for a single JSON
//! object and the client enforces the shape with retries.

pub mod hypothesis;
pub mod interpretation;
pub mod query;
pub mod reflexion;
pub mod synthesis;

use crate::domain::{AnomalyAlert, MetricKind};

/// Frame the metric for the model based on what kind of metric it is.
///
/// Shared by the hypothesis and synthesis user prompts.
pub(crate) fn metric_context(alert: &AnomalyAlert) -> String {
    let spec = &alert.metric_spec;
    match &spec.kind {
        MetricKind::Column { name } => format!(
            "The anomaly is on column `{name}` in table `{dataset}`.\n\
             Investigate why this column's {anomaly_type} changed.\n\
             Focus on: NULL introduction, upstream joins, filtering changes, application bugs.\n\
             All hypotheses MUST focus on the `{name}` column specifically.",
            name = name,
            dataset = alert.dataset_id,
            anomaly_type = alert.anomaly_type,
        ),
        MetricKind::SqlExpression {
            sql,
            columns_referenced,
        } => {
            let cols = if columns_referenced.is_empty() {
                "unknown".to_string()
            } else {
                columns_referenced.join(", ")
            };
            format!(
                "The anomaly is on a computed metric: {sql}\n\
                 This expression references columns: {cols}\n\
                 Investigate why this calculation's result changed.\n\
                 Focus on: input column changes, expression logic errors, upstream data shifts."
            )
        }
        MetricKind::DbtMetric { name, source_url } => {
            let url_info = match source_url {
                Some(url) => format!("\nDefinition: {}", url),
                None => String::new(),
            };
            format!(
                "The anomaly is on dbt metric `{name}`.{url_info}\n\
                 Investigate the metric's upstream models and their data quality.\n\
                 Focus on: upstream model failures, source data changes, metric definition issues."
            )
        }
        MetricKind::Description { text } => format!(
            "The anomaly is described as: {text}\n\
             This is a free-text description. Infer which columns/tables are involved\n\
             from the schema and investigate accordingly.\n\
             Focus on: matching the description to actual schema elements."
        ),
    }
}
