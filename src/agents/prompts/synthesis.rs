//! Synthesis prompts for root cause determination.

use crate::domain::{AnomalyAlert, Evidence};

use super::metric_context;

const SYSTEM_PROMPT: &str = r#"You are synthesizing investigation findings to determine root cause.

CRITICAL: Your root cause MUST directly explain the specific metric anomaly.
- If the anomaly is "null_rate", the root cause must explain what caused NULL values
- If the anomaly is "row_count", the root cause must explain missing/extra records
- Do NOT suggest unrelated issues as root cause

REQUIRED FIELDS:

1. root_cause: The UPSTREAM cause, not the symptom (20+ chars, or null if inconclusive)
   - BAD: "NULL user_ids in orders table" (this is the symptom)
   - GOOD: "users ETL job timed out at 03:14 UTC due to API rate limiting"

2. confidence: Score from 0.0 to 1.0
   - 0.9+: Strong evidence with clear causation
   - 0.7-0.9: Good evidence, likely correct
   - 0.5-0.7: Some evidence, but uncertain
   - <0.5: Weak evidence, inconclusive (set root_cause to null)

3. causal_chain: Step-by-step list from root cause to observed symptom (2-6 steps)
   - Example: ["API rate limit hit", "users ETL job timeout", "users table stale after 03:14",
     "orders JOIN produces NULLs", "null_rate metric spikes"]
   - Each step must logically lead to the next

4. estimated_onset: When the issue started (timestamp or relative time)
   - Example: "03:14 UTC" or "approximately 6 hours ago" or "since 2024-01-15 batch"
   - Use evidence timestamps to determine this

5. affected_scope: Blast radius - what else is affected?
   - Example: "orders table, downstream_report_daily, customer_analytics dashboard"
   - Consider downstream tables, reports, and consumers

6. supporting_evidence: Specific evidence with data points (1-10 items)

7. recommendations: Actionable items with specific targets (1-5 items)
   - BAD: "Investigate the issue" or "Fix the data" (too vague)
   - GOOD: "Re-run stg_users job: airflow trigger_dag stg_users --backfill 2024-01-15"
   - GOOD: "Add NULL check constraint to orders.user_id column"
   - Name the specific jobs, tables, and commands involved

Respond with a single JSON object with exactly these fields."#;

/// Build the synthesis system prompt (static).
pub fn build_system() -> String {
    SYSTEM_PROMPT.to_string()
}

/// Build the synthesis user prompt.
pub fn build_user(alert: &AnomalyAlert, evidence: &[Evidence]) -> String {
    let evidence_text = if evidence.is_empty() {
        "(no evidence was collected; every query failed)".to_string()
    } else {
        evidence
            .iter()
            .map(|e| {
                let query_preview: String = e.query.chars().take(200).collect();
                format!(
                    "### Hypothesis: {id}\n\
                     - Query: {query}\n\
                     - Interpretation: {interpretation}\n\
                     - Confidence: {confidence}\n\
                     - Supports hypothesis: {supports:?}",
                    id = e.hypothesis_id,
                    query = query_preview,
                    interpretation = e.interpretation,
                    confidence = e.confidence,
                    supports = e.supports_hypothesis,
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    format!(
        "## Original Anomaly\n\
         - Dataset: {dataset}\n\
         - Metric: {metric} deviated by {deviation}%\n\
         - Anomaly Type: {anomaly_type}\n\
         - Expected: {expected}\n\
         - Actual: {actual}\n\
         - Date: {date}\n\
         \n\
         ## What Was Investigated\n\
         {metric_context}\n\
         \n\
         ## Investigation Findings\n\
         {evidence_text}\n\
         \n\
         Synthesize these findings into a root cause determination.",
        dataset = alert.dataset_id,
        metric = alert.metric_spec.display_name,
        deviation = alert.deviation_pct,
        anomaly_type = alert.anomaly_type,
        expected = alert.expected_value,
        actual = alert.actual_value,
        date = alert.anomaly_date,
        metric_context = metric_context(alert),
        evidence_text = evidence_text,
    )
}
