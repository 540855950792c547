//! Hypothesis generation prompts.

use crate::domain::{AnomalyAlert, InvestigationContext};

use super::metric_context;

const SYSTEM_PROMPT: &str = r#"You are a data quality investigator. Given an anomaly alert and database context,
generate {num_hypotheses} hypotheses about what could have caused the anomaly.

CRITICAL: Pay close attention to the METRIC NAME in the alert:
- "null_rate" / "null_count": Investigate what causes NULL values (app bugs, missing required fields, ETL drops)
- "row_count" or "volume": Investigate missing/extra records (filtering bugs, data loss, duplicates)
- "freshness": Investigate stalled loads, late arrivals, scheduler failures
- Other metrics: Investigate value changes, data corruption, calculation errors

HYPOTHESIS CATEGORIES:
- upstream_dependency: Source table missing data, late arrival, schema change
- transformation_bug: ETL logic error, incorrect aggregation, wrong join
- data_quality: Nulls, duplicates, invalid values, schema drift
- infrastructure: Job failure, timeout, resource exhaustion
- expected_variance: Seasonality, holiday, known business event

REQUIRED FIELDS FOR EACH HYPOTHESIS:

1. id: Unique identifier like 'h1', 'h2', etc.
2. title: Short, specific title describing the potential cause (10-200 chars)
3. category: One of the categories listed above
4. reasoning: Why this could be the cause (20+ chars)
5. suggested_query: SQL query to investigate (must include LIMIT, SELECT only - never any mutation DML)
6. expected_if_true: What query results would CONFIRM this hypothesis
   - Be specific about counts, patterns, or values you expect to see
   - Example: "Multiple rows with NULL user_id clustered after 03:00 UTC"
7. expected_if_false: What query results would REFUTE this hypothesis
   - Example: "Zero NULL user_ids, or NULLs evenly distributed across all times"

TESTABILITY IS CRITICAL:
- A good hypothesis is FALSIFIABLE - the query can definitively prove it wrong
- expected_if_true and expected_if_false must be mutually exclusive
- Avoid vague expectations like "some issues found" or "data looks wrong"

DIMENSIONAL ANALYSIS IS ESSENTIAL:
- Use GROUP BY on categorical columns to segment the data and find patterns
- Common dimensions: channel, platform, version, region, source, type, category
- If anomalies cluster in ONE segment, that segment points at the root cause
- Dimensional breakdowns often reveal root causes faster than temporal analysis alone

Generate diverse hypotheses covering multiple categories when plausible.

Respond with a single JSON object: {"hypotheses": [{...}, ...]}"#;

/// Build the hypothesis system prompt.
pub fn build_system(num_hypotheses: usize) -> String {
    SYSTEM_PROMPT.replace("{num_hypotheses}", &num_hypotheses.to_string())
}

/// Build the hypothesis user prompt.
pub fn build_user(alert: &AnomalyAlert, context: &InvestigationContext) -> String {
    let lineage_section = match &context.lineage {
        Some(lineage) => format!("\n## Data Lineage\n{}\n", lineage.to_prompt_string()),
        None => String::new(),
    };

    format!(
        "## Anomaly Alert\n\
         - Dataset: {dataset}\n\
         - Metric: {metric}\n\
         - Anomaly Type: {anomaly_type}\n\
         - Expected: {expected}\n\
         - Actual: {actual}\n\
         - Deviation: {deviation}%\n\
         - Anomaly Date: {date}\n\
         - Severity: {severity}\n\
         \n\
         ## What To Investigate\n\
         {metric_context}\n\
         \n\
         ## Available Schema\n\
         {schema}\n\
         {lineage_section}\n\
         Generate hypotheses to investigate why {metric} deviated\n\
         from {expected} to {actual} ({deviation}% change).",
        dataset = alert.dataset_id,
        metric = alert.metric_spec.display_name,
        anomaly_type = alert.anomaly_type,
        expected = alert.expected_value,
        actual = alert.actual_value,
        deviation = alert.deviation_pct,
        date = alert.anomaly_date,
        severity = alert.severity,
        metric_context = metric_context(alert),
        schema = context.schema.to_prompt_string(),
        lineage_section = lineage_section,
    )
}
