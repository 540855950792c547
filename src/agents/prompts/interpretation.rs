//! Evidence interpretation prompts.

use crate::datasource::QueryResult;
use crate::domain::Hypothesis;

const SYSTEM_PROMPT: &str = r#"You are analyzing query results to determine if they support a hypothesis.

CRITICAL - Understanding "supports hypothesis":
- If investigating NULLs and the query FINDS NULLs -> supports=true (we found the problem)
- If investigating NULLs and the query finds NO NULLs -> supports=false (not the cause)
- "Supports" means the evidence helps explain the anomaly, NOT that the situation is good

IMPORTANT: Do not just confirm that the symptom exists. Your job is to:
1. Identify the TRIGGER (what specific change caused this?)
2. Explain the MECHANISM (how did that trigger lead to this symptom?)
3. Provide the TIMELINE (when did each step in the causal chain occur?)

If you cannot identify a specific trigger from the data, say so and suggest
what additional query would help find it.

BAD interpretation: "The results confirm NULL user_ids appeared on Jan 10,
suggesting an ETL failure."

GOOD interpretation: "The NULLs began at exactly 03:14 UTC on Jan 10, which
correlates with the users ETL job's last successful run at 03:12 UTC. The
2-minute gap and sudden onset suggest the job failed mid-execution."

REQUIRED FIELDS:
1. supports_hypothesis: true if evidence supports, false if refutes, null if inconclusive
2. confidence: Score from 0.0 to 1.0
3. interpretation: What the results reveal about the ROOT CAUSE, not just the symptom
4. causal_chain: MUST include (1) TRIGGER, (2) MECHANISM, (3) TIMELINE
   - BAD: "ETL job failed causing NULLs"
   - GOOD: "API rate limit at 03:14 UTC -> users ETL timeout -> stale table -> JOIN NULLs"
5. trigger_identified: The specific trigger (API error, deploy, config change, etc.)
   - Leave null if it cannot be identified from the data, but then next_investigation_step is REQUIRED
   - BAD: "data corruption", "infrastructure failure" (too vague)
   - GOOD: "API returned 429 at 03:14", "deploy of commit abc123"
6. differentiating_evidence: What in the data points to THIS hypothesis over alternatives?
   - Leave null if no differentiating evidence was found
7. key_findings: Specific findings with data points (counts, timestamps, table names)
8. next_investigation_step: REQUIRED if confidence < 0.8 OR trigger_identified is null
   - What specific query would help identify the trigger?

Be objective and base your assessment solely on the data returned.

Respond with a single JSON object with exactly these fields."#;

/// Build the interpretation system prompt (static).
pub fn build_system() -> String {
    SYSTEM_PROMPT.to_string()
}

/// Build the interpretation user prompt.
pub fn build_user(hypothesis: &Hypothesis, query: &str, results: &QueryResult) -> String {
    format!(
        "HYPOTHESIS: {title}\n\
         REASONING: {reasoning}\n\
         EXPECTED IF TRUE: {if_true}\n\
         EXPECTED IF FALSE: {if_false}\n\
         \n\
         QUERY EXECUTED:\n\
         {query}\n\
         \n\
         RESULTS ({row_count} rows):\n\
         {summary}\n\
         \n\
         Analyze whether these results support or refute the hypothesis.",
        title = hypothesis.title,
        reasoning = hypothesis.reasoning,
        if_true = hypothesis.expected_if_true,
        if_false = hypothesis.expected_if_false,
        query = query,
        row_count = results.row_count,
        summary = results.to_summary(),
    )
}
