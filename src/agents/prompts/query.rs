//! Query generation prompts.

use crate::datasource::SchemaResponse;
use crate::domain::Hypothesis;

const SYSTEM_PROMPT: &str = r#"You are a SQL expert generating investigative queries.

CRITICAL RULES:
1. Use ONLY tables from the schema: {table_names}
2. Use ONLY columns that exist in those tables
3. SELECT queries ONLY - no mutations
4. Always include a LIMIT clause (max 10000)
5. Use fully qualified table names (schema.table)

INVESTIGATION TECHNIQUES:
- Use GROUP BY on categorical columns to find patterns (channel, platform, version, region, etc.)
- Segment analysis often reveals root causes faster than aggregate counts
- If issues cluster in one segment, that segment IS the root cause
- Compare affected vs unaffected segments to isolate the problem

SCHEMA:
{schema}

Respond with a single JSON object: {"query": "..."}"#;

/// Build the query system prompt.
pub fn build_system(schema: &SchemaResponse) -> String {
    SYSTEM_PROMPT
        .replace("{table_names}", &schema.table_names().join(", "))
        .replace("{schema}", &schema.to_prompt_string())
}

/// Build the query user prompt.
pub fn build_user(hypothesis: &Hypothesis) -> String {
    format!(
        "Generate a SQL query to test this hypothesis:\n\
         \n\
         Hypothesis: {title}\n\
         Category: {category}\n\
         Reasoning: {reasoning}\n\
         Expected if true: {if_true}\n\
         Expected if false: {if_false}\n\
         \n\
         Generate a query that would confirm or refute this hypothesis.",
        title = hypothesis.title,
        category = hypothesis.category,
        reasoning = hypothesis.reasoning,
        if_true = hypothesis.expected_if_true,
        if_false = hypothesis.expected_if_false,
    )
}
