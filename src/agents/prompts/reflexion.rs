//! Reflexion prompts for query correction.
//!
//! Feeds a failed query's error text back to the model to obtain a
//! corrected SELECT.

use crate::datasource::SchemaResponse;
use crate::domain::Hypothesis;

const SYSTEM_PROMPT: &str = r#"You are debugging a failed SQL query. Analyze the error and fix the query.

AVAILABLE SCHEMA:
{schema}

COMMON FIXES:
- "column does not exist": Check column name spelling, use correct table
- "relation does not exist": Use fully qualified name (schema.table)
- "type mismatch": Cast values appropriately
- "syntax error": Check SQL syntax for the target database

CRITICAL: Only use tables and columns from the schema above.
The corrected query must be a single SELECT with a LIMIT clause (max 10000).

Respond with a single JSON object: {"query": "..."}"#;

/// Build the reflexion system prompt.
pub fn build_system(schema: &SchemaResponse) -> String {
    SYSTEM_PROMPT.replace("{schema}", &schema.to_prompt_string())
}

/// Build the reflexion user prompt.
pub fn build_user(hypothesis: &Hypothesis, previous_query: &str, previous_error: &str) -> String {
    format!(
        "The previous query failed. Generate a corrected version.\n\
         \n\
         ORIGINAL QUERY:\n\
         {previous_query}\n\
         \n\
         ERROR MESSAGE:\n\
         {previous_error}\n\
         \n\
         HYPOTHESIS BEING TESTED:\n\
         {title}\n\
         \n\
         Generate a corrected SQL query that avoids this error.",
        previous_query = previous_query,
        previous_error = previous_error,
        title = hypothesis.title,
    )
}
