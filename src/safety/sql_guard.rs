//! Read-only SQL preflight validation.
//!
//! Every query the agent generates passes through this guard before it
//! reaches a data-source adapter: single SELECT statement, no mutation
//! tokens, LIMIT present (injected when missing, clamped to the cap).
//! Rejections surface as query failures and feed the reflexion loop.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{Error, Result};

/// Hard cap on LIMIT values the guard will let through.
pub const MAX_ROW_LIMIT: u64 = 10_000;

/// Default LIMIT injected when a query has none.
pub const DEFAULT_ROW_LIMIT: u64 = 1_000;

const FORBIDDEN_TOKENS: &[&str] = &[
    "DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "TRUNCATE", "GRANT", "CREATE", "MERGE",
];

fn forbidden_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(r"(?i)\b({})\b", FORBIDDEN_TOKENS.join("|"));
        Regex::new(&pattern).expect("forbidden token pattern is valid")
    })
}

fn limit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bLIMIT\s+(\d+)\b").expect("limit pattern is valid"))
}

/// Preflight validator for generated SQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlGuard;

impl SqlGuard {
    pub fn new() -> Self {
        Self
    }

    /// Validate a query, returning the (possibly rewritten) SQL to execute.
    ///
    /// Rewrites are limited to appending a LIMIT clause when none is present
    /// and clamping an oversized one; the statement itself is never altered.
    pub fn validate(&self, sql: &str) -> Result<String> {
        let trimmed = sql.trim().trim_end_matches(';').trim();

        if trimmed.is_empty() {
            return Err(Error::QueryRejected("empty query".to_string()));
        }

        // Single statement only: an interior semicolon means a second one.
        if trimmed.contains(';') {
            return Err(Error::QueryRejected(
                "multiple statements are not allowed".to_string(),
            ));
        }

        let upper = trimmed.to_uppercase();
        if !(upper.starts_with("SELECT") || upper.starts_with("WITH")) {
            return Err(Error::QueryRejected(
                "only SELECT statements are allowed".to_string(),
            ));
        }

        let without_literals = strip_string_literals(trimmed);
        if let Some(m) = forbidden_re().find(&without_literals) {
            return Err(Error::QueryRejected(format!(
                "forbidden statement token: {}",
                m.as_str().to_uppercase()
            )));
        }

        match limit_re().captures(&without_literals) {
            Some(caps) => {
                let value: u64 = caps[1].parse().unwrap_or(u64::MAX);
                if value > MAX_ROW_LIMIT {
                    // Clamp in place on the original text.
                    let clamped = limit_re()
                        .replace(trimmed, format!("LIMIT {}", MAX_ROW_LIMIT).as_str())
                        .into_owned();
                    Ok(clamped)
                } else {
                    Ok(trimmed.to_string())
                }
            }
            None => Ok(format!("{} LIMIT {}", trimmed, DEFAULT_ROW_LIMIT)),
        }
    }
}

/// Replace single-quoted literal contents so token scanning cannot be fooled
/// by strings like 'DROP'.
fn strip_string_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_literal = false;
    for c in sql.chars() {
        match c {
            '\'' => {
                in_literal = !in_literal;
                out.push(c);
            }
            _ if in_literal => out.push(' '),
            _ => out.push(c),
        }
    }
    out
}
