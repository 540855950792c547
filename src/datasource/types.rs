//! Types shared by all data-source adapters.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Normalized column types across all source dialects.
///
/// Adapters map their native types onto this closed set so prompts and
/// downstream logic never see dialect-specific names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    String,
    Integer,
    Float,
    Decimal,
    Boolean,
    Date,
    Datetime,
    Time,
    Timestamp,
    Binary,
    Json,
    Array,
    Map,
    Struct,
    Unknown,
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Datetime => "datetime",
            Self::Time => "time",
            Self::Timestamp => "timestamp",
            Self::Binary => "binary",
            Self::Json => "json",
            Self::Array => "array",
            Self::Map => "map",
            Self::Struct => "struct",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Typed error codes surfaced by adapters.
///
/// The orchestrator treats every code identically, as a non-terminal query
/// failure that feeds the reflexion loop. The code exists for logging and
/// for entrypoint layers that want to present specific guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdapterErrorCode {
    ConnectionFailed,
    AuthenticationFailed,
    QuerySyntaxError,
    QueryTimeout,
    AccessDenied,
    RateLimited,
    SchemaFetchFailed,
    NotImplemented,
    InternalError,
}

impl std::fmt::Display for AdapterErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::AuthenticationFailed => "AUTHENTICATION_FAILED",
            Self::QuerySyntaxError => "QUERY_SYNTAX_ERROR",
            Self::QueryTimeout => "QUERY_TIMEOUT",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::RateLimited => "RATE_LIMITED",
            Self::SchemaFetchFailed => "SCHEMA_FETCH_FAILED",
            Self::NotImplemented => "NOT_IMPLEMENTED",
            Self::InternalError => "INTERNAL_ERROR",
        };
        write!(f, "{}", s)
    }
}

/// A column in a query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryColumn {
    pub name: String,
    pub data_type: ColumnType,
}

/// Result of an executed query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<QueryColumn>,
    /// Rows as name -> value maps.
    pub rows: Vec<serde_json::Map<String, Value>>,
    pub row_count: u64,
    /// Whether rows were cut off at the adapter's row cap.
    #[serde(default)]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
}

impl QueryResult {
    /// An empty result (zero rows, no columns).
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            truncated: false,
            execution_time_ms: None,
        }
    }

    /// Compact rendering of the result for LLM prompts: column header plus
    /// the first `SUMMARY_ROWS` rows, with a truncation note.
    pub fn to_summary(&self) -> String {
        const SUMMARY_ROWS: usize = 20;

        if self.rows.is_empty() {
            return "(no rows returned)".to_string();
        }

        let header = self
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(" | ");

        let mut lines = vec![header];
        for row in self.rows.iter().take(SUMMARY_ROWS) {
            let rendered = self
                .columns
                .iter()
                .map(|c| match row.get(&c.name) {
                    Some(Value::Null) | None => "NULL".to_string(),
                    Some(Value::String(s)) => s.clone(),
                    Some(v) => v.to_string(),
                })
                .collect::<Vec<_>>()
                .join(" | ");
            lines.push(rendered);
        }

        if self.rows.len() > SUMMARY_ROWS {
            lines.push(format!(
                "... ({} more rows not shown)",
                self.rows.len() - SUMMARY_ROWS
            ));
        }
        if self.truncated {
            lines.push("(result truncated at adapter row cap)".to_string());
        }

        lines.join("\n")
    }
}

/// A column in a discovered table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: ColumnType,
    #[serde(default)]
    pub nullable: bool,
}

/// A discovered table with its columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Fully qualified name ("schema.table").
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count_estimate: Option<u64>,
}

/// Schema discovery response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaResponse {
    pub tables: Vec<TableSchema>,
}

impl SchemaResponse {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self { tables }
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Qualified names of every discovered table.
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Render tables and columns for an LLM prompt.
    pub fn to_prompt_string(&self) -> String {
        let mut lines = Vec::new();
        for table in &self.tables {
            let suffix = match table.row_count_estimate {
                Some(n) => format!(" (~{} rows)", n),
                None => String::new(),
            };
            lines.push(format!("TABLE {}{}", table.name, suffix));
            for col in &table.columns {
                let null_marker = if col.nullable { " NULL" } else { "" };
                lines.push(format!("  {} {}{}", col.name, col.data_type, null_marker));
            }
        }
        lines.join("\n")
    }
}

/// Optional narrowing of schema discovery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaFilter {
    #[serde(default)]
    pub include_schemas: Vec<String>,
    #[serde(default)]
    pub include_tables: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tables: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample_result() -> QueryResult {
        let mut row1 = serde_json::Map::new();
        row1.insert("user_id".to_string(), Value::Null);
        row1.insert("created_at".to_string(), json!("2024-01-15T03:14:00Z"));
        let mut row2 = serde_json::Map::new();
        row2.insert("user_id".to_string(), json!(42));
        row2.insert("created_at".to_string(), json!("2024-01-15T03:15:00Z"));

        QueryResult {
            columns: vec![
                QueryColumn {
                    name: "user_id".to_string(),
                    data_type: ColumnType::Integer,
                },
                QueryColumn {
                    name: "created_at".to_string(),
                    data_type: ColumnType::Timestamp,
                },
            ],
            rows: vec![row1, row2],
            row_count: 2,
            truncated: false,
            execution_time_ms: Some(12),
        }
    }

    #[test]
    fn test_summary_renders_nulls_and_header() {
        let summary = sample_result().to_summary();
        assert!(summary.starts_with("user_id | created_at"));
        assert!(summary.contains("NULL | 2024-01-15T03:14:00Z"));
        assert!(summary.contains("42"));
    }

    #[test]
    fn test_summary_empty_result() {
        assert_eq!(QueryResult::empty().to_summary(), "(no rows returned)");
    }

    #[test]
    fn test_summary_truncation_note() {
        let mut result = sample_result();
        result.truncated = true;
        assert!(result.to_summary().contains("truncated at adapter row cap"));
    }

    #[test]
    fn test_schema_prompt_string() {
        let schema = SchemaResponse::new(vec![TableSchema {
            name: "sales.orders".to_string(),
            columns: vec![
                ColumnSchema {
                    name: "id".to_string(),
                    data_type: ColumnType::Integer,
                    nullable: false,
                },
                ColumnSchema {
                    name: "user_id".to_string(),
                    data_type: ColumnType::Integer,
                    nullable: true,
                },
            ],
            row_count_estimate: Some(1000),
        }]);

        let s = schema.to_prompt_string();
        assert!(s.contains("TABLE sales.orders (~1000 rows)"));
        assert!(s.contains("  id integer"));
        assert!(s.contains("  user_id integer NULL"));
        assert_eq!(schema.table_count(), 1);
        assert!(!schema.is_empty());
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(AdapterErrorCode::QueryTimeout.to_string(), "QUERY_TIMEOUT");
        assert_eq!(
            AdapterErrorCode::SchemaFetchFailed.to_string(),
            "SCHEMA_FETCH_FAILED"
        );
    }
}
