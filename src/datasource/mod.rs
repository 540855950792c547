//! Data-source adapter contract.
//!
//! Every warehouse-side connector (SQL, document store, filesystem, SaaS
//! API) implements the same two-operation interface: execute a read-only
//! query and discover schema. Dialect specifics stay inside the adapter;
//! the orchestrator never branches on the concrete source.

mod registry;
mod types;

pub use registry::{AdapterFactory, AdapterRegistry, SourceType};
pub use types::{
    AdapterErrorCode, ColumnSchema, ColumnType, QueryColumn, QueryResult, SchemaFilter,
    SchemaResponse, TableSchema,
};

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Result;

/// Interface for warehouse-side data sources.
///
/// All queries are read-only. Implementations must be safe for concurrent
/// `execute_query` calls up to their declared `max_concurrent_queries`;
/// callers bound parallelism accordingly.
#[async_trait]
pub trait DataSourceAdapter: Send + Sync + std::fmt::Debug {
    /// Execute a read-only query.
    async fn execute_query(
        &self,
        sql: &str,
        params: Option<&HashMap<String, serde_json::Value>>,
        timeout_seconds: u64,
        limit: Option<u64>,
    ) -> Result<QueryResult>;

    /// Discover available tables and columns.
    async fn get_schema(&self, filter: Option<&SchemaFilter>) -> Result<SchemaResponse>;

    /// The source type this adapter connects to.
    fn source_type(&self) -> SourceType;

    /// How many queries this adapter tolerates in flight at once.
    fn max_concurrent_queries(&self) -> usize {
        4
    }
}
