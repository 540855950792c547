//! Lineage adapter contract.
//!
//! Lineage providers (dbt manifests, DataHub, static SQL parsing, etc.) are
//! replaceable strategies behind one interface. The context engine only uses
//! `get_upstream`/`get_downstream` with depth 1 and reduces the results to
//! qualified names; the richer surface exists for entrypoint layers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A dataset known to a lineage provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dataset {
    /// Source platform ("snowflake", "postgres", "unknown", ...).
    pub platform: String,
    /// Fully qualified name within the platform.
    pub qualified_name: String,
}

/// Parsed dataset identifier.
///
/// Accepts the forms that show up in alerts and lineage systems:
/// - "schema.table" (platform unknown)
/// - "snowflake://db.schema.table"
/// - DataHub URNs: "urn:li:dataset:(urn:li:dataPlatform:snowflake,db.schema.table,PROD)"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetId {
    pub platform: String,
    pub name: String,
}

impl DatasetId {
    pub fn new(platform: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            name: name.into(),
        }
    }

    /// Parse any supported identifier form.
    pub fn from_urn(raw: &str) -> Self {
        if let Some(rest) = raw.strip_prefix("urn:li:dataset:(") {
            // urn:li:dataset:(urn:li:dataPlatform:<platform>,<name>,<env>)
            let inner = rest.trim_end_matches(')');
            let parts: Vec<&str> = inner.split(',').collect();
            if parts.len() >= 2 {
                let platform = parts[0]
                    .rsplit(':')
                    .next()
                    .unwrap_or("unknown")
                    .to_string();
                return Self::new(platform, parts[1]);
            }
        }

        if let Some((platform, name)) = raw.split_once("://") {
            return Self::new(platform, name);
        }

        Self::new("unknown", raw)
    }
}

impl std::fmt::Display for DatasetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.platform, self.name)
    }
}

/// Interface for lineage providers.
#[async_trait]
pub trait LineageAdapter: Send + Sync {
    /// Datasets that feed into the given dataset, up to `depth` hops away.
    async fn get_upstream(&self, dataset_id: &DatasetId, depth: u32) -> Result<Vec<Dataset>>;

    /// Datasets that depend on the given dataset, up to `depth` hops away.
    async fn get_downstream(&self, dataset_id: &DatasetId, depth: u32) -> Result<Vec<Dataset>>;

    /// Look up a single dataset, if the provider knows it.
    async fn get_dataset(&self, dataset_id: &DatasetId) -> Result<Option<Dataset>>;

    /// Free-text dataset search.
    async fn search_datasets(&self, query: &str, limit: usize) -> Result<Vec<Dataset>>;
}
