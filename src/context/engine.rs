//! Context engine: schema required, lineage optional.
//!
//! The engine is a thin coordinator over the data-source and lineage
//! adapters. It is the only place where an empty schema is permitted to
//! terminate a run: proceeding would poison every downstream prompt and
//! produce nonsense hypotheses.

use std::sync::Arc;
use tracing::{info, warn};

use crate::datasource::DataSourceAdapter;
use crate::domain::{AnomalyAlert, InvestigationContext, LineageContext};
use crate::error::{Error, Result};
use crate::lineage::{DatasetId, LineageAdapter};

/// Gathers the `InvestigationContext` for one run.
///
/// Holds no mutable state and never caches across tenants; a fresh gather
/// hits the adapters every time.
#[derive(Default)]
pub struct ContextEngine {
    lineage: Option<Arc<dyn LineageAdapter>>,
}

impl ContextEngine {
    pub fn new() -> Self {
        Self { lineage: None }
    }

    /// Attach a lineage adapter for this tenant.
    pub fn with_lineage(mut self, lineage: Arc<dyn LineageAdapter>) -> Self {
        self.lineage = Some(lineage);
        self
    }

    /// Gather schema and optional lineage context.
    ///
    /// Schema discovery faults and empty schemas fail fast with
    /// `Error::SchemaDiscovery`; lineage faults are logged and swallowed.
    pub async fn gather(
        &self,
        alert: &AnomalyAlert,
        adapter: &dyn DataSourceAdapter,
    ) -> Result<InvestigationContext> {
        let schema = adapter
            .get_schema(None)
            .await
            .map_err(|e| Error::schema_discovery(format!("failed to discover schema: {}", e)))?;

        // Empty schema almost always means misconfigured credentials or
        // permissions, not an empty warehouse.
        if schema.is_empty() {
            return Err(Error::schema_discovery(
                "No tables discovered - check database connectivity and permissions",
            ));
        }

        info!(
            dataset = %alert.dataset_id,
            tables = schema.table_count(),
            "schema discovered"
        );

        let lineage = match &self.lineage {
            Some(adapter) => match self.fetch_lineage(adapter.as_ref(), &alert.dataset_id).await {
                Ok(lineage) => {
                    info!(
                        upstream = lineage.upstream.len(),
                        downstream = lineage.downstream.len(),
                        "lineage discovered"
                    );
                    Some(lineage)
                }
                Err(e) => {
                    warn!(error = %e, "lineage discovery failed - continuing without lineage");
                    None
                }
            },
            None => None,
        };

        Ok(InvestigationContext { schema, lineage })
    }

    async fn fetch_lineage(
        &self,
        adapter: &dyn LineageAdapter,
        dataset_id: &str,
    ) -> Result<LineageContext> {
        let id = DatasetId::from_urn(dataset_id);

        let upstream = adapter.get_upstream(&id, 1).await?;
        let downstream = adapter.get_downstream(&id, 1).await?;

        Ok(LineageContext {
            target: dataset_id.to_string(),
            upstream: upstream.into_iter().map(|d| d.qualified_name).collect(),
            downstream: downstream.into_iter().map(|d| d.qualified_name).collect(),
        })
    }
}
