//! Runtime adapter registry keyed by source type.
//!
//! Entrypoint layers validate user-supplied connection config, then ask the
//! registry to construct the matching adapter. The orchestrator only ever
//! sees the `DataSourceAdapter` trait object.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::DataSourceAdapter;
use crate::error::{Error, Result};

/// Closed set of supported data-source types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Postgres,
    Mysql,
    Snowflake,
    Bigquery,
    Trino,
    Mongodb,
    Cassandra,
    Dynamodb,
    S3,
    Gcs,
    Hdfs,
    LocalFs,
    Salesforce,
    Stripe,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
            Self::Snowflake => "snowflake",
            Self::Bigquery => "bigquery",
            Self::Trino => "trino",
            Self::Mongodb => "mongodb",
            Self::Cassandra => "cassandra",
            Self::Dynamodb => "dynamodb",
            Self::S3 => "s3",
            Self::Gcs => "gcs",
            Self::Hdfs => "hdfs",
            Self::LocalFs => "local_fs",
            Self::Salesforce => "salesforce",
            Self::Stripe => "stripe",
        };
        write!(f, "{}", s)
    }
}

/// Constructs an adapter from a validated connection config.
pub type AdapterFactory =
    Arc<dyn Fn(&serde_json::Value) -> Result<Arc<dyn DataSourceAdapter>> + Send + Sync>;

/// Registry of adapter factories, one per source type.
#[derive(Default)]
pub struct AdapterRegistry {
    factories: HashMap<SourceType, AdapterFactory>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for a source type, replacing any previous one.
    pub fn register<F>(&mut self, source_type: SourceType, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn DataSourceAdapter>> + Send + Sync + 'static,
    {
        self.factories.insert(source_type, Arc::new(factory));
    }

    /// Construct an adapter for the given source type and config.
    pub fn create(
        &self,
        source_type: SourceType,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn DataSourceAdapter>> {
        let factory = self.factories.get(&source_type).ok_or_else(|| {
            Error::Config(format!("no adapter registered for source type {}", source_type))
        })?;
        factory(config)
    }

    /// Source types with a registered factory.
    pub fn registered_types(&self) -> Vec<SourceType> {
        self.factories.keys().copied().collect()
    }

    pub fn is_registered(&self, source_type: SourceType) -> bool {
        self.factories.contains_key(&source_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::{QueryResult, SchemaFilter, SchemaResponse};
    use async_trait::async_trait;

    #[derive(Debug)]
    struct NullAdapter;

    #[async_trait]
    impl DataSourceAdapter for NullAdapter {
        async fn execute_query(
            &self,
            _sql: &str,
            _params: Option<&HashMap<String, serde_json::Value>>,
            _timeout_seconds: u64,
            _limit: Option<u64>,
        ) -> Result<QueryResult> {
            Ok(QueryResult::empty())
        }

        async fn get_schema(&self, _filter: Option<&SchemaFilter>) -> Result<SchemaResponse> {
            Ok(SchemaResponse::new(Vec::new()))
        }

        fn source_type(&self) -> SourceType {
            SourceType::Postgres
        }
    }

    #[test]
    fn test_register_and_create() {
        let mut registry = AdapterRegistry::new();
        registry.register(SourceType::Postgres, |_config| {
            Ok(Arc::new(NullAdapter) as Arc<dyn DataSourceAdapter>)
        });

        assert!(registry.is_registered(SourceType::Postgres));
        let adapter = registry
            .create(SourceType::Postgres, &serde_json::json!({}))
            .unwrap();
        assert_eq!(adapter.source_type(), SourceType::Postgres);
    }

    #[test]
    fn test_unregistered_type_is_config_error() {
        let registry = AdapterRegistry::new();
        let err = registry
            .create(SourceType::Snowflake, &serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_source_type_display() {
        assert_eq!(SourceType::LocalFs.to_string(), "local_fs");
        assert_eq!(SourceType::Bigquery.to_string(), "bigquery");
    }
}
