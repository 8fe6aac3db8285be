mod bigquery;
mod memory;

pub use bigquery::BigQueryClient;
pub use memory::InMemoryWarehouse;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::core::config::{WarehouseBackend, WarehouseConfig};
use crate::core::job::TableSchema;

/// Analytical warehouse the infrastructure stage provisions into. Creation
/// calls are not idempotent: creating an existing dataset or table fails.
#[async_trait]
pub trait DataWarehouse: Send + Sync {
    async fn create_dataset(
        &self,
        project_id: &str,
        dataset_id: &str,
        description: &str,
    ) -> Result<()>;

    async fn create_table(
        &self,
        project_id: &str,
        dataset_id: &str,
        table: &TableSchema,
    ) -> Result<()>;

    /// Returns the number of rows accepted.
    async fn load_rows(
        &self,
        project_id: &str,
        dataset_id: &str,
        table: &str,
        rows: &[Map<String, Value>],
    ) -> Result<usize>;
}

pub fn build_warehouse(cfg: &WarehouseConfig) -> Result<Arc<dyn DataWarehouse>> {
    Ok(match cfg.backend {
        WarehouseBackend::Memory => Arc::new(InMemoryWarehouse::new()),
        WarehouseBackend::Bigquery => Arc::new(BigQueryClient::new(
            access_token_from_env(&cfg.access_token_env)?,
            cfg.base_url.clone(),
            cfg.location.clone(),
            Duration::from_secs(cfg.timeout_secs.max(1)),
        )?),
    })
}

/// Google Cloud REST calls authenticate with an OAuth access token taken from
/// the environment, e.g. the output of `gcloud auth print-access-token`.
pub fn access_token_from_env(var: &str) -> Result<String> {
    std::env::var(var)
        .ok()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| anyhow!("Environment variable {} is not set", var))
}
