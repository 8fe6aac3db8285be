use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;

use super::{sanitize_identifier, short_job_id};
use crate::core::error::StageError;
use crate::core::job::{JobRecord, ProvisionedResources, StageKind};
use crate::core::orchestrator::{StageContext, StageExecutor, StageOutput, gather, require_output};
use crate::core::warehouse::DataWarehouse;

/// Creates the demo dataset in the warehouse, then creates and loads every
/// table in parallel.
pub struct InfrastructureStage {
    warehouse: Arc<dyn DataWarehouse>,
}

impl InfrastructureStage {
    pub fn new(warehouse: Arc<dyn DataWarehouse>) -> Self {
        Self { warehouse }
    }
}

/// Dataset id unique to this job: `{dataset_name}_{short job id}`.
pub(crate) fn dataset_id(dataset_name: &str, job_id: &str) -> String {
    let raw = format!("{}_{}", dataset_name, short_job_id(job_id));
    sanitize_identifier(&raw).unwrap_or_else(|| format!("demo_{}", short_job_id(job_id)))
}

#[async_trait]
impl StageExecutor for InfrastructureStage {
    fn kind(&self) -> StageKind {
        StageKind::Infrastructure
    }

    async fn execute(
        &self,
        record: &JobRecord,
        ctx: &StageContext,
    ) -> Result<StageOutput, StageError> {
        let schema = require_output(&record.outputs.schema, "schema")?;
        let manifest = require_output(&record.outputs.data_manifest, "data manifest")?;
        let project_id = record
            .target_project
            .clone()
            .ok_or(StageError::MissingInput("target project"))?;
        let dataset = dataset_id(&schema.dataset_name, &record.job_id);

        let description = match &record.outputs.business_analysis {
            Some(a) => format!("Demo dataset for {}", a.company_name),
            None => "Demo dataset".to_string(),
        };
        self.warehouse
            .create_dataset(&project_id, &dataset, &description)
            .await?;
        ctx.info(format!("created dataset {}.{}", project_id, dataset))
            .await;

        let tasks = schema
            .tables
            .iter()
            .map(|table| {
                let warehouse = self.warehouse.clone();
                let project_id = project_id.clone();
                let dataset = dataset.clone();
                let label = table.name.clone();
                let table = table.clone();
                let rows = manifest
                    .tables
                    .iter()
                    .find(|t| t.table == table.name)
                    .map(|t| t.rows.clone());
                let task = async move {
                    let rows =
                        rows.ok_or_else(|| anyhow!("no generated rows for {}", table.name))?;
                    warehouse.create_table(&project_id, &dataset, &table).await?;
                    let loaded = warehouse
                        .load_rows(&project_id, &dataset, &table.name, &rows)
                        .await?;
                    Ok::<_, anyhow::Error>(loaded)
                };
                (label, task)
            })
            .collect();

        let fan = gather(tasks).await;
        for (table, loaded) in &fan.successes {
            ctx.info(format!("loaded {} row(s) into {}", loaded, table))
                .await;
        }
        let loaded = fan.require_all()?;

        Ok(StageOutput::Infrastructure(ProvisionedResources {
            project_id,
            dataset_id: dataset,
            rows_loaded: loaded.iter().map(|(_, n)| n).sum(),
            tables: loaded.into_iter().map(|(table, _)| table).collect(),
        }))
    }
}
