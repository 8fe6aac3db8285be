use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::{Map, Value};

use super::DataWarehouse;
use crate::core::job::TableSchema;

#[derive(Default)]
struct Dataset {
    tables: HashMap<String, StoredTable>,
}

struct StoredTable {
    schema: TableSchema,
    rows: Vec<Map<String, Value>>,
}

/// Process-local warehouse for local runs and tests. Enforces the same
/// create-once rule as the real backend and rejects rows with unknown columns.
#[derive(Default)]
pub struct InMemoryWarehouse {
    datasets: Mutex<HashMap<String, Dataset>>,
}

fn dataset_key(project_id: &str, dataset_id: &str) -> String {
    format!("{}.{}", project_id, dataset_id)
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_datasets<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, Dataset>) -> Result<T>,
    ) -> Result<T> {
        let mut datasets = self
            .datasets
            .lock()
            .map_err(|_| anyhow!("in-memory warehouse lock poisoned"))?;
        f(&mut datasets)
    }

    pub fn dataset_exists(&self, project_id: &str, dataset_id: &str) -> bool {
        self.with_datasets(|d| Ok(d.contains_key(&dataset_key(project_id, dataset_id))))
            .unwrap_or(false)
    }

    pub fn row_count(&self, project_id: &str, dataset_id: &str, table: &str) -> Option<usize> {
        self.with_datasets(|d| {
            Ok(d.get(&dataset_key(project_id, dataset_id))
                .and_then(|ds| ds.tables.get(table))
                .map(|t| t.rows.len()))
        })
        .ok()
        .flatten()
    }
}

#[async_trait]
impl DataWarehouse for InMemoryWarehouse {
    async fn create_dataset(
        &self,
        project_id: &str,
        dataset_id: &str,
        _description: &str,
    ) -> Result<()> {
        let key = dataset_key(project_id, dataset_id);
        self.with_datasets(|datasets| {
            if datasets.contains_key(&key) {
                bail!("Already Exists: dataset {}", key);
            }
            datasets.insert(key, Dataset::default());
            Ok(())
        })
    }

    async fn create_table(
        &self,
        project_id: &str,
        dataset_id: &str,
        table: &TableSchema,
    ) -> Result<()> {
        let key = dataset_key(project_id, dataset_id);
        self.with_datasets(|datasets| {
            let dataset = datasets
                .get_mut(&key)
                .ok_or_else(|| anyhow!("Not found: dataset {}", key))?;
            if dataset.tables.contains_key(&table.name) {
                bail!("Already Exists: table {}.{}", key, table.name);
            }
            dataset.tables.insert(
                table.name.clone(),
                StoredTable {
                    schema: table.clone(),
                    rows: Vec::new(),
                },
            );
            Ok(())
        })
    }

    async fn load_rows(
        &self,
        project_id: &str,
        dataset_id: &str,
        table: &str,
        rows: &[Map<String, Value>],
    ) -> Result<usize> {
        let key = dataset_key(project_id, dataset_id);
        self.with_datasets(|datasets| {
            let stored = datasets
                .get_mut(&key)
                .and_then(|ds| ds.tables.get_mut(table))
                .ok_or_else(|| anyhow!("Not found: table {}.{}", key, table))?;
            for (idx, row) in rows.iter().enumerate() {
                if let Some(unknown) = row
                    .keys()
                    .find(|k| !stored.schema.columns.iter().any(|c| &c.name == *k))
                {
                    bail!("row {} has unknown column '{}' for {}", idx, unknown, table);
                }
                for column in stored.schema.columns.iter().filter(|c| !c.nullable) {
                    if row.get(&column.name).is_none_or(Value::is_null) {
                        bail!("row {} is missing required column '{}'", idx, column.name);
                    }
                }
            }
            stored.rows.extend(rows.iter().cloned());
            Ok(rows.len())
        })
    }
}
