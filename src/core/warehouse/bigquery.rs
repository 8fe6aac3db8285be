use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::DataWarehouse;
use crate::core::job::TableSchema;

pub const DEFAULT_BASE_URL: &str = "https://bigquery.googleapis.com";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DatasetReference<'a> {
    project_id: &'a str,
    dataset_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DatasetResource<'a> {
    dataset_reference: DatasetReference<'a>,
    location: &'a str,
    description: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TableReference<'a> {
    project_id: &'a str,
    dataset_id: &'a str,
    table_id: &'a str,
}

#[derive(Serialize)]
struct FieldSchema<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    field_type: &'static str,
    mode: &'static str,
    description: &'a str,
}

#[derive(Serialize)]
struct TableFields<'a> {
    fields: Vec<FieldSchema<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TableResource<'a> {
    table_reference: TableReference<'a>,
    description: &'a str,
    schema: TableFields<'a>,
}

#[derive(Serialize)]
struct InsertRow<'a> {
    json: &'a Map<String, Value>,
}

#[derive(Serialize)]
struct InsertAllRequest<'a> {
    rows: Vec<InsertRow<'a>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<Value>,
}

/// BigQuery REST v2 client.
pub struct BigQueryClient {
    client: Client,
    token: String,
    base_url: String,
    location: String,
}

impl BigQueryClient {
    pub fn new(
        token: String,
        base_url: Option<String>,
        location: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build BigQuery HTTP client")?;
        Ok(Self {
            client,
            token,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            location,
        })
    }

    fn datasets_url(&self, project_id: &str) -> String {
        format!(
            "{}/bigquery/v2/projects/{}/datasets",
            self.base_url, project_id
        )
    }

    async fn post<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<Response> {
        let res = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            bail!("BigQuery API Error ({}): {}", status, text);
        }
        Ok(res)
    }
}

#[async_trait]
impl DataWarehouse for BigQueryClient {
    async fn create_dataset(
        &self,
        project_id: &str,
        dataset_id: &str,
        description: &str,
    ) -> Result<()> {
        let body = DatasetResource {
            dataset_reference: DatasetReference {
                project_id,
                dataset_id,
            },
            location: &self.location,
            description,
        };
        self.post(&self.datasets_url(project_id), &body).await?;
        debug!("Created BigQuery dataset {}.{}", project_id, dataset_id);
        Ok(())
    }

    async fn create_table(
        &self,
        project_id: &str,
        dataset_id: &str,
        table: &TableSchema,
    ) -> Result<()> {
        let body = TableResource {
            table_reference: TableReference {
                project_id,
                dataset_id,
                table_id: &table.name,
            },
            description: &table.description,
            schema: TableFields {
                fields: table
                    .columns
                    .iter()
                    .map(|c| FieldSchema {
                        name: &c.name,
                        field_type: c.data_type.as_str(),
                        mode: if c.nullable { "NULLABLE" } else { "REQUIRED" },
                        description: &c.description,
                    })
                    .collect(),
            },
        };
        let url = format!("{}/{}/tables", self.datasets_url(project_id), dataset_id);
        self.post(&url, &body).await?;
        debug!(
            "Created BigQuery table {}.{}.{}",
            project_id, dataset_id, table.name
        );
        Ok(())
    }

    async fn load_rows(
        &self,
        project_id: &str,
        dataset_id: &str,
        table: &str,
        rows: &[Map<String, Value>],
    ) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let body = InsertAllRequest {
            rows: rows.iter().map(|json| InsertRow { json }).collect(),
        };
        let url = format!(
            "{}/{}/tables/{}/insertAll",
            self.datasets_url(project_id),
            dataset_id,
            table
        );
        let parsed: InsertAllResponse = self.post(&url, &body).await?.json().await?;
        if let Some(first) = parsed.insert_errors.first() {
            bail!(
                "BigQuery rejected {} of {} row(s) for {}: {}",
                parsed.insert_errors.len(),
                rows.len(),
                table,
                first
            );
        }
        Ok(rows.len())
    }
}
