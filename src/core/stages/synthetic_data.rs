use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::parse_llm_json;
use crate::core::error::StageError;
use crate::core::job::{
    BusinessAnalysis, DataManifest, GeneratedTable, JobRecord, StageKind, TableSchema,
};
use crate::core::llm::{GenerationSettings, LlmProvider};
use crate::core::orchestrator::{StageContext, StageExecutor, StageOutput, gather, require_output};

pub(crate) const SYSTEM_INSTRUCTION: &str = "You generate realistic synthetic sample rows for \
a demo database table. Reply with a JSON array of row objects and nothing else.";

/// Rows arrive either as a bare array or wrapped in `{"rows": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RowsReply {
    Bare(Vec<Value>),
    Wrapped { rows: Vec<Value> },
}

impl RowsReply {
    fn into_rows(self) -> Vec<Value> {
        match self {
            RowsReply::Bare(rows) | RowsReply::Wrapped { rows } => rows,
        }
    }
}

/// Generates sample rows for every table of the schema, one LLM call per
/// table, all in parallel.
pub struct SyntheticDataStage {
    llm: Arc<dyn LlmProvider>,
    rows_per_table: usize,
    generation: GenerationSettings,
}

impl SyntheticDataStage {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        rows_per_table: usize,
        generation: GenerationSettings,
    ) -> Self {
        Self {
            llm,
            rows_per_table,
            generation,
        }
    }
}

fn build_prompt(analysis: &BusinessAnalysis, table: &TableSchema, rows: usize) -> String {
    let mut prompt = format!(
        "Company: {} ({})\n{}\n\nTable `{}`: {}\nColumns:\n",
        analysis.company_name, analysis.industry, analysis.summary, table.name, table.description
    );
    for column in &table.columns {
        prompt.push_str(&format!(
            "- {} {}{}: {}\n",
            column.name,
            column.data_type.as_str(),
            if column.nullable { "" } else { " NOT NULL" },
            column.description
        ));
    }
    prompt.push_str(&format!(
        "\nGenerate {} rows as a JSON array of objects keyed by column name. \
         Use ISO-8601 for DATE and TIMESTAMP values and keep ids consistent with \
         the other tables of this company.",
        rows
    ));
    prompt
}

/// Keep only the schema's columns, fill missing nullable columns with null
/// and drop rows that lack a required value. Returns the rows plus how many
/// were dropped.
fn normalize_rows(
    table: &TableSchema,
    raw: Vec<Value>,
    limit: usize,
) -> (Vec<Map<String, Value>>, usize) {
    let mut rows = Vec::new();
    let mut dropped = 0;
    for value in raw {
        if rows.len() >= limit {
            break;
        }
        let Value::Object(mut object) = value else {
            dropped += 1;
            continue;
        };
        let mut row = Map::new();
        let mut complete = true;
        for column in &table.columns {
            match object.remove(&column.name) {
                Some(Value::Null) | None if !column.nullable => {
                    complete = false;
                    break;
                }
                Some(v) => {
                    row.insert(column.name.clone(), v);
                }
                None => {
                    row.insert(column.name.clone(), Value::Null);
                }
            }
        }
        if complete {
            rows.push(row);
        } else {
            dropped += 1;
        }
    }
    (rows, dropped)
}

#[async_trait]
impl StageExecutor for SyntheticDataStage {
    fn kind(&self) -> StageKind {
        StageKind::SyntheticData
    }

    async fn execute(
        &self,
        record: &JobRecord,
        ctx: &StageContext,
    ) -> Result<StageOutput, StageError> {
        let analysis = require_output(&record.outputs.business_analysis, "business analysis")?;
        let schema = require_output(&record.outputs.schema, "schema")?;
        ctx.info(format!(
            "generating up to {} row(s) for {} table(s)",
            self.rows_per_table,
            schema.tables.len()
        ))
        .await;

        let limit = self.rows_per_table;
        let tasks = schema
            .tables
            .iter()
            .map(|table| {
                let llm = self.llm.clone();
                let request = self.generation.request(
                    SYSTEM_INSTRUCTION,
                    build_prompt(analysis, table, limit),
                );
                let label = table.name.clone();
                let table = table.clone();
                let task = async move {
                    let reply = llm.complete(&request).await?;
                    let parsed: RowsReply = parse_llm_json("rows", &reply)?;
                    let (rows, dropped) = normalize_rows(&table, parsed.into_rows(), limit);
                    if rows.is_empty() {
                        return Err(anyhow!("no usable rows were generated"));
                    }
                    Ok::<_, anyhow::Error>((rows, dropped))
                };
                (label, task)
            })
            .collect();

        let generated = gather(tasks).await.require_all()?;
        let mut tables = Vec::with_capacity(generated.len());
        for (table, (rows, dropped)) in generated {
            if dropped > 0 {
                ctx.warn(format!(
                    "dropped {} incomplete row(s) for table {}",
                    dropped, table
                ))
                .await;
            }
            tables.push(GeneratedTable { table, rows });
        }
        Ok(StageOutput::SyntheticData(DataManifest { tables }))
    }
}
