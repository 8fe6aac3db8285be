use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::{is_valid_identifier, parse_llm_json, sanitize_identifier};
use crate::core::error::StageError;
use crate::core::job::{
    BusinessAnalysis, ColumnSchema, ColumnType, JobRecord, SchemaDefinition, StageKind,
    TableSchema,
};
use crate::core::llm::{GenerationSettings, LlmProvider};
use crate::core::orchestrator::{StageContext, StageExecutor, StageOutput, require_output};

pub(crate) const SYSTEM_INSTRUCTION: &str = "You are a data architect designing a small \
BigQuery star schema for a product demo. Reply with a single JSON object and nothing else.";

#[derive(Deserialize)]
struct SchemaReply {
    #[serde(default)]
    dataset_name: Option<String>,
    tables: Vec<TableReply>,
}

#[derive(Deserialize)]
struct TableReply {
    name: String,
    #[serde(default)]
    description: String,
    columns: Vec<ColumnReply>,
}

#[derive(Deserialize)]
struct ColumnReply {
    name: String,
    #[serde(alias = "data_type")]
    #[serde(rename = "type")]
    data_type: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    nullable: Option<bool>,
}

/// Designs the demo dataset from the business analysis.
pub struct DataModelingStage {
    llm: Arc<dyn LlmProvider>,
    max_tables: usize,
    generation: GenerationSettings,
}

impl DataModelingStage {
    pub fn new(llm: Arc<dyn LlmProvider>, max_tables: usize, generation: GenerationSettings) -> Self {
        Self {
            llm,
            max_tables,
            generation,
        }
    }
}

fn build_prompt(analysis: &BusinessAnalysis, max_tables: usize) -> String {
    format!(
        "Company: {}\nIndustry: {}\nSummary: {}\nProducts: {}\nKey entities: {}\n\n\
         Design between 2 and {} related tables that let an analyst explore this business. \
         Use snake_case identifiers. Allowed column types: STRING, INT64, FLOAT64, NUMERIC, \
         BOOL, DATE, TIMESTAMP. Every table needs a primary key column ending in _id.\n\n\
         Return JSON:\n\
         {{\"dataset_name\": string, \"tables\": [{{\"name\": string, \"description\": string, \
         \"columns\": [{{\"name\": string, \"type\": string, \"description\": string, \
         \"nullable\": bool}}]}}]}}",
        analysis.company_name,
        analysis.industry,
        analysis.summary,
        analysis.products.join(", "),
        analysis.key_entities.join(", "),
        max_tables
    )
}

/// Validate and normalise an LLM schema. Tables beyond `max_tables` are
/// dropped and reported in the second element.
fn normalize_schema(
    reply: SchemaReply,
    company_name: &str,
    max_tables: usize,
) -> Result<(SchemaDefinition, usize), StageError> {
    const WHAT: &str = "schema";

    if reply.tables.is_empty() {
        return Err(StageError::malformed(WHAT, "no tables were proposed"));
    }

    let dataset_name = reply
        .dataset_name
        .as_deref()
        .and_then(sanitize_identifier)
        .or_else(|| sanitize_identifier(&format!("{}_demo", company_name)))
        .unwrap_or_else(|| "demo_dataset".to_string());

    let proposed = reply.tables.len();
    let mut seen_tables = HashSet::new();
    let mut tables = Vec::new();
    for table in reply.tables.into_iter().take(max_tables) {
        let name = table.name.trim().to_string();
        if !is_valid_identifier(&name) {
            return Err(StageError::malformed(
                WHAT,
                format!("table name '{}' is not a valid identifier", name),
            ));
        }
        if !seen_tables.insert(name.to_ascii_lowercase()) {
            return Err(StageError::malformed(WHAT, format!("duplicate table '{}'", name)));
        }
        if table.columns.is_empty() {
            return Err(StageError::malformed(
                WHAT,
                format!("table '{}' has no columns", name),
            ));
        }

        let mut seen_columns = HashSet::new();
        let mut columns = Vec::with_capacity(table.columns.len());
        for column in table.columns {
            let column_name = column.name.trim().to_string();
            if !is_valid_identifier(&column_name) {
                return Err(StageError::malformed(
                    WHAT,
                    format!("column '{}.{}' is not a valid identifier", name, column_name),
                ));
            }
            if !seen_columns.insert(column_name.to_ascii_lowercase()) {
                return Err(StageError::malformed(
                    WHAT,
                    format!("duplicate column '{}.{}'", name, column_name),
                ));
            }
            let data_type = ColumnType::parse(&column.data_type).ok_or_else(|| {
                StageError::malformed(
                    WHAT,
                    format!(
                        "column '{}.{}' has unknown type '{}'",
                        name, column_name, column.data_type
                    ),
                )
            })?;
            columns.push(ColumnSchema {
                name: column_name,
                data_type,
                description: column.description.trim().to_string(),
                nullable: column.nullable.unwrap_or(true),
            });
        }

        tables.push(TableSchema {
            name,
            description: table.description.trim().to_string(),
            columns,
        });
    }

    Ok((
        SchemaDefinition {
            dataset_name,
            tables,
        },
        proposed.saturating_sub(max_tables),
    ))
}

#[async_trait]
impl StageExecutor for DataModelingStage {
    fn kind(&self) -> StageKind {
        StageKind::DataModeling
    }

    async fn execute(
        &self,
        record: &JobRecord,
        ctx: &StageContext,
    ) -> Result<StageOutput, StageError> {
        let analysis = require_output(&record.outputs.business_analysis, "business analysis")?;
        let prompt = build_prompt(analysis, self.max_tables);
        let reply = self
            .llm
            .complete(&self.generation.request(SYSTEM_INSTRUCTION, prompt))
            .await?;
        let parsed: SchemaReply = parse_llm_json("schema", &reply)?;
        let (schema, dropped) = normalize_schema(parsed, &analysis.company_name, self.max_tables)?;
        if dropped > 0 {
            ctx.warn(format!(
                "dropped {} table(s) beyond the limit of {}",
                dropped, self.max_tables
            ))
            .await;
        }
        Ok(StageOutput::DataModeling(schema))
    }
}
