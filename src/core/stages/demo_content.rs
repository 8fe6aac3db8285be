use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use serde::Deserialize;

use super::parse_llm_json;
use crate::core::error::StageError;
use crate::core::job::{
    BusinessAnalysis, DemoContent, GoldenQuery, JobRecord, NarrativeScript, ProvisionedResources,
    SchemaDefinition, StageKind,
};
use crate::core::llm::{CompletionRequest, GenerationSettings, LlmProvider};
use crate::core::orchestrator::{
    BoxedTask, StageContext, StageExecutor, StageOutput, gather, require_output,
};

pub(crate) const GOLDEN_QUERIES_INSTRUCTION: &str = "You write golden queries for a \
conversational analytics demo: business questions with the BigQuery SQL that answers them. \
Reply with a JSON array and nothing else.";

pub(crate) const NARRATIVE_INSTRUCTION: &str = "You write the script a sales engineer follows \
while presenting a conversational analytics demo. Reply with a single JSON object and nothing \
else.";

pub(crate) const TALKING_POINTS_INSTRUCTION: &str = "You write short talking points that tie a \
data demo back to the customer's business goals. Reply with a JSON array of strings and nothing \
else.";

const QUERIES: &str = "golden_queries";
const NARRATIVE: &str = "narrative_script";
const TALKING_POINTS: &str = "talking_points";

#[derive(Deserialize)]
struct QueryReply {
    question: String,
    #[serde(default)]
    sql: String,
    #[serde(default)]
    insight: String,
}

#[derive(Deserialize)]
struct NarrativeReply {
    title: String,
    script: String,
    #[serde(default)]
    talking_points: Vec<String>,
}

/// One branch of the content fan-out.
enum Piece {
    Queries(Vec<GoldenQuery>),
    Narrative(NarrativeScript),
    TalkingPoints(Vec<String>),
}

/// Writes golden queries, the narrative script and talking points in
/// parallel. Queries and narrative are required; talking points are not.
pub struct DemoContentStage {
    llm: Arc<dyn LlmProvider>,
    generation: GenerationSettings,
}

impl DemoContentStage {
    pub fn new(llm: Arc<dyn LlmProvider>, generation: GenerationSettings) -> Self {
        Self { llm, generation }
    }
}

fn describe_dataset(
    analysis: &BusinessAnalysis,
    schema: &SchemaDefinition,
    resources: &ProvisionedResources,
) -> String {
    let mut context = format!(
        "Company: {} ({})\n{}\n\nDataset `{}`:\n",
        analysis.company_name,
        analysis.industry,
        analysis.summary,
        resources.resource_id()
    );
    for table in &schema.tables {
        let columns: Vec<String> = table
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.data_type.as_str()))
            .collect();
        context.push_str(&format!("- {} ({})\n", table.name, columns.join(", ")));
    }
    context
}

fn queries_task(llm: Arc<dyn LlmProvider>, request: CompletionRequest) -> BoxedTask<Piece> {
    Box::pin(async move {
        let reply = llm.complete(&request).await?;
        let parsed: Vec<QueryReply> = parse_llm_json("golden queries", &reply)?;
        let queries: Vec<GoldenQuery> = parsed
            .into_iter()
            .filter(|q| !q.question.trim().is_empty())
            .map(|q| GoldenQuery {
                question: q.question.trim().to_string(),
                sql: q.sql.trim().to_string(),
                insight: q.insight.trim().to_string(),
            })
            .collect();
        if queries.is_empty() {
            bail!("no golden queries were generated");
        }
        Ok(Piece::Queries(queries))
    })
}

fn narrative_task(llm: Arc<dyn LlmProvider>, request: CompletionRequest) -> BoxedTask<Piece> {
    Box::pin(async move {
        let reply = llm.complete(&request).await?;
        let parsed: NarrativeReply = parse_llm_json("narrative", &reply)?;
        if parsed.script.trim().is_empty() {
            bail!("narrative script is empty");
        }
        Ok(Piece::Narrative(NarrativeScript {
            title: parsed.title.trim().to_string(),
            script: parsed.script.trim().to_string(),
            talking_points: parsed.talking_points,
        }))
    })
}

fn talking_points_task(llm: Arc<dyn LlmProvider>, request: CompletionRequest) -> BoxedTask<Piece> {
    Box::pin(async move {
        let reply = llm.complete(&request).await?;
        let points: Vec<String> = parse_llm_json("talking points", &reply)?;
        Ok(Piece::TalkingPoints(
            points
                .into_iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        ))
    })
}

#[async_trait]
impl StageExecutor for DemoContentStage {
    fn kind(&self) -> StageKind {
        StageKind::DemoContent
    }

    async fn execute(
        &self,
        record: &JobRecord,
        ctx: &StageContext,
    ) -> Result<StageOutput, StageError> {
        let analysis = require_output(&record.outputs.business_analysis, "business analysis")?;
        let schema = require_output(&record.outputs.schema, "schema")?;
        let resources = require_output(&record.outputs.resources, "provisioned resources")?;
        let context = describe_dataset(analysis, schema, resources);
        let agent_name = record
            .outputs
            .agent
            .as_ref()
            .map(|a| a.display_name.as_str())
            .unwrap_or("the data agent");

        let tasks: Vec<(String, BoxedTask<Piece>)> = vec![
            (
                QUERIES.to_string(),
                queries_task(
                    self.llm.clone(),
                    self.generation.request(
                        GOLDEN_QUERIES_INSTRUCTION,
                        format!(
                            "{}\nWrite 5 golden queries. Return JSON: \
                             [{{\"question\": string, \"sql\": string, \"insight\": string}}]",
                            context
                        ),
                    ),
                ),
            ),
            (
                NARRATIVE.to_string(),
                narrative_task(
                    self.llm.clone(),
                    self.generation.request(
                        NARRATIVE_INSTRUCTION,
                        format!(
                            "{}\nThe audience will chat with {}. Write a 5 minute demo script. \
                             Return JSON: {{\"title\": string, \"script\": string, \
                             \"talking_points\": [string]}}",
                            context, agent_name
                        ),
                    ),
                ),
            ),
            (
                TALKING_POINTS.to_string(),
                talking_points_task(
                    self.llm.clone(),
                    self.generation.request(
                        TALKING_POINTS_INSTRUCTION,
                        format!("{}\nWrite 3 to 5 talking points.", context),
                    ),
                ),
            ),
        ];

        let mut fan = gather(tasks).await;
        for essential in [QUERIES, NARRATIVE] {
            if let Some(failure) = fan.failed(essential) {
                return Err(StageError::Collaborator(failure.to_string()));
            }
        }
        if let Some(failure) = fan.failed(TALKING_POINTS) {
            ctx.warn(failure.to_string()).await;
        }

        let Some(Piece::Queries(golden_queries)) = fan.take(QUERIES) else {
            return Err(StageError::MissingInput("golden queries"));
        };
        let Some(Piece::Narrative(mut narrative)) = fan.take(NARRATIVE) else {
            return Err(StageError::MissingInput("narrative script"));
        };
        if let Some(Piece::TalkingPoints(points)) = fan.take(TALKING_POINTS) {
            for point in points {
                if !narrative.talking_points.contains(&point) {
                    narrative.talking_points.push(point);
                }
            }
        }

        Ok(StageOutput::DemoContent(DemoContent {
            golden_queries,
            narrative,
        }))
    }
}
