//! Shared fakes and fixtures for unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::core::agents::InMemoryAgents;
use crate::core::config::AppConfig;
use crate::core::error::StageError;
use crate::core::fetch::WebFetcher;
use crate::core::job::{
    AgentIdentity, BusinessAnalysis, ColumnSchema, ColumnType, DataManifest, DemoContent,
    GeneratedTable, GoldenQuery, JobRecord, JobStore, NarrativeScript, ProvisionedResources,
    SchemaDefinition, StageKind, TableSchema,
};
use crate::core::llm::{CompletionRequest, LlmProvider, ProviderType};
use crate::core::orchestrator::{
    JobService, Pipeline, PipelineSettings, ServiceOptions, StageContext, StageExecutor,
    StageOutput,
};
use crate::core::stages::{Collaborators, short_job_id, standard_stages};
use crate::core::warehouse::InMemoryWarehouse;

pub const PROJECT: &str = "local-demo";
pub const SITE: &str = "https://acme.example";

// --- LLM and fetch fakes ---

/// LLM whose replies are picked by the first rule whose needle occurs in the
/// system instruction or the prompt.
#[derive(Default)]
pub struct ScriptedLlm {
    rules: Vec<(String, Result<String, String>)>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, needle: &str, reply: impl Into<String>) -> Self {
        self.rules.push((needle.to_string(), Ok(reply.into())));
        self
    }

    pub fn fail(mut self, needle: &str, message: &str) -> Self {
        self.rules.push((needle.to_string(), Err(message.to_string())));
        self
    }

    /// Every prompt received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Google
    }

    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        let haystack = format!(
            "{}\n{}",
            request.system_instruction.as_deref().unwrap_or_default(),
            request.prompt
        );
        let (_, outcome) = self
            .rules
            .iter()
            .find(|(needle, _)| haystack.contains(needle.as_str()))
            .ok_or_else(|| anyhow!("no scripted reply for prompt"))?;
        outcome.clone().map_err(|e| anyhow!(e))
    }
}

/// Serves fixed page text by exact URL; everything else is a 404.
#[derive(Default)]
pub struct StaticFetcher {
    pages: HashMap<String, String>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, text: &str) -> Self {
        self.pages.insert(url.to_string(), text.to_string());
        self
    }
}

#[async_trait]
impl WebFetcher for StaticFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("GET {} returned 404 Not Found", url))
    }
}

// --- Canned payloads ---

pub fn analysis() -> BusinessAnalysis {
    BusinessAnalysis {
        company_name: "Acme Corp".to_string(),
        industry: "Retail".to_string(),
        summary: "Acme sells anvils and rocket skates to discerning coyotes.".to_string(),
        products: vec!["anvils".to_string(), "rocket skates".to_string()],
        key_entities: vec!["customers".to_string(), "orders".to_string()],
        sources: vec![SITE.to_string()],
    }
}

fn column(name: &str, data_type: ColumnType, nullable: bool) -> ColumnSchema {
    ColumnSchema {
        name: name.to_string(),
        data_type,
        description: String::new(),
        nullable,
    }
}

pub fn schema() -> SchemaDefinition {
    SchemaDefinition {
        dataset_name: "acme_corp_demo".to_string(),
        tables: vec![
            TableSchema {
                name: "customers".to_string(),
                description: "People who buy from Acme".to_string(),
                columns: vec![
                    column("customer_id", ColumnType::Int64, false),
                    column("name", ColumnType::String, false),
                    column("segment", ColumnType::String, true),
                ],
            },
            TableSchema {
                name: "orders".to_string(),
                description: "Purchases".to_string(),
                columns: vec![
                    column("order_id", ColumnType::Int64, false),
                    column("customer_id", ColumnType::Int64, false),
                    column("amount", ColumnType::Numeric, true),
                    column("placed_at", ColumnType::Timestamp, true),
                ],
            },
        ],
    }
}

pub fn rows(table: &str) -> Vec<Map<String, Value>> {
    let values = match table {
        "customers" => vec![
            json!({"customer_id": 1, "name": "Wile E.", "segment": "enterprise"}),
            json!({"customer_id": 2, "name": "Road Runner", "segment": null}),
        ],
        "orders" => vec![
            json!({"order_id": 10, "customer_id": 1, "amount": 99.5, "placed_at": "2024-03-01T10:00:00Z"}),
            json!({"order_id": 11, "customer_id": 1, "amount": 12.0, "placed_at": "2024-03-02T09:30:00Z"}),
            json!({"order_id": 12, "customer_id": 2, "amount": null, "placed_at": null}),
        ],
        _ => Vec::new(),
    };
    values
        .into_iter()
        .filter_map(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect()
}

pub fn manifest() -> DataManifest {
    DataManifest {
        tables: ["customers", "orders"]
            .into_iter()
            .map(|t| GeneratedTable {
                table: t.to_string(),
                rows: rows(t),
            })
            .collect(),
    }
}

pub fn resources(job_id: &str) -> ProvisionedResources {
    ProvisionedResources {
        project_id: PROJECT.to_string(),
        dataset_id: format!("acme_corp_demo_{}", short_job_id(job_id)),
        tables: vec!["customers".to_string(), "orders".to_string()],
        rows_loaded: manifest().total_rows(),
    }
}

pub fn agent(job_id: &str) -> AgentIdentity {
    AgentIdentity {
        agent_id: format!("local/{}/agents/demo-{}", PROJECT, short_job_id(job_id)),
        display_name: "Acme Corp demo analyst".to_string(),
        verified: true,
    }
}

pub fn demo() -> DemoContent {
    DemoContent {
        golden_queries: vec![GoldenQuery {
            question: "Who are our top customers?".to_string(),
            sql: "SELECT customer_id, SUM(amount) FROM orders GROUP BY 1".to_string(),
            insight: "Wile E. drives most revenue".to_string(),
        }],
        narrative: NarrativeScript {
            title: "Acme in five minutes".to_string(),
            script: "Open the agent and ask about top customers.".to_string(),
            talking_points: vec!["Revenue is concentrated".to_string()],
        },
    }
}

pub fn canned_output(kind: StageKind, job_id: &str) -> StageOutput {
    match kind {
        StageKind::Research => StageOutput::Research(analysis()),
        StageKind::DataModeling => StageOutput::DataModeling(schema()),
        StageKind::SyntheticData => StageOutput::SyntheticData(manifest()),
        StageKind::Infrastructure => StageOutput::Infrastructure(resources(job_id)),
        StageKind::AgentCreation => StageOutput::AgentCreation(agent(job_id)),
        StageKind::DemoContent => StageOutput::DemoContent(demo()),
    }
}

// --- Canned LLM replies ---

pub fn analysis_reply() -> String {
    let a = analysis();
    json!({
        "company_name": a.company_name,
        "industry": a.industry,
        "summary": a.summary,
        "products": a.products,
        "key_entities": a.key_entities,
    })
    .to_string()
}

pub fn schema_reply() -> String {
    format!(
        "Here is the schema:\n```json\n{}\n```",
        serde_json::to_string_pretty(&schema()).unwrap()
    )
}

pub fn rows_reply(table: &str) -> String {
    serde_json::to_string(&rows(table)).unwrap()
}

pub fn golden_queries_reply() -> String {
    serde_json::to_string(&demo().golden_queries).unwrap()
}

pub fn narrative_reply() -> String {
    serde_json::to_string(&demo().narrative).unwrap()
}

pub fn talking_points_reply() -> String {
    json!(["Spot repeat customers early", "Revenue is concentrated"]).to_string()
}

/// An LLM that answers every prompt of a successful run.
pub fn full_llm() -> ScriptedLlm {
    use crate::core::stages::instructions;

    ScriptedLlm::new()
        .reply(instructions::RESEARCH, analysis_reply())
        .reply(instructions::DATA_MODELING, schema_reply())
        .reply("Table `customers`", rows_reply("customers"))
        .reply("Table `orders`", rows_reply("orders"))
        .reply(instructions::GOLDEN_QUERIES, golden_queries_reply())
        .reply(instructions::NARRATIVE, narrative_reply())
        .reply(instructions::TALKING_POINTS, talking_points_reply())
}

// --- Jobs ---

pub async fn job_with(store: &JobStore, source_url: &str) -> JobRecord {
    let job_id = uuid::Uuid::new_v4().to_string();
    store
        .create(&job_id, source_url, None, Some(PROJECT.to_string()))
        .await
        .unwrap()
}

/// A job whose outputs are filled for every stage before `stage`.
pub async fn job_at_stage(store: &JobStore, stage: StageKind) -> JobRecord {
    let record = job_with(store, SITE).await;
    for kind in StageKind::ORDER.into_iter().take_while(|k| *k != stage) {
        let output = canned_output(kind, &record.job_id);
        store
            .mutate(&record.job_id, |r| {
                r.phase = kind.phase();
                r.current_stage = Some(kind);
                output.apply(r)?;
                r.progress = kind.checkpoint();
                Ok(())
            })
            .await
            .unwrap();
    }
    store.get(&record.job_id).await.unwrap()
}

/// Wait until the job reaches a terminal phase.
pub async fn wait_terminal(store: &JobStore, job_id: &str) -> JobRecord {
    let wait = async {
        let mut sub = store.subscribe(job_id).await.unwrap();
        if sub.snapshot.is_terminal() {
            return sub.snapshot;
        }
        let mut last = sub.snapshot.clone();
        while let Some(record) = sub.recv().await {
            last = record;
        }
        last
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("job did not settle in time")
}

// --- Fake stages ---

#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Fail(&'static str),
    /// Never returns.
    Hang,
    Sleep(Duration),
    Panic,
    /// Returns the output of a different stage.
    WrongKind,
}

pub struct FakeStage {
    kind: StageKind,
    behavior: Behavior,
}

#[async_trait]
impl StageExecutor for FakeStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    async fn execute(
        &self,
        record: &JobRecord,
        ctx: &StageContext,
    ) -> Result<StageOutput, StageError> {
        ctx.info("working").await;
        match &self.behavior {
            Behavior::Succeed => {}
            Behavior::Fail(message) => {
                return Err(StageError::Collaborator(message.to_string()));
            }
            Behavior::Hang => std::future::pending::<()>().await,
            Behavior::Sleep(duration) => tokio::time::sleep(*duration).await,
            Behavior::Panic => panic!("fake stage exploded"),
            Behavior::WrongKind => {
                let other = if self.kind == StageKind::Research {
                    StageKind::DemoContent
                } else {
                    StageKind::Research
                };
                return Ok(canned_output(other, &record.job_id));
            }
        }
        Ok(canned_output(self.kind, &record.job_id))
    }
}

/// All six stages succeeding, except where `overrides` says otherwise.
pub fn fake_stages(overrides: &[(StageKind, Behavior)]) -> Vec<Arc<dyn StageExecutor>> {
    StageKind::ORDER
        .into_iter()
        .map(|kind| {
            let behavior = overrides
                .iter()
                .find(|(k, _)| *k == kind)
                .map(|(_, b)| b.clone())
                .unwrap_or(Behavior::Succeed);
            Arc::new(FakeStage { kind, behavior }) as Arc<dyn StageExecutor>
        })
        .collect()
}

pub fn fake_pipeline(overrides: &[(StageKind, Behavior)], settings: PipelineSettings) -> Pipeline {
    Pipeline::new(JobStore::new(), fake_stages(overrides), settings).unwrap()
}

pub fn fake_service(overrides: &[(StageKind, Behavior)]) -> JobService {
    JobService::new(
        fake_pipeline(overrides, PipelineSettings::default()),
        ServiceOptions {
            default_project: Some(PROJECT.to_string()),
            ..ServiceOptions::default()
        },
    )
}

/// Real stages wired to in-memory collaborators and a scripted LLM.
pub fn scripted_collaborators(llm: ScriptedLlm) -> Collaborators {
    Collaborators {
        llm: Arc::new(llm),
        fetcher: Arc::new(
            StaticFetcher::new()
                .page(SITE, "Acme Corp sells anvils.")
                .page(&format!("{}/about", SITE), "Founded in the desert."),
        ),
        warehouse: Arc::new(InMemoryWarehouse::new()),
        agents: Arc::new(InMemoryAgents::new()),
    }
}

pub fn scripted_service(collaborators: &Collaborators) -> JobService {
    let config = AppConfig::default();
    let pipeline = Pipeline::new(
        JobStore::new(),
        standard_stages(collaborators, &config),
        PipelineSettings::default(),
    )
    .unwrap();
    JobService::new(
        pipeline,
        ServiceOptions {
            default_project: Some(PROJECT.to_string()),
            ..ServiceOptions::default()
        },
    )
}
