use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use super::parse_llm_json;
use crate::core::error::StageError;
use crate::core::fetch::WebFetcher;
use crate::core::job::{BusinessAnalysis, JobRecord, StageKind};
use crate::core::llm::{GenerationSettings, LlmProvider};
use crate::core::orchestrator::{StageContext, StageExecutor, StageOutput, gather};

pub(crate) const SYSTEM_INSTRUCTION: &str = "You are a business analyst preparing a tailored \
data analytics demo. Read the company's public web pages and describe the business. Reply with \
a single JSON object and nothing else.";

/// Label and path of every page the stage tries, homepage first.
const SOURCES: [(&str, &str); 6] = [
    ("homepage", ""),
    ("about", "/about"),
    ("products", "/products"),
    ("solutions", "/solutions"),
    ("blog", "/blog"),
    ("careers", "/careers"),
];

#[derive(Deserialize)]
struct AnalysisReply {
    company_name: String,
    #[serde(default)]
    industry: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    products: Vec<String>,
    #[serde(default)]
    key_entities: Vec<String>,
}

/// Gathers the company's public pages and has the LLM summarise the business.
pub struct ResearchStage {
    llm: Arc<dyn LlmProvider>,
    fetcher: Arc<dyn WebFetcher>,
    min_sources: usize,
    generation: GenerationSettings,
}

impl ResearchStage {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        fetcher: Arc<dyn WebFetcher>,
        min_sources: usize,
        generation: GenerationSettings,
    ) -> Self {
        Self {
            llm,
            fetcher,
            min_sources,
            generation,
        }
    }
}

/// Resolve the research pages against the site root of `source_url`. The
/// homepage is the submitted URL itself.
pub(crate) fn source_urls(source_url: &str) -> Result<Vec<(String, String)>, StageError> {
    let base = Url::parse(source_url)
        .map_err(|e| StageError::malformed("source url", format!("{}: {}", source_url, e)))?;
    SOURCES
        .iter()
        .map(|(label, path)| {
            let url = if path.is_empty() {
                source_url.to_string()
            } else {
                base.join(path)
                    .map_err(|e| StageError::malformed("source url", e))?
                    .to_string()
            };
            Ok((label.to_string(), url))
        })
        .collect()
}

fn build_prompt(source_url: &str, pages: &[(String, (String, String))]) -> String {
    let mut prompt = format!(
        "Company website: {}\n\nThe following text was extracted from its public pages.\n",
        source_url
    );
    for (label, (url, text)) in pages {
        prompt.push_str(&format!("\n--- {} ({}) ---\n{}\n", label, url, text));
    }
    prompt.push_str(
        "\nReturn JSON with these fields:\n\
         {\"company_name\": string, \"industry\": string, \"summary\": string (2-4 sentences), \
         \"products\": [string], \"key_entities\": [string]}\n\
         key_entities are the business objects worth modelling as data \
         (for example customers, orders, shipments).",
    );
    prompt
}

#[async_trait]
impl StageExecutor for ResearchStage {
    fn kind(&self) -> StageKind {
        StageKind::Research
    }

    async fn execute(
        &self,
        record: &JobRecord,
        ctx: &StageContext,
    ) -> Result<StageOutput, StageError> {
        let urls = source_urls(&record.source_url)?;
        ctx.info(format!("fetching {} research sources", urls.len()))
            .await;

        let tasks = urls
            .into_iter()
            .map(|(label, url)| {
                let fetcher = self.fetcher.clone();
                let task = async move {
                    let text = fetcher.fetch_text(&url).await?;
                    if text.trim().is_empty() {
                        bail!("{} had no readable text", url);
                    }
                    Ok::<_, anyhow::Error>((url, text))
                };
                (label, task)
            })
            .collect();
        let fan = gather(tasks).await;
        ctx.report_partial_failures(&fan.failures).await;
        let fan = fan.require("research sources", self.min_sources)?;

        let pages = fan.successes;
        let prompt = build_prompt(&record.source_url, &pages);
        let reply = self
            .llm
            .complete(&self.generation.request(SYSTEM_INSTRUCTION, prompt))
            .await?;
        let parsed: AnalysisReply = parse_llm_json("business analysis", &reply)?;
        if parsed.company_name.trim().is_empty() {
            return Err(StageError::malformed(
                "business analysis",
                "company_name is empty",
            ));
        }

        Ok(StageOutput::Research(BusinessAnalysis {
            company_name: parsed.company_name.trim().to_string(),
            industry: parsed.industry.trim().to_string(),
            summary: parsed.summary.trim().to_string(),
            products: parsed.products,
            key_entities: parsed.key_entities,
            sources: pages.into_iter().map(|(_, (url, _))| url).collect(),
        }))
    }
}
