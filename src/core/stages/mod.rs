//! The six stage executors and the collaborators they call.

mod agent_creation;
mod data_modeling;
mod demo_content;
mod infrastructure;
mod research;
mod synthetic_data;

pub use agent_creation::AgentCreationStage;
pub use data_modeling::DataModelingStage;
pub use demo_content::DemoContentStage;
pub use infrastructure::InfrastructureStage;
pub use research::ResearchStage;
pub use synthetic_data::SyntheticDataStage;


use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::Result;
use regex::Regex;
use serde::de::DeserializeOwned;

use crate::core::agents::{ConversationalAgents, build_agents};
use crate::core::config::AppConfig;
use crate::core::error::StageError;
use crate::core::fetch::{HttpFetcher, WebFetcher};
use crate::core::llm::{GenerationSettings, LlmProvider, build_provider};
use crate::core::orchestrator::StageExecutor;
use crate::core::warehouse::{DataWarehouse, build_warehouse};

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

const MAX_IDENTIFIER_LEN: usize = 64;

/// External systems the stages talk to.
#[derive(Clone)]
pub struct Collaborators {
    pub llm: Arc<dyn LlmProvider>,
    pub fetcher: Arc<dyn WebFetcher>,
    pub warehouse: Arc<dyn DataWarehouse>,
    pub agents: Arc<dyn ConversationalAgents>,
}

impl Collaborators {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            llm: build_provider(&config.llm)?,
            fetcher: Arc::new(HttpFetcher::new(
                Duration::from_secs(config.research.fetch_timeout_secs.max(1)),
                config.research.max_page_chars,
            )?),
            warehouse: build_warehouse(&config.warehouse)?,
            agents: build_agents(&config.agents, &config.warehouse)?,
        })
    }
}

/// One executor per stage, in pipeline order.
pub fn standard_stages(
    collaborators: &Collaborators,
    config: &AppConfig,
) -> Vec<Arc<dyn StageExecutor>> {
    let generation = GenerationSettings::from(&config.llm);
    vec![
        Arc::new(ResearchStage::new(
            collaborators.llm.clone(),
            collaborators.fetcher.clone(),
            config.research.min_sources,
            generation,
        )),
        Arc::new(DataModelingStage::new(
            collaborators.llm.clone(),
            config.synthetic_data.max_tables,
            generation,
        )),
        Arc::new(SyntheticDataStage::new(
            collaborators.llm.clone(),
            config.synthetic_data.rows_per_table,
            generation,
        )),
        Arc::new(InfrastructureStage::new(collaborators.warehouse.clone())),
        Arc::new(AgentCreationStage::new(collaborators.agents.clone())),
        Arc::new(DemoContentStage::new(collaborators.llm.clone(), generation)),
    ]
}

/// Extract a JSON block from LLM output. Tries a fenced block first, then raw
/// JSON, then the outermost object or array embedded in prose.
pub(crate) fn extract_json_block(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        let content_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[content_start..];
        if let Some(end) = body.find("```") {
            let block = body[..end].trim();
            if !block.is_empty() {
                return Some(block);
            }
        }
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Some(trimmed);
    }
    let start = trimmed.find(['{', '['])?;
    let close = if trimmed[start..].starts_with('{') { '}' } else { ']' };
    let end = trimmed.rfind(close)?;
    (end > start).then(|| &trimmed[start..=end])
}

/// Parse an LLM reply as `T`, tolerating code fences and surrounding prose.
pub(crate) fn parse_llm_json<T: DeserializeOwned>(
    what: &'static str,
    reply: &str,
) -> Result<T, StageError> {
    let block = extract_json_block(reply)
        .ok_or_else(|| StageError::malformed(what, "reply contained no JSON"))?;
    serde_json::from_str(block).map_err(|e| StageError::malformed(what, e))
}

pub(crate) fn is_valid_identifier(name: &str) -> bool {
    name.len() <= MAX_IDENTIFIER_LEN && IDENTIFIER.is_match(name)
}

/// Lowercase `raw` and fold everything that is not ASCII alphanumeric into
/// single underscores. Returns `None` if nothing usable remains.
pub(crate) fn sanitize_identifier(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let mut out = out.trim_matches('_').to_string();
    if out.is_empty() {
        return None;
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out.truncate(MAX_IDENTIFIER_LEN);
    Some(out)
}

/// First eight hex digits of a job id, used to keep resource names unique.
pub(crate) fn short_job_id(job_id: &str) -> String {
    job_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect::<String>()
        .to_ascii_lowercase()
}
