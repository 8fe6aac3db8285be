//! Transport shapes derived from a [`JobRecord`]. These are the only types
//! the HTTP layer and the CLI serialize.

use chrono::{DateTime, Utc};

use super::types::{
    ErrorRecord, GoldenQuery, JobRecord, LogEntry, NarrativeScript, Phase, StageKind, TableSchema,
};
use crate::core::error::PipelineError;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub job_id: String,
    pub phase: Phase,
    pub current_stage: Option<StageKind>,
    pub progress_percentage: u8,
    pub errors: Vec<ErrorRecord>,
    pub recent_logs: Vec<LogEntry>,
    pub updated_at: DateTime<Utc>,
}

impl StatusView {
    pub fn from_record(record: &JobRecord, log_limit: usize) -> Self {
        Self {
            job_id: record.job_id.clone(),
            phase: record.phase,
            current_stage: record.current_stage,
            progress_percentage: record.progress,
            errors: record.errors.clone(),
            recent_logs: record.recent_logs(log_limit).to_vec(),
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: String,
    pub source_url: String,
    pub requester: Option<String>,
    pub company_name: Option<String>,
    pub phase: Phase,
    pub progress_percentage: u8,
    pub error_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&JobRecord> for JobSummary {
    fn from(record: &JobRecord) -> Self {
        Self {
            job_id: record.job_id.clone(),
            source_url: record.source_url.clone(),
            requester: record.requester.clone(),
            company_name: record
                .outputs
                .business_analysis
                .as_ref()
                .map(|a| a.company_name.clone()),
            phase: record.phase,
            progress_percentage: record.progress,
            error_count: record.errors.len(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultView {
    pub job_id: String,
    pub source_url: String,
    pub company_name: String,
    pub provisioned_resource_id: String,
    pub conversational_agent_id: String,
    pub golden_queries: Vec<GoldenQuery>,
    pub narrative_script: NarrativeScript,
    pub schema: Vec<TableSchema>,
}

impl TryFrom<&JobRecord> for ResultView {
    type Error = PipelineError;

    fn try_from(record: &JobRecord) -> Result<Self, Self::Error> {
        if record.phase != Phase::Completed {
            return Err(PipelineError::invalid_state(format!(
                "job '{}' is {}, results are only available once completed",
                record.job_id, record.phase
            )));
        }

        let outputs = &record.outputs;
        let missing = |what: &str| {
            PipelineError::invalid_state(format!(
                "job '{}' completed without {}",
                record.job_id, what
            ))
        };
        let analysis = outputs
            .business_analysis
            .as_ref()
            .ok_or_else(|| missing("a business analysis"))?;
        let schema = outputs.schema.as_ref().ok_or_else(|| missing("a schema"))?;
        let resources = outputs
            .resources
            .as_ref()
            .ok_or_else(|| missing("provisioned resources"))?;
        let agent = outputs.agent.as_ref().ok_or_else(|| missing("an agent"))?;
        let demo = outputs.demo.as_ref().ok_or_else(|| missing("demo content"))?;

        Ok(Self {
            job_id: record.job_id.clone(),
            source_url: record.source_url.clone(),
            company_name: analysis.company_name.clone(),
            provisioned_resource_id: resources.resource_id(),
            conversational_agent_id: agent.agent_id.clone(),
            golden_queries: demo.golden_queries.clone(),
            narrative_script: demo.narrative.clone(),
            schema: schema.tables.clone(),
        })
    }
}
