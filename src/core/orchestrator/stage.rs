use async_trait::async_trait;
use tracing::debug;

use crate::core::error::{PartialSourceFailure, PipelineError, StageError};
use crate::core::job::{
    AgentIdentity, BusinessAnalysis, DataManifest, DemoContent, JobRecord, JobStore, LogLevel,
    ProvisionedResources, SchemaDefinition, StageKind,
};

/// One unit of pipeline work. Executors read earlier outputs from the record
/// snapshot they are handed and return their own output; they never write
/// outputs to the store themselves.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    fn kind(&self) -> StageKind;

    async fn execute(
        &self,
        record: &JobRecord,
        ctx: &StageContext,
    ) -> Result<StageOutput, StageError>;
}

/// The payload a stage hands back to the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    Research(BusinessAnalysis),
    DataModeling(SchemaDefinition),
    SyntheticData(DataManifest),
    Infrastructure(ProvisionedResources),
    AgentCreation(AgentIdentity),
    DemoContent(DemoContent),
}

impl StageOutput {
    pub fn kind(&self) -> StageKind {
        match self {
            StageOutput::Research(_) => StageKind::Research,
            StageOutput::DataModeling(_) => StageKind::DataModeling,
            StageOutput::SyntheticData(_) => StageKind::SyntheticData,
            StageOutput::Infrastructure(_) => StageKind::Infrastructure,
            StageOutput::AgentCreation(_) => StageKind::AgentCreation,
            StageOutput::DemoContent(_) => StageKind::DemoContent,
        }
    }

    /// One-line description used in the stage completion log entry.
    pub fn summary(&self) -> String {
        match self {
            StageOutput::Research(a) => format!(
                "identified {} ({}) from {} source(s)",
                a.company_name,
                a.industry,
                a.sources.len()
            ),
            StageOutput::DataModeling(s) => format!(
                "designed {} table(s) for dataset {}",
                s.tables.len(),
                s.dataset_name
            ),
            StageOutput::SyntheticData(m) => format!(
                "generated {} row(s) across {} table(s)",
                m.total_rows(),
                m.tables.len()
            ),
            StageOutput::Infrastructure(r) => format!(
                "provisioned {} with {} table(s) and {} row(s)",
                r.resource_id(),
                r.tables.len(),
                r.rows_loaded
            ),
            StageOutput::AgentCreation(a) => format!(
                "created agent {}{}",
                a.agent_id,
                if a.verified { "" } else { " (unverified)" }
            ),
            StageOutput::DemoContent(d) => format!(
                "wrote {} golden quer{} and narrative '{}'",
                d.golden_queries.len(),
                if d.golden_queries.len() == 1 { "y" } else { "ies" },
                d.narrative.title
            ),
        }
    }

    /// Write the payload into its slot. Refuses to overwrite a populated slot.
    pub fn apply(self, record: &mut JobRecord) -> Result<(), PipelineError> {
        let kind = self.kind();
        if record.outputs.is_set(kind) {
            return Err(PipelineError::invalid_state(format!(
                "{} output for job '{}' is already set",
                kind, record.job_id
            )));
        }
        let outputs = &mut record.outputs;
        match self {
            StageOutput::Research(v) => outputs.business_analysis = Some(v),
            StageOutput::DataModeling(v) => outputs.schema = Some(v),
            StageOutput::SyntheticData(v) => outputs.data_manifest = Some(v),
            StageOutput::Infrastructure(v) => outputs.resources = Some(v),
            StageOutput::AgentCreation(v) => outputs.agent = Some(v),
            StageOutput::DemoContent(v) => outputs.demo = Some(v),
        }
        Ok(())
    }
}

/// Handle a running stage uses to append log entries to its job.
#[derive(Clone)]
pub struct StageContext {
    job_id: String,
    stage: StageKind,
    store: JobStore,
}

impl StageContext {
    pub fn new(job_id: impl Into<String>, stage: StageKind, store: JobStore) -> Self {
        Self {
            job_id: job_id.into(),
            stage,
            store,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn stage(&self) -> StageKind {
        self.stage
    }

    /// Append a log entry tagged with this stage. A detached stage that keeps
    /// running after its job was cancelled simply loses its late entries.
    pub async fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        let tag = self.stage.as_str();
        if let Err(e) = self
            .store
            .mutate(&self.job_id, |r| {
                r.push_log(tag, level, message);
                Ok(())
            })
            .await
        {
            debug!(job_id = %self.job_id, stage = tag, "dropped stage log: {}", e);
        }
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message).await;
    }

    pub async fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message).await;
    }

    pub async fn report_partial_failures(&self, failures: &[PartialSourceFailure]) {
        for failure in failures {
            self.warn(failure.to_string()).await;
        }
    }
}

/// Borrow an earlier stage's output or fail with [`StageError::MissingInput`].
pub fn require_output<'a, T>(slot: &'a Option<T>, what: &'static str) -> Result<&'a T, StageError> {
    slot.as_ref().ok_or(StageError::MissingInput(what))
}
