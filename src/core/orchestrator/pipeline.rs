//! Drives one job through the ordered stages.
//!
//! The orchestrator is the only writer of phase, progress, current stage and
//! output slots. Each stage runs on its own task against a snapshot of the
//! record; cancellation stops the orchestrator from waiting on that task but
//! does not abort it.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::stage::{StageContext, StageExecutor, StageOutput};
use crate::core::error::{PipelineError, StageError};
use crate::core::job::{
    JobRecord, JobStore, LogLevel, ORCHESTRATOR_TAG, Phase, ProvisionedResources, StageKind,
};

#[derive(Debug, Clone, Default)]
pub struct PipelineSettings {
    /// Upper bound on a single stage. `None` lets a stage run forever.
    pub stage_timeout: Option<Duration>,
}

pub struct Pipeline {
    store: JobStore,
    stages: Vec<Arc<dyn StageExecutor>>,
    settings: PipelineSettings,
}

enum StageOutcome {
    Finished(Result<StageOutput, String>),
    Cancelled,
}

impl Pipeline {
    /// `stages` must list one executor per [`StageKind`] in pipeline order.
    pub fn new(
        store: JobStore,
        stages: Vec<Arc<dyn StageExecutor>>,
        settings: PipelineSettings,
    ) -> Result<Self, PipelineError> {
        let kinds: Vec<StageKind> = stages.iter().map(|s| s.kind()).collect();
        if kinds != StageKind::ORDER {
            return Err(PipelineError::Validation(format!(
                "stages must be registered in order {:?}, got {:?}",
                StageKind::ORDER,
                kinds
            )));
        }
        Ok(Self {
            store,
            stages,
            settings,
        })
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Run `job_id` to a terminal phase and return it. Returns early with the
    /// recorded phase once the job has been cancelled elsewhere.
    pub async fn run(
        &self,
        job_id: &str,
        cancel: CancellationToken,
    ) -> Result<Phase, PipelineError> {
        info!(job_id, "Pipeline started");

        for stage in &self.stages {
            let kind = stage.kind();
            if cancel.is_cancelled() {
                return self.settled_phase(job_id).await;
            }

            let started = self
                .store
                .mutate(job_id, |r| {
                    r.phase = kind.phase();
                    r.current_stage = Some(kind);
                    r.push_log(
                        kind.as_str(),
                        LogLevel::Info,
                        format!("{} stage started", kind),
                    );
                    Ok(())
                })
                .await;
            let snapshot = match started {
                Ok(record) => record,
                Err(e) => return self.rejected(job_id, e).await,
            };
            info!(job_id, stage = %kind, "Stage started");

            let output = match self.run_stage(Arc::clone(stage), snapshot, &cancel).await {
                StageOutcome::Cancelled => {
                    info!(job_id, stage = %kind, "Stage abandoned after cancellation");
                    return self.settled_phase(job_id).await;
                }
                StageOutcome::Finished(Err(message)) => {
                    return self.fail(job_id, kind, message).await;
                }
                StageOutcome::Finished(Ok(output)) => output,
            };

            if output.kind() != kind {
                let message = format!("stage returned {} output", output.kind());
                return self.fail(job_id, kind, message).await;
            }

            let summary = output.summary();
            let committed = self
                .store
                .mutate(job_id, |r| {
                    output.apply(r)?;
                    r.progress = r.progress.max(kind.checkpoint());
                    r.push_log(
                        kind.as_str(),
                        LogLevel::Info,
                        format!("{} stage completed: {}", kind, summary),
                    );
                    Ok(())
                })
                .await;
            if let Err(e) = committed {
                if self.is_settled(job_id).await {
                    return self.settled_phase(job_id).await;
                }
                return self.fail(job_id, kind, e.to_string()).await;
            }
            info!(job_id, stage = %kind, "{}", summary);
        }

        let completed = self
            .store
            .mutate(job_id, |r| {
                r.phase = Phase::Completed;
                r.current_stage = None;
                r.progress = 100;
                r.push_log(ORCHESTRATOR_TAG, LogLevel::Info, "job completed");
                Ok(())
            })
            .await;
        match completed {
            Ok(_) => {
                info!(job_id, "Pipeline completed");
                Ok(Phase::Completed)
            }
            Err(e) => self.rejected(job_id, e).await,
        }
    }

    async fn run_stage(
        &self,
        stage: Arc<dyn StageExecutor>,
        snapshot: JobRecord,
        cancel: &CancellationToken,
    ) -> StageOutcome {
        let ctx = StageContext::new(snapshot.job_id.clone(), stage.kind(), self.store.clone());
        let timeout = self.settings.stage_timeout;
        let mut handle = tokio::spawn(async move {
            let work = stage.execute(&snapshot, &ctx);
            match timeout {
                Some(limit) => tokio::time::timeout(limit, work)
                    .await
                    .unwrap_or(Err(StageError::Timeout(limit))),
                None => work.await,
            }
        });

        tokio::select! {
            joined = &mut handle => match joined {
                Ok(Ok(output)) => StageOutcome::Finished(Ok(output)),
                Ok(Err(e)) => StageOutcome::Finished(Err(e.to_string())),
                Err(e) => StageOutcome::Finished(Err(format!("stage task aborted: {}", e))),
            },
            // Dropping the handle detaches the stage task.
            _ = cancel.cancelled() => StageOutcome::Cancelled,
        }
    }

    async fn fail(
        &self,
        job_id: &str,
        kind: StageKind,
        message: String,
    ) -> Result<Phase, PipelineError> {
        let err = PipelineError::StageExecution {
            stage: kind,
            message: message.clone(),
        };
        error!(job_id, stage = %kind, "{}", err);
        let failed = self
            .store
            .mutate(job_id, |r| {
                r.phase = Phase::Failed;
                r.push_error(kind.as_str(), message.clone());
                r.push_log(kind.as_str(), LogLevel::Error, err.to_string());
                let orphaned = r
                    .outputs
                    .resources
                    .as_ref()
                    .map(orphaned_resources_message);
                if let Some(notice) = orphaned {
                    r.push_log(ORCHESTRATOR_TAG, LogLevel::Warning, notice);
                }
                Ok(())
            })
            .await;
        match failed {
            Ok(record) => {
                if let Some(resources) = &record.outputs.resources {
                    warn!(job_id, "{}", orphaned_resources_message(resources));
                }
                Ok(Phase::Failed)
            }
            Err(e) => self.rejected(job_id, e).await,
        }
    }

    /// A mutation was refused. If the job already reached a terminal phase
    /// (a concurrent cancel) that phase stands; anything else is a bug.
    async fn rejected(&self, job_id: &str, err: PipelineError) -> Result<Phase, PipelineError> {
        if self.is_settled(job_id).await {
            return self.settled_phase(job_id).await;
        }
        Err(err)
    }

    async fn is_settled(&self, job_id: &str) -> bool {
        self.store
            .get(job_id)
            .await
            .map(|r| r.is_terminal())
            .unwrap_or(false)
    }

    async fn settled_phase(&self, job_id: &str) -> Result<Phase, PipelineError> {
        Ok(self.store.get(job_id).await?.phase)
    }
}

/// Warning attached to jobs that stop after infrastructure was provisioned.
/// Nothing is rolled back; the operator cleans up from this message.
pub fn orphaned_resources_message(resources: &ProvisionedResources) -> String {
    format!(
        "provisioned resources were left in place: dataset {} with table(s) [{}]",
        resources.resource_id(),
        resources.tables.join(", ")
    )
}
