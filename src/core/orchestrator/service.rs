use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use url::Url;

use super::pipeline::{Pipeline, PipelineSettings, orphaned_resources_message};
use crate::core::config::AppConfig;
use crate::core::error::PipelineError;
use crate::core::job::{
    JobFilter, JobStore, JobSubscription, JobSummary, LogLevel, ORCHESTRATOR_TAG, Phase,
    ResultView, StatusView, SubmitResponse,
};
use crate::core::stages::{Collaborators, standard_stages};

static PROJECT_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][a-z0-9-]{4,28}[a-z0-9]$").expect("project id pattern is valid")
});

const MAX_REQUESTER_LEN: usize = 128;

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub source_url: String,
    #[serde(default)]
    pub requester: Option<String>,
    #[serde(default)]
    pub target_project: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedSubmission {
    pub source_url: String,
    pub requester: Option<String>,
    pub target_project: String,
}

/// Check a submission before any job exists. The target project falls back to
/// `default_project`; one of the two must be present.
pub fn validate_submission(
    request: &SubmitRequest,
    default_project: Option<&str>,
) -> Result<ValidatedSubmission, PipelineError> {
    let raw = request.source_url.trim();
    if raw.is_empty() {
        return Err(PipelineError::Validation("sourceUrl is required".to_string()));
    }
    let parsed = Url::parse(raw).map_err(|e| {
        PipelineError::Validation(format!("sourceUrl '{}' is not a URL: {}", raw, e))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(PipelineError::Validation(format!(
            "sourceUrl must use http or https, got '{}'",
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(PipelineError::Validation(format!(
            "sourceUrl '{}' has no host",
            raw
        )));
    }

    let requester = request
        .requester
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string);
    if let Some(ref r) = requester
        && r.chars().count() > MAX_REQUESTER_LEN
    {
        return Err(PipelineError::Validation(format!(
            "requester must be at most {} characters",
            MAX_REQUESTER_LEN
        )));
    }

    let target_project = request
        .target_project
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .or(default_project)
        .ok_or_else(|| {
            PipelineError::Validation(
                "targetProject is required when no default project is configured".to_string(),
            )
        })?;
    if !PROJECT_ID.is_match(target_project) {
        return Err(PipelineError::Validation(format!(
            "targetProject '{}' is not a valid project id",
            target_project
        )));
    }

    Ok(ValidatedSubmission {
        source_url: raw.to_string(),
        requester,
        target_project: target_project.to_string(),
    })
}

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub default_project: Option<String>,
    pub recent_log_limit: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            default_project: None,
            recent_log_limit: 20,
        }
    }
}

/// Entry point for every caller: HTTP handlers, the CLI and tests. Submits
/// jobs onto background tasks and answers queries from the store.
#[derive(Clone)]
pub struct JobService {
    store: JobStore,
    pipeline: Arc<Pipeline>,
    running: Arc<Mutex<HashMap<String, CancellationToken>>>,
    options: ServiceOptions,
}

impl JobService {
    pub fn new(pipeline: Pipeline, options: ServiceOptions) -> Self {
        Self {
            store: pipeline.store().clone(),
            pipeline: Arc::new(pipeline),
            running: Arc::new(Mutex::new(HashMap::new())),
            options,
        }
    }

    /// Wire the standard stages against the collaborators `config` selects.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let collaborators = Collaborators::from_config(config)?;
        let store = JobStore::new();
        let pipeline = Pipeline::new(
            store,
            standard_stages(&collaborators, config),
            PipelineSettings {
                stage_timeout: config.pipeline.stage_timeout(),
            },
        )?;
        Ok(Self::new(
            pipeline,
            ServiceOptions {
                default_project: config.warehouse.project_id.clone(),
                recent_log_limit: config.pipeline.recent_log_limit,
            },
        ))
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn recent_log_limit(&self) -> usize {
        self.options.recent_log_limit
    }

    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitResponse, PipelineError> {
        let submission = validate_submission(&request, self.options.default_project.as_deref())?;
        let job_id = uuid::Uuid::new_v4().to_string();
        self.store
            .create(
                &job_id,
                &submission.source_url,
                submission.requester,
                Some(submission.target_project),
            )
            .await?;
        info!(job_id = %job_id, url = %submission.source_url, "Job submitted");

        let token = CancellationToken::new();
        self.track(&job_id, token.clone());

        let service = self.clone();
        let id = job_id.clone();
        tokio::spawn(async move {
            match service.pipeline.run(&id, token).await {
                Ok(phase) => info!(job_id = %id, "Job finished as {}", phase),
                Err(e) => error!(job_id = %id, "Pipeline aborted: {}", e),
            }
            service.untrack(&id);
        });

        Ok(SubmitResponse {
            job_id,
            status: "started".to_string(),
        })
    }

    pub async fn status(&self, job_id: &str) -> Result<StatusView, PipelineError> {
        let record = self.store.get(job_id).await?;
        Ok(StatusView::from_record(&record, self.options.recent_log_limit))
    }

    pub async fn result(&self, job_id: &str) -> Result<ResultView, PipelineError> {
        let record = self.store.get(job_id).await?;
        ResultView::try_from(&record)
    }

    pub async fn list(&self, limit: usize, filter: &JobFilter) -> Vec<JobSummary> {
        self.store.list_recent(limit, filter).await
    }

    pub async fn subscribe(&self, job_id: &str) -> Result<JobSubscription, PipelineError> {
        self.store.subscribe(job_id).await
    }

    /// Move a live job to `cancelled` and stop waiting on its current stage.
    /// Cancelling a job that already finished returns its status unchanged.
    pub async fn cancel(&self, job_id: &str) -> Result<StatusView, PipelineError> {
        let record = self.store.get(job_id).await?;
        if record.is_terminal() {
            return Ok(StatusView::from_record(&record, self.options.recent_log_limit));
        }

        let cancelled = self
            .store
            .mutate(job_id, |r| {
                r.phase = Phase::Cancelled;
                let stage = r.current_stage.map(|s| s.as_str()).unwrap_or("queue");
                r.push_log(
                    ORCHESTRATOR_TAG,
                    LogLevel::Warning,
                    format!("job cancelled by request during {}", stage),
                );
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

        let record = match cancelled {
            Ok(record) => {
                warn!(job_id, "Job cancelled");
                record
            }
            // Lost the race against the pipeline reaching a terminal phase.
            Err(PipelineError::InvalidState(_)) => self.store.get(job_id).await?,
            Err(e) => return Err(e),
        };

        if let Some(token) = self.untrack(job_id) {
            token.cancel();
        }
        Ok(StatusView::from_record(&record, self.options.recent_log_limit))
    }

    fn track(&self, job_id: &str, token: CancellationToken) {
        if let Ok(mut running) = self.running.lock() {
            running.insert(job_id.to_string(), token);
        }
    }

    fn untrack(&self, job_id: &str) -> Option<CancellationToken> {
        self.running.lock().ok()?.remove(job_id)
    }
}
