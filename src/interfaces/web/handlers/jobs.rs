use std::convert::Infallible;

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use tokio_stream::{Stream, StreamExt};

use crate::core::error::PipelineError;
use crate::core::job::{JobFilter, Phase, ResultView, StatusView, SubmitResponse};
use crate::core::notifier::progress_stream;
use crate::core::orchestrator::SubmitRequest;

use super::super::AppState;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

#[derive(Debug, Default, serde::Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    pub phase: Option<String>,
    pub requester: Option<String>,
}

impl ListQuery {
    fn filter(&self) -> Result<JobFilter, PipelineError> {
        let phase = match self.phase.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(Phase::from_status(raw).ok_or_else(|| {
                PipelineError::Validation(format!("unknown phase '{}'", raw))
            })?),
        };
        Ok(JobFilter {
            phase,
            requester: self.requester.clone().filter(|r| !r.trim().is_empty()),
        })
    }
}

pub async fn submit_job(
    State(state): State<AppState>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), PipelineError> {
    let Json(request) = body.map_err(|e| PipelineError::Validation(e.body_text()))?;
    let response = state.service.submit(request).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, PipelineError> {
    let filter = query.filter()?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let jobs = state.service.list(limit, &filter).await;
    Ok(Json(serde_json::json!({ "success": true, "jobs": jobs })))
}

pub async fn get_job_status(
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<StatusView>, PipelineError> {
    Ok(Json(state.service.status(&job_id).await?))
}

pub async fn get_job_result(
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ResultView>, PipelineError> {
    Ok(Json(state.service.result(&job_id).await?))
}

pub async fn cancel_job(
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<StatusView>, PipelineError> {
    Ok(Json(state.service.cancel(&job_id).await?))
}

/// `snapshot` events for every change plus periodic `heartbeat` events. The
/// stream ends after the terminal snapshot.
pub async fn stream_job(
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, PipelineError> {
    let subscription = state.service.subscribe(&job_id).await?;
    let stream = progress_stream(
        subscription,
        state.heartbeat,
        state.service.recent_log_limit(),
    )
    .map(|event| {
        Ok::<_, Infallible>(
            Event::default()
                .event(event.name())
                .data(event.to_json()),
        )
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
