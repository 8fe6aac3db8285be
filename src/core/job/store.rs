use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::debug;

use super::types::{JobRecord, Phase, StageKind};
use super::views::JobSummary;
use crate::core::error::PipelineError;
use crate::core::orchestrator::can_transition;

/// Process-local job registry. Cheap to clone; all clones share state.
///
/// Every mutation goes through [`JobStore::mutate`], which validates the
/// record invariants, commits, and only then notifies subscribers. The map
/// lock is held just long enough to find a slot; each job has its own lock so
/// different jobs never serialize against each other.
#[derive(Clone, Default)]
pub struct JobStore {
    slots: Arc<RwLock<HashMap<String, Arc<JobSlot>>>>,
}

struct JobSlot {
    state: Mutex<SlotState>,
}

struct SlotState {
    record: JobRecord,
    subscribers: Vec<mpsc::UnboundedSender<JobRecord>>,
}

/// Live view of one job: the snapshot at subscription time plus every later
/// committed mutation. The channel closes after the terminal snapshot.
pub struct JobSubscription {
    pub snapshot: JobRecord,
    receiver: mpsc::UnboundedReceiver<JobRecord>,
}

impl JobSubscription {
    pub async fn recv(&mut self) -> Option<JobRecord> {
        self.receiver.recv().await
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub phase: Option<Phase>,
    pub requester: Option<String>,
}

impl JobFilter {
    fn matches(&self, record: &JobRecord) -> bool {
        if let Some(phase) = self.phase
            && record.phase != phase
        {
            return false;
        }
        if let Some(ref requester) = self.requester
            && record.requester.as_deref() != Some(requester.as_str())
        {
            return false;
        }
        true
    }
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(
        &self,
        job_id: &str,
        source_url: &str,
        requester: Option<String>,
        target_project: Option<String>,
    ) -> Result<JobRecord, PipelineError> {
        let mut slots = self.slots.write().await;
        if slots.contains_key(job_id) {
            return Err(PipelineError::DuplicateJob(job_id.to_string()));
        }
        let record = JobRecord::new(job_id, source_url, requester, target_project);
        slots.insert(
            job_id.to_string(),
            Arc::new(JobSlot {
                state: Mutex::new(SlotState {
                    record: record.clone(),
                    subscribers: Vec::new(),
                }),
            }),
        );
        debug!(job_id, "job record created");
        Ok(record)
    }

    async fn slot(&self, job_id: &str) -> Result<Arc<JobSlot>, PipelineError> {
        self.slots
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound(job_id.to_string()))
    }

    pub async fn get(&self, job_id: &str) -> Result<JobRecord, PipelineError> {
        let slot = self.slot(job_id).await?;
        let state = slot.state.lock().await;
        Ok(state.record.clone())
    }

    /// Apply `mutator` to a copy of the record, validate, commit and notify.
    /// Nothing is committed if the mutator or the validation fails.
    pub async fn mutate<F>(&self, job_id: &str, mutator: F) -> Result<JobRecord, PipelineError>
    where
        F: FnOnce(&mut JobRecord) -> Result<(), PipelineError>,
    {
        let slot = self.slot(job_id).await?;
        let mut state = slot.state.lock().await;

        if state.record.is_terminal() {
            return Err(PipelineError::invalid_state(format!(
                "job '{}' is {} and can no longer change",
                job_id, state.record.phase
            )));
        }

        let mut next = state.record.clone();
        mutator(&mut next)?;
        validate_mutation(&state.record, &next)?;
        next.updated_at = Utc::now().max(state.record.updated_at);
        state.record = next;

        let snapshot = state.record.clone();
        state
            .subscribers
            .retain(|tx| tx.send(snapshot.clone()).is_ok());
        if snapshot.is_terminal() {
            // Dropping the senders closes every subscriber stream.
            state.subscribers.clear();
        }
        Ok(snapshot)
    }

    pub async fn subscribe(&self, job_id: &str) -> Result<JobSubscription, PipelineError> {
        let slot = self.slot(job_id).await?;
        let mut state = slot.state.lock().await;
        let (tx, receiver) = mpsc::unbounded_channel();
        if !state.record.is_terminal() {
            state.subscribers.push(tx);
        }
        Ok(JobSubscription {
            snapshot: state.record.clone(),
            receiver,
        })
    }

    /// Most recently created first.
    pub async fn list_recent(&self, limit: usize, filter: &JobFilter) -> Vec<JobSummary> {
        let slots: Vec<Arc<JobSlot>> = self.slots.read().await.values().cloned().collect();
        let mut records = Vec::with_capacity(slots.len());
        for slot in slots {
            let state = slot.state.lock().await;
            if filter.matches(&state.record) {
                records.push(JobSummary::from(&state.record));
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        records
    }

    /// Remove terminal jobs not updated within `older_than`. Returns how many
    /// records were evicted. A window reaching past the representable time
    /// range evicts nothing.
    pub async fn evict_terminal(&self, older_than: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|window| Utc::now().checked_sub_signed(window))
        else {
            return 0;
        };
        let mut slots = self.slots.write().await;
        let mut expired = Vec::new();
        for (job_id, slot) in slots.iter() {
            // A slot locked by an in-flight mutation is by definition not stale.
            if let Ok(state) = slot.state.try_lock()
                && state.record.is_terminal()
                && state.record.updated_at < cutoff
            {
                expired.push(job_id.clone());
            }
        }
        for job_id in &expired {
            slots.remove(job_id);
        }
        expired.len()
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }
}

/// Check every record invariant between a committed record and its proposed
/// successor.
fn validate_mutation(before: &JobRecord, after: &JobRecord) -> Result<(), PipelineError> {
    let violation = |msg: String| -> Result<(), PipelineError> {
        Err(PipelineError::invalid_state(format!(
            "job '{}': {}",
            before.job_id, msg
        )))
    };

    if after.job_id != before.job_id
        || after.source_url != before.source_url
        || after.requester != before.requester
        || after.target_project != before.target_project
        || after.created_at != before.created_at
    {
        return violation("identity fields are immutable".to_string());
    }

    if !can_transition(before.phase, after.phase) {
        return violation(format!(
            "phase transition {} -> {} is not allowed",
            before.phase, after.phase
        ));
    }

    if after.progress > 100 {
        return violation(format!("progress {} exceeds 100", after.progress));
    }
    if !after.phase.is_terminal() && after.progress < before.progress {
        return violation(format!(
            "progress may not decrease ({} -> {})",
            before.progress, after.progress
        ));
    }

    if !after.logs.starts_with(&before.logs) {
        return violation("log entries are append-only".to_string());
    }
    if !after.errors.starts_with(&before.errors) {
        return violation("error records are append-only".to_string());
    }

    for kind in StageKind::ORDER {
        let was_set = before.outputs.is_set(kind);
        if was_set && !before.outputs.slot_eq(&after.outputs, kind) {
            return violation(format!("{} output is already set", kind));
        }
        if !was_set && after.outputs.is_set(kind) && after.current_stage != Some(kind) {
            return violation(format!(
                "{} output may only be written while that stage runs",
                kind
            ));
        }
    }

    Ok(())
}
