use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use tokio::task::JoinSet;

use crate::core::error::{PartialSourceFailure, StageError};

/// Type-erased sub-task, for fan-outs whose branches are different futures.
pub type BoxedTask<T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'static>>;

/// Result of a fan-out: successes in submission order plus every failure.
#[derive(Debug)]
pub struct FanOut<T> {
    pub successes: Vec<(String, T)>,
    pub failures: Vec<PartialSourceFailure>,
}

impl<T> FanOut<T> {
    pub fn attempted(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    /// Tolerant aggregation: keep going as long as `required` sub-tasks
    /// succeeded. Failures stay on the value so the caller can log them.
    pub fn require(self, what: &'static str, required: usize) -> Result<Self, StageError> {
        if self.successes.len() < required {
            return Err(StageError::InsufficientSources {
                what,
                attempted: self.attempted(),
                succeeded: self.successes.len(),
                required,
            });
        }
        Ok(self)
    }

    /// Every sub-task is essential: the first failure fails the stage.
    pub fn require_all(self) -> Result<Vec<(String, T)>, StageError> {
        match self.failures.into_iter().next() {
            Some(failure) => Err(StageError::Collaborator(failure.to_string())),
            None => Ok(self.successes),
        }
    }

    pub fn failed(&self, label: &str) -> Option<&PartialSourceFailure> {
        self.failures.iter().find(|f| f.source == label)
    }

    pub fn take(&mut self, label: &str) -> Option<T> {
        let idx = self.successes.iter().position(|(l, _)| l == label)?;
        Some(self.successes.remove(idx).1)
    }
}

/// Run every labeled task concurrently on a [`JoinSet`] and wait for all of
/// them. A panicking task counts as a failure of its label.
pub async fn gather<T, F>(tasks: Vec<(String, F)>) -> FanOut<T>
where
    T: Send + 'static,
    F: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let mut labels = BTreeMap::new();
    let mut set = JoinSet::new();
    for (idx, (label, task)) in tasks.into_iter().enumerate() {
        labels.insert(idx, label);
        set.spawn(async move { (idx, task.await) });
    }

    let mut finished = BTreeMap::new();
    while let Some(joined) = set.join_next().await {
        // A JoinError carries no index; its label is recovered below.
        if let Ok((idx, result)) = joined {
            finished.insert(idx, result);
        }
    }

    let mut successes = Vec::new();
    let mut failures = Vec::new();
    for (idx, label) in labels {
        match finished.remove(&idx) {
            Some(Ok(value)) => successes.push((label, value)),
            Some(Err(e)) => failures.push(PartialSourceFailure {
                source: label,
                message: format!("{:#}", e),
            }),
            None => failures.push(PartialSourceFailure {
                source: label,
                message: "task panicked".to_string(),
            }),
        }
    }
    FanOut {
        successes,
        failures,
    }
}
