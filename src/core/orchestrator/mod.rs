mod fanout;
mod pipeline;
mod service;
mod stage;

pub use fanout::{BoxedTask, gather};
pub use service::{JobService, SubmitRequest};
pub use stage::{StageContext, StageExecutor, StageOutput, require_output};

#[cfg(test)]
pub(crate) use {
    pipeline::{Pipeline, PipelineSettings},
    service::{ServiceOptions, validate_submission},
};

use crate::core::job::Phase;

/// Whether the record may move from `from` to `to`. Staying put is always
/// allowed, terminal phases never move, and any live phase may fail or be
/// cancelled. Otherwise phases only advance one step along the success path.
pub fn can_transition(from: Phase, to: Phase) -> bool {
    if from == to {
        return true;
    }
    if from.is_terminal() {
        return false;
    }
    match to {
        Phase::Failed | Phase::Cancelled => true,
        _ => from.next() == Some(to),
    }
}

#[cfg(test)]
mod tests;
