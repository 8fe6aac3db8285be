//! Push adapter over [`JobStore::subscribe`](crate::core::job::JobStore::subscribe).

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::core::job::{JobSubscription, StatusView};

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Snapshot(StatusView),
    Heartbeat(DateTime<Utc>),
}

impl ProgressEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::Snapshot(_) => "snapshot",
            ProgressEvent::Heartbeat(_) => "heartbeat",
        }
    }

    pub fn to_json(&self) -> String {
        let encoded = match self {
            ProgressEvent::Snapshot(view) => serde_json::to_string(view),
            ProgressEvent::Heartbeat(at) => {
                serde_json::to_string(&serde_json::json!({ "timestamp": at }))
            }
        };
        encoded.unwrap_or_else(|_| "{}".to_string())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Snapshot(view) if view.phase.is_terminal())
    }
}

/// Turn a subscription into a stream of snapshot and heartbeat events. The
/// stream starts with the current snapshot, follows every committed change
/// and ends after the terminal snapshot. Dropping the stream stops the
/// forwarding task.
pub fn progress_stream(
    subscription: JobSubscription,
    heartbeat: Duration,
    log_limit: usize,
) -> ReceiverStream<ProgressEvent> {
    let (tx, rx) = mpsc::channel(32);
    let heartbeat = heartbeat.max(Duration::from_millis(1));

    tokio::spawn(async move {
        let mut subscription = subscription;
        let job_id = subscription.snapshot.job_id.clone();
        let first = ProgressEvent::Snapshot(StatusView::from_record(
            &subscription.snapshot,
            log_limit,
        ));
        if tx.send(first).await.is_err() || subscription.snapshot.is_terminal() {
            return;
        }

        let mut ticker = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = tx.closed() => {
                    debug!(job_id = %job_id, "Progress subscriber went away");
                    break;
                }
                update = subscription.recv() => {
                    let Some(record) = update else { break };
                    let terminal = record.is_terminal();
                    let event = ProgressEvent::Snapshot(StatusView::from_record(&record, log_limit));
                    if tx.send(event).await.is_err() || terminal {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if tx.send(ProgressEvent::Heartbeat(Utc::now())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    ReceiverStream::new(rx)
}
