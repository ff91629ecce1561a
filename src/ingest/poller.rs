//! Repeating task-status poll with explicit cancellation.
//!
//! A poll loop belongs to exactly one task handle. The loop sleeps one interval, issues a
//! single status request, waits for it to resolve, and only then schedules the next one, so
//! requests never overlap. The shared cancel flag is checked before each request and again
//! before a response is forwarded.

use crate::error::{PollError, SessionError};
use crate::ingest::{IngestApi, TaskStatusResponse};
use crate::model::{InferredSchema, TaskId};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const STATUS_SUCCESS: &str = "SUCCESS";
const STATUS_FAILURE: &str = "FAILURE";

#[derive(Debug, Clone, PartialEq)]
pub enum PollUpdate {
    /// Non-terminal remote status such as `PENDING` or `STARTED`.
    Progress(String),
    Completed(InferredSchema),
    Failed(SessionError),
}

impl PollUpdate {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollUpdate::Progress(_))
    }
}

/// Owner of a running poll loop.
///
/// Dropping the handle cancels the loop. In Tokio, dropping a JoinHandle alone does not stop
/// the task.
pub struct PollHandle {
    task_id: TaskId,
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Stop all future polls. Safe to call repeatedly and after a terminal update.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) && !self.task.is_finished() {
            debug!(task_id = %self.task_id, "poller cancelled");
        }
        self.task.abort();
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub struct TaskPoller;

impl TaskPoller {
    /// Begin polling `task_id` every `interval`. The first request goes out one interval after
    /// start. The stream ends after a terminal update or cancellation.
    pub fn start(
        api: Arc<dyn IngestApi>,
        task_id: TaskId,
        interval: Duration,
    ) -> (PollHandle, UnboundedReceiver<PollUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(poll_loop(
            api,
            task_id.clone(),
            interval,
            cancelled.clone(),
            tx,
        ));
        (
            PollHandle {
                task_id,
                cancelled,
                task,
            },
            rx,
        )
    }
}

async fn poll_loop(
    api: Arc<dyn IngestApi>,
    task_id: TaskId,
    interval: Duration,
    cancelled: Arc<AtomicBool>,
    tx: UnboundedSender<PollUpdate>,
) {
    loop {
        tokio::time::sleep(interval).await;
        if cancelled.load(Ordering::Acquire) {
            break;
        }

        let res = api.task_status(&task_id).await;
        if cancelled.load(Ordering::Acquire) {
            debug!(%task_id, "dropping status response for cancelled poller");
            break;
        }

        let update = classify(&task_id, res);
        let terminal = update.is_terminal();
        if tx.send(update).is_err() || terminal {
            break;
        }
    }
}

/// Translate one status response (or fetch failure) into a local update.
pub(crate) fn classify(
    task_id: &TaskId,
    res: Result<TaskStatusResponse, PollError>,
) -> PollUpdate {
    let resp = match res {
        Ok(resp) => resp,
        Err(e) => {
            warn!(%task_id, error = %e, "task status request failed");
            return PollUpdate::Failed(SessionError::Poll);
        }
    };

    match resp.status.as_str() {
        STATUS_SUCCESS => match resp.inferred_types {
            Some(schema) => {
                info!(%task_id, columns = schema.len(), "task completed");
                PollUpdate::Completed(schema)
            }
            None => {
                warn!(%task_id, "SUCCESS response without inferred_types");
                PollUpdate::Failed(SessionError::Poll)
            }
        },
        STATUS_FAILURE => {
            let detail = resp.error.unwrap_or_else(|| "unknown error".to_string());
            info!(%task_id, %detail, "task failed");
            PollUpdate::Failed(SessionError::JobFailure(detail))
        }
        other => {
            debug!(%task_id, status = other, "task still running");
            PollUpdate::Progress(other.to_string())
        }
    }
}
