//! Boundary with the backend ingestion service.
//!
//! `IngestApi` is the seam the orchestrator and poller work against; `HttpIngestClient`
//! is the reqwest implementation used by the CLI.

mod client;
mod poller;
#[cfg(test)]
pub(crate) mod testing;
mod upload;

pub use client::HttpIngestClient;
pub use poller::{PollHandle, PollUpdate, TaskPoller};

use crate::error::{PollError, UploadError};
use crate::model::{InferredSchema, SelectedFile, TaskId};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

/// Receives upload progress as a whole percentage.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Body of `GET /api/task-status/{task_id}/`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TaskStatusResponse {
    pub status: String,
    #[serde(default)]
    pub inferred_types: Option<InferredSchema>,
    #[serde(default)]
    pub error: Option<String>,
}

#[async_trait]
pub trait IngestApi: Send + Sync {
    /// Send the file and return the task handle issued for it.
    async fn upload(&self, file: &SelectedFile, on_progress: ProgressFn)
        -> Result<TaskId, UploadError>;

    /// Fetch the current status of a task.
    async fn task_status(&self, task_id: &TaskId) -> Result<TaskStatusResponse, PollError>;
}
