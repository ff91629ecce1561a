//! Scripted in-memory backend for poller and orchestrator tests.

use crate::error::{PollError, UploadError};
use crate::ingest::{IngestApi, ProgressFn, TaskStatusResponse};
use crate::model::{InferredSchema, SelectedFile, TaskId};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub(crate) fn pending() -> Result<TaskStatusResponse, PollError> {
    status("PENDING")
}

pub(crate) fn status(label: &str) -> Result<TaskStatusResponse, PollError> {
    Ok(TaskStatusResponse {
        status: label.to_string(),
        ..Default::default()
    })
}

pub(crate) fn success(cols: &[(&str, &str)]) -> Result<TaskStatusResponse, PollError> {
    Ok(TaskStatusResponse {
        status: "SUCCESS".to_string(),
        inferred_types: Some(schema(cols)),
        error: None,
    })
}

pub(crate) fn failure(error: Option<&str>) -> Result<TaskStatusResponse, PollError> {
    Ok(TaskStatusResponse {
        status: "FAILURE".to_string(),
        inferred_types: None,
        error: error.map(str::to_string),
    })
}

pub(crate) fn schema(cols: &[(&str, &str)]) -> InferredSchema {
    cols.iter()
        .map(|(c, t)| (c.to_string(), t.to_string()))
        .collect()
}

struct UploadScript {
    progress: Vec<u8>,
    delay: Duration,
    result: Result<TaskId, UploadError>,
}

/// Uploads are keyed by file name, statuses by task id. The last scripted status repeats.
#[derive(Default)]
pub(crate) struct ScriptedApi {
    uploads: Mutex<HashMap<String, UploadScript>>,
    statuses: Mutex<HashMap<String, VecDeque<Result<TaskStatusResponse, PollError>>>>,
    status_delays: Mutex<HashMap<String, Duration>>,
    upload_calls: AtomicUsize,
    status_calls: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn script_upload(
        &self,
        file_name: &str,
        progress: Vec<u8>,
        delay: Duration,
        result: Result<TaskId, UploadError>,
    ) {
        self.uploads.lock().unwrap().insert(
            file_name.to_string(),
            UploadScript {
                progress,
                delay,
                result,
            },
        );
    }

    pub(crate) fn script_status(
        &self,
        task_id: &str,
        steps: Vec<Result<TaskStatusResponse, PollError>>,
    ) {
        self.statuses
            .lock()
            .unwrap()
            .insert(task_id.to_string(), steps.into());
    }

    pub(crate) fn script_status_error(&self, task_id: &str, err: PollError) {
        self.script_status(task_id, vec![Err(err)]);
    }

    pub(crate) fn set_status_delay(&self, task_id: &str, delay: Duration) {
        self.status_delays
            .lock()
            .unwrap()
            .insert(task_id.to_string(), delay);
    }

    pub(crate) fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn status_calls(&self, task_id: &str) -> usize {
        self.status_calls
            .lock()
            .unwrap()
            .get(task_id)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn total_status_calls(&self) -> usize {
        self.status_calls.lock().unwrap().values().sum()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_status(&self, task_id: &str) -> Result<TaskStatusResponse, PollError> {
        let mut statuses = self.statuses.lock().unwrap();
        match statuses.get_mut(task_id) {
            Some(steps) if steps.len() > 1 => steps.pop_front().unwrap_or(Err(PollError::Status(500))),
            Some(steps) => steps.front().cloned().unwrap_or(Err(PollError::Status(500))),
            None => Err(PollError::Status(404)),
        }
    }
}

#[async_trait]
impl IngestApi for ScriptedApi {
    async fn upload(
        &self,
        file: &SelectedFile,
        on_progress: ProgressFn,
    ) -> Result<TaskId, UploadError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        let (progress, delay, result) = {
            let uploads = self.uploads.lock().unwrap();
            match uploads.get(&file.meta.name) {
                Some(s) => (s.progress.clone(), s.delay, s.result.clone()),
                None => (
                    Vec::new(),
                    Duration::ZERO,
                    Err(UploadError::Network("no route to host".into())),
                ),
            }
        };
        for p in progress {
            on_progress(p);
            tokio::task::yield_now().await;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn task_status(&self, task_id: &TaskId) -> Result<TaskStatusResponse, PollError> {
        *self
            .status_calls
            .lock()
            .unwrap()
            .entry(task_id.to_string())
            .or_default() += 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self
            .status_delays
            .lock()
            .unwrap()
            .get(task_id.as_str())
            .copied();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        let res = self.next_status(task_id.as_str());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        res
    }
}
