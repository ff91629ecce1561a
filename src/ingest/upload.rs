use crate::error::UploadError;
use crate::ingest::ProgressFn;
use crate::model::{SelectedFile, TaskId};
use bytes::Bytes;
use futures::{stream, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::Url;
use serde::Deserialize;
use std::sync::{
    atomic::{AtomicU64, AtomicU8, Ordering},
    Arc,
};
use tracing::{debug, info, warn};

/// Chunk size for the streamed upload body (64 KB)
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct UploadAccepted {
    #[serde(default)]
    task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

/// Forwards progress to the sink only when it strictly increases.
struct ProgressReporter {
    last: AtomicU8,
    sink: ProgressFn,
}

impl ProgressReporter {
    fn new(sink: ProgressFn) -> Self {
        Self {
            last: AtomicU8::new(0),
            sink,
        }
    }

    fn report(&self, percent: u8) {
        let percent = percent.min(100);
        let prev = self.last.fetch_max(percent, Ordering::AcqRel);
        if percent > prev {
            (self.sink)(percent);
        }
    }
}

/// `round(sent * 100 / total)`; an empty file counts as fully sent.
pub(crate) fn percent_of(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let sent = sent.min(total) as u128;
    let total = total as u128;
    ((sent * 100 + total / 2) / total) as u8
}

/// Single multipart POST of `file` under the field name `file`.
pub(crate) async fn send_multipart(
    http: &reqwest::Client,
    url: Url,
    file: &SelectedFile,
    on_progress: ProgressFn,
) -> Result<TaskId, UploadError> {
    let data = tokio::fs::read(&file.path)
        .await
        .map_err(|e| UploadError::Read(e.to_string()))?;
    let data = Bytes::from(data);
    let total = data.len() as u64;
    info!(file = %file.meta.name, bytes = total, "uploading");

    let reporter = Arc::new(ProgressReporter::new(on_progress));
    let sent = Arc::new(AtomicU64::new(0));

    // Bytes are counted as chunks are handed to reqwest, which tracks what goes on the wire
    // closely enough for a progress bar.
    let chunks: Vec<Bytes> = (0..data.len())
        .step_by(UPLOAD_CHUNK_SIZE)
        .map(|start| data.slice(start..(start + UPLOAD_CHUNK_SIZE).min(data.len())))
        .collect();
    let reporter2 = reporter.clone();
    let body_stream = stream::iter(chunks).map(move |chunk| {
        let len = chunk.len() as u64;
        let now = sent.fetch_add(len, Ordering::Relaxed) + len;
        reporter2.report(percent_of(now, total));
        Ok::<Bytes, std::io::Error>(chunk)
    });

    let part = Part::stream_with_length(reqwest::Body::wrap_stream(body_stream), total)
        .file_name(file.meta.name.clone());
    let form = Form::new().part("file", part);

    let resp = http
        .post(url)
        .multipart(form)
        .send()
        .await
        .map_err(|e| UploadError::Network(e.to_string()))?;
    let status = resp.status();
    let body = resp
        .bytes()
        .await
        .map_err(|e| UploadError::Network(e.to_string()))?;

    if !status.is_success() {
        let detail = serde_json::from_slice::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.error)
            .unwrap_or_else(|| format!("server responded with HTTP {}", status.as_u16()));
        warn!(status = status.as_u16(), %detail, "upload rejected");
        return Err(UploadError::Rejected(detail));
    }

    // The send is complete even if the body turns out to be unusable.
    reporter.report(100);

    let accepted: UploadAccepted =
        serde_json::from_slice(&body).map_err(|e| UploadError::Malformed(e.to_string()))?;
    let task_id = accepted
        .task_id
        .map(TaskId::new)
        .ok_or_else(|| UploadError::Malformed("missing task_id".into()))?;
    debug!(%task_id, "upload accepted");
    Ok(task_id)
}
