use crate::error::{PollError, UploadError};
use crate::ingest::upload::send_multipart;
use crate::ingest::{IngestApi, ProgressFn, TaskStatusResponse};
use crate::model::{SelectedFile, SessionConfig, TaskId};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use tracing::debug;

/// reqwest-backed client for the ingestion service.
#[derive(Clone)]
pub struct HttpIngestClient {
    pub http: reqwest::Client,
    base_url: Url,
}

impl HttpIngestClient {
    pub fn new(cfg: &SessionConfig) -> Result<Self> {
        let base_url = Url::parse(&cfg.base_url)
            .with_context(|| format!("invalid base URL: {}", cfg.base_url))?;
        if base_url.cannot_be_a_base() {
            bail!("base URL must be hierarchical (http/https): {}", cfg.base_url);
        }
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, base_url })
    }

    /// Append path segments to the base URL, keeping the trailing slash the backend routes expect.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments).push("");
        }
        url
    }

    pub fn upload_url(&self) -> Url {
        self.endpoint(&["api", "upload-file"])
    }

    pub fn status_url(&self, task_id: &TaskId) -> Url {
        self.endpoint(&["api", "task-status", task_id.as_str()])
    }
}

#[async_trait]
impl IngestApi for HttpIngestClient {
    async fn upload(
        &self,
        file: &SelectedFile,
        on_progress: ProgressFn,
    ) -> Result<TaskId, UploadError> {
        send_multipart(&self.http, self.upload_url(), file, on_progress).await
    }

    async fn task_status(&self, task_id: &TaskId) -> Result<TaskStatusResponse, PollError> {
        let url = self.status_url(task_id);
        debug!(%url, "fetching task status");
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| PollError::Network(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(PollError::Status(resp.status().as_u16()));
        }
        resp.json::<TaskStatusResponse>()
            .await
            .map_err(|e| PollError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileMeta;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn config(base_url: &str) -> SessionConfig {
        SessionConfig {
            base_url: base_url.to_string(),
            poll_interval: Duration::from_secs(2),
            user_agent: "datamorph-test".to_string(),
        }
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn temp_csv(len: usize) -> (tempfile::NamedTempFile, SelectedFile) {
        let mut f = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        f.write_all(&vec![b'x'; len]).unwrap();
        f.flush().unwrap();
        let selected = SelectedFile::new(f.path(), FileMeta::new("data.csv", len as u64));
        (f, selected)
    }

    fn recorder() -> (ProgressFn, Arc<Mutex<Vec<u8>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let f: ProgressFn = Arc::new(move |p| seen2.lock().unwrap().push(p));
        (f, seen)
    }

    #[test]
    fn endpoints_keep_trailing_slash_and_encode_task_id() {
        let client = HttpIngestClient::new(&config("http://localhost:8000")).unwrap();
        assert_eq!(
            client.upload_url().as_str(),
            "http://localhost:8000/api/upload-file/"
        );
        assert_eq!(
            client.status_url(&TaskId::new("a/b c")).as_str(),
            "http://localhost:8000/api/task-status/a%2Fb%20c/"
        );

        let nested = HttpIngestClient::new(&config("http://localhost:8000/backend/")).unwrap();
        assert_eq!(
            nested.status_url(&TaskId::new("t1")).as_str(),
            "http://localhost:8000/backend/api/task-status/t1/"
        );
    }

    #[test]
    fn rejects_unusable_base_url() {
        assert!(HttpIngestClient::new(&config("not a url")).is_err());
        assert!(HttpIngestClient::new(&config("mailto:someone@example.com")).is_err());
    }

    #[tokio::test]
    async fn upload_sends_multipart_field_and_returns_task_id() {
        let received = Arc::new(Mutex::new(Vec::<u8>::new()));
        let received2 = received.clone();
        let app = Router::new().route(
            "/api/upload-file/",
            post(move |body: axum::body::Bytes| {
                let received = received2.clone();
                async move {
                    received.lock().unwrap().extend_from_slice(&body);
                    Json(serde_json::json!({ "task_id": "t1" }))
                }
            }),
        );
        let base = serve(app).await;
        let client = HttpIngestClient::new(&config(&base)).unwrap();
        let (_guard, file) = temp_csv(300 * 1024);
        let (on_progress, seen) = recorder();

        let task_id = client.upload(&file, on_progress).await.unwrap();

        assert_eq!(task_id, TaskId::new("t1"));
        let body = String::from_utf8_lossy(&received.lock().unwrap()).into_owned();
        assert!(body.contains("name=\"file\""));
        assert!(body.contains("filename=\"data.csv\""));

        let seen = seen.lock().unwrap().clone();
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
        assert_eq!(seen.last(), Some(&100));
    }

    #[tokio::test]
    async fn upload_surfaces_server_error_string() {
        let app = Router::new().route(
            "/api/upload-file/",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "error": "unsupported encoding" })),
                )
            }),
        );
        let base = serve(app).await;
        let client = HttpIngestClient::new(&config(&base)).unwrap();
        let (_guard, file) = temp_csv(10);
        let (on_progress, _) = recorder();

        let err = client.upload(&file, on_progress).await.unwrap_err();
        assert_eq!(err, UploadError::Rejected("unsupported encoding".into()));
    }

    #[tokio::test]
    async fn upload_falls_back_to_generic_message() {
        let app = Router::new().route(
            "/api/upload-file/",
            post(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
        );
        let base = serve(app).await;
        let client = HttpIngestClient::new(&config(&base)).unwrap();
        let (_guard, file) = temp_csv(10);
        let (on_progress, _) = recorder();

        let err = client.upload(&file, on_progress).await.unwrap_err();
        assert_eq!(
            err,
            UploadError::Rejected("server responded with HTTP 502".into())
        );
    }

    #[tokio::test]
    async fn upload_without_task_id_is_malformed() {
        let app = Router::new().route(
            "/api/upload-file/",
            post(|| async { Json(serde_json::json!({ "message": "ok" })) }),
        );
        let base = serve(app).await;
        let client = HttpIngestClient::new(&config(&base)).unwrap();
        let (_guard, file) = temp_csv(10);
        let (on_progress, _) = recorder();

        let err = client.upload(&file, on_progress).await.unwrap_err();
        assert!(matches!(err, UploadError::Malformed(_)), "{err:?}");
    }

    #[tokio::test]
    async fn upload_reports_connection_failure() {
        // Bind and drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = HttpIngestClient::new(&config(&format!("http://{addr}"))).unwrap();
        let (_guard, file) = temp_csv(10);
        let (on_progress, _) = recorder();

        let err = client.upload(&file, on_progress).await.unwrap_err();
        assert!(matches!(err, UploadError::Network(_)), "{err:?}");
    }

    #[tokio::test]
    async fn task_status_parses_success_and_failure_bodies() {
        let app = Router::new().route(
            "/api/task-status/:task_id/",
            get(|Path(task_id): Path<String>| async move {
                match task_id.as_str() {
                    "ok" => (
                        StatusCode::OK,
                        Json(serde_json::json!({
                            "status": "SUCCESS",
                            "inferred_types": { "age": "Int", "name": "Text" }
                        })),
                    ),
                    "bad" => (
                        StatusCode::OK,
                        Json(serde_json::json!({ "status": "FAILURE", "error": "bad header" })),
                    ),
                    _ => (
                        StatusCode::NOT_FOUND,
                        Json(serde_json::json!({ "detail": "no such task" })),
                    ),
                }
            }),
        );
        let base = serve(app).await;
        let client = HttpIngestClient::new(&config(&base)).unwrap();

        let ok = client.task_status(&TaskId::new("ok")).await.unwrap();
        assert_eq!(ok.status, "SUCCESS");
        assert_eq!(ok.inferred_types.unwrap().get("age").map(String::as_str), Some("Int"));

        let bad = client.task_status(&TaskId::new("bad")).await.unwrap();
        assert_eq!(bad.status, "FAILURE");
        assert_eq!(bad.error.as_deref(), Some("bad header"));

        let missing = client.task_status(&TaskId::new("gone")).await.unwrap_err();
        assert_eq!(missing, PollError::Status(404));
    }
}
