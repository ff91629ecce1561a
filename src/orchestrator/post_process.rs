//! Post-session processing utilities.
//!
//! Layers overrides over the inferred schema, builds the serializable report and handles
//! exports once a session reaches a terminal state.

use crate::cli::Cli;
use crate::model::{InferredSchema, SessionConfig, SessionStatus, TaskId, TypeTag, UploadSession};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Final outcome of one session, ready for JSON output or export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub timestamp_utc: String,
    pub base_url: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub task_id: Option<TaskId>,
    pub status: SessionStatus,
    #[serde(default)]
    pub inferred_schema: Option<InferredSchema>,
    #[serde(default)]
    pub overrides: BTreeMap<String, TypeTag>,
    #[serde(default)]
    pub effective_schema: Option<InferredSchema>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Result of post-session processing, ready for presentation layers.
pub(crate) struct ProcessedSession {
    pub report: SessionReport,
    pub export_messages: Vec<String>,
}

/// Inferred schema with user overrides applied on top. `None` unless the session succeeded.
pub fn effective_schema(session: &UploadSession) -> Option<InferredSchema> {
    let mut schema = session.inferred_schema()?.clone();
    for (column, tag) in session.overrides() {
        if let Some(slot) = schema.get_mut(column) {
            *slot = tag.to_string();
        }
    }
    Some(schema)
}

pub fn build_report(
    cfg: &SessionConfig,
    file_name: Option<&str>,
    session: &UploadSession,
) -> SessionReport {
    SessionReport {
        timestamp_utc: time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "now".into()),
        base_url: cfg.base_url.clone(),
        file_name: file_name.map(str::to_string),
        task_id: session.task_id().cloned(),
        status: session.status(),
        inferred_schema: session.inferred_schema().cloned(),
        overrides: session.overrides().clone(),
        effective_schema: effective_schema(session),
        error_message: session.error_message().map(str::to_string),
    }
}

pub fn export_json(path: &Path, report: &SessionReport) -> Result<()> {
    let out = serde_json::to_string_pretty(report).context("failed to serialize report")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, out).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Process a finished session: build the report and run the requested exports.
/// Export errors propagate so scripted runs see a non-zero exit.
pub(crate) fn process_session_completion(
    args: &Cli,
    cfg: &SessionConfig,
    file_name: Option<&str>,
    session: &UploadSession,
) -> Result<ProcessedSession> {
    let report = build_report(cfg, file_name, session);

    let mut export_messages = Vec::new();
    if let Some(export_path) = args.export_json.as_deref() {
        export_json(export_path, &report).context("export JSON failed")?;
        export_messages.push(format!("Exported JSON: {}", export_path.display()));
    }

    Ok(ProcessedSession {
        report,
        export_messages,
    })
}
