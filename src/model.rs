use crate::error::{OverrideError, SessionError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Column name -> type tag as reported by the backend. Passed through unmodified.
pub type InferredSchema = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    pub user_agent: String,
}

/// Metadata of a user-selected file. Never carries file contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub name: String,
    pub size: u64,
    pub extension: Option<String>,
}

impl FileMeta {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        let name = name.into();
        let extension = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase());
        Self {
            name,
            size,
            extension,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub path: PathBuf,
    pub meta: FileMeta,
}

impl SelectedFile {
    pub fn new(path: impl Into<PathBuf>, meta: FileMeta) -> Self {
        Self {
            path: path.into(),
            meta,
        }
    }

    /// Build a selection from a path on disk. Only metadata is read.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let md = std::fs::metadata(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(path, FileMeta::new(name, md.len())))
    }
}

/// Opaque server-issued task handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Type tags offered for per-column overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeTag {
    Complex,
    Date,
    Int,
    Float,
    Text,
    TimeDelta,
    Bool,
    Category,
}

impl TypeTag {
    pub const ALL: [TypeTag; 8] = [
        TypeTag::Complex,
        TypeTag::Date,
        TypeTag::Int,
        TypeTag::Float,
        TypeTag::Text,
        TypeTag::TimeDelta,
        TypeTag::Bool,
        TypeTag::Category,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TypeTag::Complex => "Complex",
            TypeTag::Date => "Date",
            TypeTag::Int => "Int",
            TypeTag::Float => "Float",
            TypeTag::Text => "Text",
            TypeTag::TimeDelta => "TimeDelta",
            TypeTag::Bool => "Bool",
            TypeTag::Category => "Category",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TypeTag {
    type Err = OverrideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TypeTag::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| OverrideError::UnknownTag(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Idle,
    Validating,
    Uploading,
    Polling,
    Succeeded,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Succeeded | SessionStatus::Failed)
    }
}

/// One user-initiated submission. Only the orchestrator drives transitions;
/// presentation layers receive cloned snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSession {
    id: u64,
    file: Option<FileMeta>,
    status: SessionStatus,
    upload_progress: u8,
    task_id: Option<TaskId>,
    status_label: Option<String>,
    inferred_schema: Option<InferredSchema>,
    error_message: Option<String>,
    overrides: BTreeMap<String, TypeTag>,
}

impl UploadSession {
    pub(crate) fn new(id: u64, file: Option<FileMeta>) -> Self {
        Self {
            id,
            file,
            status: SessionStatus::Idle,
            upload_progress: 0,
            task_id: None,
            status_label: None,
            inferred_schema: None,
            error_message: None,
            overrides: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn file(&self) -> Option<&FileMeta> {
        self.file.as_ref()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn upload_progress(&self) -> u8 {
        self.upload_progress
    }

    pub fn task_id(&self) -> Option<&TaskId> {
        self.task_id.as_ref()
    }

    pub fn status_label(&self) -> Option<&str> {
        self.status_label.as_deref()
    }

    pub fn inferred_schema(&self) -> Option<&InferredSchema> {
        self.inferred_schema.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn overrides(&self) -> &BTreeMap<String, TypeTag> {
        &self.overrides
    }

    pub(crate) fn begin_validation(&mut self) {
        self.status = SessionStatus::Validating;
    }

    pub(crate) fn begin_upload(&mut self) {
        self.status = SessionStatus::Uploading;
        self.upload_progress = 0;
    }

    /// Returns true when the stored value changed. Values never go backwards.
    pub(crate) fn record_progress(&mut self, percent: u8) -> bool {
        let percent = percent.min(100);
        if self.status != SessionStatus::Uploading || percent <= self.upload_progress {
            return false;
        }
        self.upload_progress = percent;
        true
    }

    /// Enter `Polling` with the task handle. The handle is write-once.
    pub(crate) fn begin_polling(&mut self, task_id: TaskId) {
        if self.task_id.is_none() {
            self.task_id = Some(task_id);
        }
        self.file = None;
        self.status = SessionStatus::Polling;
    }

    pub(crate) fn record_status_label(&mut self, label: String) -> bool {
        if self.status != SessionStatus::Polling || self.status_label.as_deref() == Some(&label) {
            return false;
        }
        self.status_label = Some(label);
        true
    }

    pub(crate) fn succeed(&mut self, schema: InferredSchema) {
        self.file = None;
        self.status = SessionStatus::Succeeded;
        self.inferred_schema = Some(schema);
        self.error_message = None;
    }

    pub(crate) fn fail(&mut self, err: &SessionError) {
        self.file = None;
        self.status = SessionStatus::Failed;
        self.inferred_schema = None;
        self.overrides.clear();
        self.error_message = Some(err.to_string());
    }

    pub(crate) fn set_override(&mut self, column: &str, tag: TypeTag) -> Result<(), OverrideError> {
        let schema = match (&self.status, &self.inferred_schema) {
            (SessionStatus::Succeeded, Some(schema)) => schema,
            _ => return Err(OverrideError::NotSucceeded),
        };
        if !schema.contains_key(column) {
            return Err(OverrideError::UnknownColumn(column.to_string()));
        }
        self.overrides.insert(column.to_string(), tag);
        Ok(())
    }

    pub(crate) fn clear_override(&mut self, column: &str) -> bool {
        self.overrides.remove(column).is_some()
    }
}
