//! Failure taxonomy for upload sessions.
//!
//! Every stage error is absorbed into a [`SessionError`] whose `Display` text becomes the
//! session's `error_message`; none of them escape the orchestrator.

use thiserror::Error;

/// Local checks that run before any network activity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no file selected")]
    NoFileSelected,
    #[error("unsupported file type")]
    UnsupportedType,
    #[error("file too large")]
    TooLarge,
}

/// Failure of the multipart transfer to the ingestion endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("could not read file: {0}")]
    Read(String),
    #[error("network error: {0}")]
    Network(String),
    /// Non-2xx response. Carries the server's `error` string when it sent one.
    #[error("{0}")]
    Rejected(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Failure to obtain a usable task status. Distinct from a job that reports `FAILURE`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    #[error("network error: {0}")]
    Network(String),
    #[error("server responded with HTTP {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OverrideError {
    #[error("overrides are only accepted after a successful inference")]
    NotSucceeded,
    #[error("unknown column '{0}'")]
    UnknownColumn(String),
    #[error("unknown type tag '{0}'")]
    UnknownTag(String),
    #[error("expected COLUMN=TYPE, got '{0}'")]
    Syntax(String),
    #[error("session is no longer running")]
    SessionClosed,
}

/// Terminal failure of a session, one variant per user-visible category.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("upload failed: {0}")]
    Transport(#[from] UploadError),
    /// The poll detail is logged, not shown.
    #[error("error fetching task status")]
    Poll,
    #[error("data processing failed: {0}")]
    JobFailure(String),
}
