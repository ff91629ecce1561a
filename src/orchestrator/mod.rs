//! Application-level orchestration utilities.
//!
//! This module owns the upload-session lifecycle (validate, upload, poll, supersede) and
//! post-session processing such as override layering, reports and exports. CLI layers call
//! into this module to keep responsibilities separated.

mod controller;
mod post_process;

pub(crate) use controller::spawn_session;
pub(crate) use post_process::{process_session_completion, SessionReport};
