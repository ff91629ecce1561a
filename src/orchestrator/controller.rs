//! Session lifecycle controller.
//!
//! Owns the single active session, drives validate -> upload -> poll, and emits a snapshot
//! for presentation layers on every state change.

use crate::error::{OverrideError, SessionError, UploadError, ValidationError};
use crate::ingest::{IngestApi, PollHandle, PollUpdate, ProgressFn, TaskPoller};
use crate::model::{
    FileMeta, SelectedFile, SessionConfig, SessionStatus, TaskId, TypeTag, UploadSession,
};
use crate::validator;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Commands from presentation layers.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    /// Attach a file to a fresh idle session without starting it.
    Select(SelectedFile),
    /// Start a submission, superseding whatever is in flight. `None` submits the attached file.
    Submit(Option<SelectedFile>),
    Override {
        column: String,
        tag: TypeTag,
        reply: Option<oneshot::Sender<Result<(), OverrideError>>>,
    },
    ClearOverride(String),
    Quit,
}

#[derive(Debug)]
pub(crate) enum UploadEvent {
    Progress(u8),
    Finished(Result<TaskId, UploadError>),
}

pub(crate) struct SessionOrchestrator {
    api: Arc<dyn IngestApi>,
    cfg: SessionConfig,
    snapshot_tx: UnboundedSender<UploadSession>,
    session: UploadSession,
    attached: Option<SelectedFile>,
    next_id: u64,
    upload_task: Option<JoinHandle<()>>,
    poller: Option<PollHandle>,
}

impl SessionOrchestrator {
    pub fn new(
        api: Arc<dyn IngestApi>,
        cfg: SessionConfig,
        snapshot_tx: UnboundedSender<UploadSession>,
    ) -> Self {
        Self {
            api,
            cfg,
            snapshot_tx,
            session: UploadSession::new(0, None),
            attached: None,
            next_id: 0,
            upload_task: None,
            poller: None,
        }
    }

    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    fn emit(&self) {
        let _ = self.snapshot_tx.send(self.session.clone());
    }

    /// Stop every stage task that belongs to the current session.
    fn supersede(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.cancel();
        }
        if let Some(task) = self.upload_task.take() {
            debug!(session = self.session.id(), "aborting in-flight upload");
            task.abort();
        }
    }

    fn fresh_session(&mut self, file: Option<FileMeta>) {
        self.supersede();
        self.attached = None;
        self.next_id += 1;
        self.session = UploadSession::new(self.next_id, file);
    }

    fn finish_failed(&mut self, err: SessionError) {
        self.supersede();
        warn!(session = self.session.id(), error = %err, "session failed");
        self.session.fail(&err);
        self.emit();
    }

    pub fn select(&mut self, file: SelectedFile) {
        self.fresh_session(Some(file.meta.clone()));
        self.attached = Some(file);
        self.emit();
    }

    /// Start a submission. Returns the event stream of the upload stage when one was started.
    pub fn submit(&mut self, file: Option<SelectedFile>) -> Option<UnboundedReceiver<UploadEvent>> {
        let file = file.or_else(|| self.attached.take());
        let meta = file.as_ref().map(|f| f.meta.clone());

        // An untouched idle session becomes the submission; anything else is replaced.
        let reuse_idle = self.session.status() == SessionStatus::Idle
            && self.upload_task.is_none()
            && self.poller.is_none()
            && (self.session.file().is_none() || self.session.file() == meta.as_ref());
        if reuse_idle {
            self.attached = None;
            self.session = UploadSession::new(self.session.id(), meta);
        } else {
            self.fresh_session(meta);
        }

        info!(
            session = self.session.id(),
            file = self.session.file().map(|f| f.name.as_str()).unwrap_or("-"),
            "submitting"
        );
        self.session.begin_validation();
        self.emit();

        let checked = validator::check_selection(file.as_ref().map(|f| &f.meta));
        let file = match (file, checked) {
            (Some(file), Ok(())) => file,
            (_, Err(e)) => {
                self.finish_failed(e.into());
                return None;
            }
            (None, Ok(())) => {
                self.finish_failed(ValidationError::NoFileSelected.into());
                return None;
            }
        };

        self.session.begin_upload();
        self.emit();

        let (tx, rx) = mpsc::unbounded_channel();
        let progress_tx = tx.clone();
        let on_progress: ProgressFn = Arc::new(move |p| {
            let _ = progress_tx.send(UploadEvent::Progress(p));
        });
        let api = self.api.clone();
        self.upload_task = Some(tokio::spawn(async move {
            let res = api.upload(&file, on_progress).await;
            let _ = tx.send(UploadEvent::Finished(res));
        }));
        Some(rx)
    }

    /// Apply an upload event. Returns the poll stream once a task handle is obtained.
    pub fn on_upload_event(&mut self, ev: UploadEvent) -> Option<UnboundedReceiver<PollUpdate>> {
        if self.session.status() != SessionStatus::Uploading {
            debug!(session = self.session.id(), "ignoring upload event outside Uploading");
            return None;
        }
        match ev {
            UploadEvent::Progress(p) => {
                if self.session.record_progress(p) {
                    self.emit();
                }
                None
            }
            UploadEvent::Finished(Ok(task_id)) => {
                self.upload_task = None;
                info!(session = self.session.id(), %task_id, "upload accepted, polling");
                self.session.begin_polling(task_id.clone());
                self.emit();
                let (handle, rx) =
                    TaskPoller::start(self.api.clone(), task_id, self.cfg.poll_interval);
                self.poller = Some(handle);
                Some(rx)
            }
            UploadEvent::Finished(Err(e)) => {
                self.upload_task = None;
                self.finish_failed(SessionError::Transport(e));
                None
            }
        }
    }

    /// The upload task went away without reporting a result.
    pub fn on_upload_closed(&mut self) {
        if self.session.status() == SessionStatus::Uploading {
            self.finish_failed(SessionError::Transport(UploadError::Network(
                "upload ended unexpectedly".into(),
            )));
        }
    }

    /// Apply a poll update. Returns true when no further updates are expected.
    pub fn on_poll_update(&mut self, update: PollUpdate) -> bool {
        if self.session.status() != SessionStatus::Polling {
            return true;
        }
        match update {
            PollUpdate::Progress(label) => {
                if self.session.record_status_label(label) {
                    self.emit();
                }
                false
            }
            PollUpdate::Completed(schema) => {
                self.supersede();
                info!(session = self.session.id(), columns = schema.len(), "session succeeded");
                self.session.succeed(schema);
                self.emit();
                true
            }
            PollUpdate::Failed(err) => {
                self.finish_failed(err);
                true
            }
        }
    }

    /// The poll stream ended without a terminal update.
    pub fn on_poll_closed(&mut self) {
        if self.session.status() == SessionStatus::Polling {
            self.finish_failed(SessionError::Poll);
        }
    }

    pub fn set_override(&mut self, column: &str, tag: TypeTag) -> Result<(), OverrideError> {
        self.session.set_override(column, tag)?;
        self.emit();
        Ok(())
    }

    pub fn clear_override(&mut self, column: &str) {
        if self.session.clear_override(column) {
            self.emit();
        }
    }

    pub fn shutdown(&mut self) {
        self.supersede();
    }
}

async fn next_event<T>(rx: &mut Option<UnboundedReceiver<T>>) -> Option<T> {
    match rx.as_mut() {
        Some(rx) => rx.recv().await,
        None => futures::future::pending().await,
    }
}

/// Serialize commands, upload events and poll updates for one orchestrator.
///
/// Stage receivers belong to the active session only: a new submission drops them, so late
/// responses for a superseded session have nowhere to land.
pub(crate) async fn run_controller(
    mut orch: SessionOrchestrator,
    mut cmd_rx: UnboundedReceiver<SessionCommand>,
) -> Result<()> {
    let mut upload_rx: Option<UnboundedReceiver<UploadEvent>> = None;
    let mut poll_rx: Option<UnboundedReceiver<PollUpdate>> = None;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SessionCommand::Select(file)) => {
                        upload_rx = None;
                        poll_rx = None;
                        orch.select(file);
                    }
                    Some(SessionCommand::Submit(file)) => {
                        poll_rx = None;
                        upload_rx = orch.submit(file);
                    }
                    Some(SessionCommand::Override { column, tag, reply }) => {
                        let res = orch.set_override(&column, tag);
                        if let Err(e) = &res {
                            warn!(%column, %tag, error = %e, "override rejected");
                        }
                        if let Some(reply) = reply {
                            let _ = reply.send(res);
                        }
                    }
                    Some(SessionCommand::ClearOverride(column)) => {
                        orch.clear_override(&column);
                    }
                    Some(SessionCommand::Quit) | None => {
                        orch.shutdown();
                        break;
                    }
                }
            }
            ev = next_event(&mut upload_rx) => {
                match ev {
                    Some(ev) => {
                        let next = orch.on_upload_event(ev);
                        if orch.session().status() != SessionStatus::Uploading {
                            upload_rx = None;
                        }
                        if next.is_some() {
                            poll_rx = next;
                        }
                    }
                    None => {
                        upload_rx = None;
                        orch.on_upload_closed();
                    }
                }
            }
            update = next_event(&mut poll_rx) => {
                match update {
                    Some(update) => {
                        if orch.on_poll_update(update) {
                            poll_rx = None;
                        }
                    }
                    None => {
                        poll_rx = None;
                        orch.on_poll_closed();
                    }
                }
            }
        }
    }

    Ok(())
}

/// Caller-side handle to a running controller.
#[derive(Clone)]
pub(crate) struct SessionHandle {
    cmd_tx: UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn select(&self, file: SelectedFile) {
        let _ = self.cmd_tx.send(SessionCommand::Select(file));
    }

    pub fn submit(&self, file: Option<SelectedFile>) {
        let _ = self.cmd_tx.send(SessionCommand::Submit(file));
    }

    pub async fn set_override(&self, column: &str, tag: TypeTag) -> Result<(), OverrideError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::Override {
                column: column.to_string(),
                tag,
                reply: Some(reply_tx),
            })
            .map_err(|_| OverrideError::SessionClosed)?;
        reply_rx.await.map_err(|_| OverrideError::SessionClosed)?
    }

    /// Revert a column to its inferred type. The CLI applies overrides once and never clears them.
    #[allow(dead_code)]
    pub fn clear_override(&self, column: &str) {
        let _ = self
            .cmd_tx
            .send(SessionCommand::ClearOverride(column.to_string()));
    }

    pub fn quit(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Quit);
    }
}

/// Spawn a controller and return its handle, snapshot stream and join handle.
pub(crate) fn spawn_session(
    api: Arc<dyn IngestApi>,
    cfg: SessionConfig,
) -> (
    SessionHandle,
    UnboundedReceiver<UploadSession>,
    JoinHandle<Result<()>>,
) {
    let (snapshot_tx, snapshot_rx) = mpsc::unbounded_channel();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let orch = SessionOrchestrator::new(api, cfg, snapshot_tx);
    let handle = tokio::spawn(run_controller(orch, cmd_rx));
    (SessionHandle { cmd_tx }, snapshot_rx, handle)
}
