use crate::error::OverrideError;
use crate::ingest::HttpIngestClient;
use crate::model::{SelectedFile, SessionConfig, SessionStatus, TypeTag, UploadSession};
use crate::orchestrator::{process_session_completion, spawn_session};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

/// Parse `COLUMN=TYPE`. The last `=` separates the tag, so column names may contain `=`.
pub(crate) fn parse_override(s: &str) -> Result<(String, TypeTag), OverrideError> {
    let (column, tag) = s
        .rsplit_once('=')
        .ok_or_else(|| OverrideError::Syntax(s.to_string()))?;
    if column.is_empty() {
        return Err(OverrideError::Syntax(s.to_string()));
    }
    Ok((column.to_string(), tag.parse()?))
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "datamorph",
    version,
    about = "Upload a CSV/Excel file and report the column types the backend infers"
)]
pub struct Cli {
    /// File to upload (.csv, .xls, .xlsx, up to 50 MiB)
    pub file: Option<std::path::PathBuf>,

    /// Base URL of the ingestion service
    #[arg(long, default_value = "http://localhost:8000")]
    pub base_url: String,

    /// Delay between task status requests
    #[arg(long, default_value = "2s")]
    pub poll_interval: humantime::Duration,

    /// Override an inferred column type, e.g. --override age=Float (repeatable)
    #[arg(long = "override", value_name = "COLUMN=TYPE", value_parser = parse_override)]
    pub overrides: Vec<(String, TypeTag)>,

    /// Print the session report as JSON and exit
    #[arg(long)]
    pub json: bool,

    /// Run silently: suppress all output except errors (for scripting)
    #[arg(long)]
    pub silent: bool,

    /// Export the session report as JSON
    #[arg(long)]
    pub export_json: Option<std::path::PathBuf>,

    /// Log filter used when RUST_LOG is unset (e.g. info, debug, datamorph=trace)
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

/// How a finished run ended. A failed session has already been reported in the summary or
/// JSON output, so it only needs to set the exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    SessionFailed,
}

pub async fn run(args: Cli) -> Result<RunOutcome> {
    // Validate that --silent can only be used with --json
    if args.silent && !args.json {
        return Err(anyhow::anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }

    run_session(args).await
}

/// Build a `SessionConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> SessionConfig {
    SessionConfig {
        base_url: args.base_url.clone(),
        poll_interval: Duration::from(args.poll_interval),
        user_agent: format!("datamorph/{}", env!("CARGO_PKG_VERSION")),
    }
}

/// Progress lines for text mode, emitted only when something the user sees has changed.
fn progress_line(prev: Option<&UploadSession>, s: &UploadSession) -> Option<String> {
    let status_changed = prev.map(|p| p.status()) != Some(s.status());
    match s.status() {
        SessionStatus::Uploading
            if status_changed || prev.map(|p| p.upload_progress()) != Some(s.upload_progress()) =>
        {
            Some(format!("Upload progress: {}%", s.upload_progress()))
        }
        SessionStatus::Polling if status_changed => Some(format!(
            "File uploaded successfully, processing data (task {})...",
            s.task_id().map(|t| t.as_str()).unwrap_or("-")
        )),
        SessionStatus::Polling if prev.and_then(|p| p.status_label()) != s.status_label() => s
            .status_label()
            .map(|label| format!("Task status: {label}")),
        SessionStatus::Validating if status_changed => Some("Validating file...".to_string()),
        _ => None,
    }
}

async fn run_session(args: Cli) -> Result<RunOutcome> {
    let cfg = build_config(&args);
    let client = HttpIngestClient::new(&cfg)?;
    let text_mode = !args.json;

    let selection = match args.file.as_deref() {
        Some(path) => Some(
            SelectedFile::from_path(path)
                .with_context(|| format!("cannot read {}", path.display()))?,
        ),
        None => None,
    };
    let file_name = selection.as_ref().map(|f| f.meta.name.clone());

    let (out_tx, out_handle) = if args.silent {
        (None, None)
    } else {
        let (tx, handle) = spawn_output_writer();
        (Some(tx), Some(handle))
    };
    let say = |line: OutputLine| {
        if let Some(tx) = out_tx.as_ref() {
            let _ = tx.send(line);
        }
    };

    let (handle, mut snapshots, join) = spawn_session(Arc::new(client), cfg.clone());
    match selection {
        Some(file) => {
            handle.select(file);
            handle.submit(None);
        }
        None => handle.submit(None),
    }

    let mut last: Option<UploadSession> = None;
    let interrupted = loop {
        tokio::select! {
            snapshot = snapshots.recv() => {
                let Some(s) = snapshot else { break false };
                if text_mode {
                    if let Some(line) = progress_line(last.as_ref(), &s) {
                        say(OutputLine::Stderr(line));
                    }
                }
                let done = s.status().is_terminal();
                last = Some(s);
                if done {
                    break false;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                break true;
            }
        }
    };

    if interrupted {
        handle.quit();
        let _ = join.await;
        return Err(anyhow::anyhow!("interrupted"));
    }

    if last.as_ref().map(|s| s.status()) == Some(SessionStatus::Succeeded) {
        for (column, tag) in &args.overrides {
            if let Err(e) = handle.set_override(column, *tag).await {
                say(OutputLine::Stderr(format!(
                    "Override {column}={tag} ignored: {e}"
                )));
            }
        }
        // Override snapshots are sent before the reply, so they are already queued.
        while let Ok(s) = snapshots.try_recv() {
            last = Some(s);
        }
    }

    handle.quit();
    join.await
        .context("session task failed")?
        .context("session controller failed")?;

    let session = last.context("session ended without reporting a state")?;
    let processed = process_session_completion(&args, &cfg, file_name.as_deref(), &session)?;

    if args.json {
        let out = serde_json::to_string_pretty(&processed.report)?;
        say(OutputLine::Stdout(out));
    } else {
        let summary = crate::text_summary::build_text_summary(&processed.report);
        for line in summary.lines {
            say(OutputLine::Stdout(line));
        }
    }
    for msg in processed.export_messages {
        say(OutputLine::Stderr(msg));
    }

    drop(out_tx);
    if let Some(handle) = out_handle {
        let _ = handle.await;
    }

    if session.status() == SessionStatus::Failed {
        Ok(RunOutcome::SessionFailed)
    } else {
        Ok(RunOutcome::Succeeded)
    }
}
