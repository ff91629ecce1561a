mod cli;
mod error;
mod ingest;
mod model;
mod orchestrator;
mod text_summary;
mod validator;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Logs go to stderr so stdout stays clean for summaries and JSON.
fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_silent = args.silent;
    init_tracing(if is_silent { "error" } else { args.log_level.as_str() });

    match cli::run(args).await {
        Ok(cli::RunOutcome::Succeeded) => Ok(()),
        Ok(cli::RunOutcome::SessionFailed) => std::process::exit(1),
        Err(e) => {
            if is_silent {
                println!("{}", e);
                std::process::exit(1);
            } else {
                Err(e)
            }
        }
    }
}
