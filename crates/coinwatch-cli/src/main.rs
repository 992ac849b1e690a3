mod cli;
mod commands;
mod error;
mod output;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use coinwatch_core::{Clock, SystemClock};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout carries only JSON bodies.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    match commands::run(&cli, clock.clone()).await {
        Ok(code) => code,
        Err(error) => {
            output::render_error(&error, clock.now(), cli.pretty);
            ExitCode::from(error.exit_code())
        }
    }
}
