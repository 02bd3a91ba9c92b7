//! mpx - resumable multipart transfer CLI
//!
//! Uploads and downloads large objects against S3-compatible storage,
//! saving progress so interrupted transfers pick up where they stopped.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod exit_code;
mod output;

use commands::Cli;

/// Environment variable holding a tracing filter (e.g., `mpx_core=debug`)
const LOG_ENV: &str = "MPX_LOG";

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("mpx=debug,mpx_core=debug,mpx_s3=debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);
    commands::execute(cli).await.into()
}
