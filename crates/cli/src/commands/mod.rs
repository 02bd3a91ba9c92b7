//! Command definitions and dispatch

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::exit_code::ExitCode;
use crate::output::OutputConfig;

mod alias;
mod checkpoint;
mod download;
mod transfer;
mod upload;

/// mpx - resumable multipart transfers for S3-compatible storage
#[derive(Parser, Debug)]
#[command(name = "mpx", version, about, long_about = None)]
pub struct Cli {
    /// Output results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload a local file in parts
    Upload(upload::UploadArgs),

    /// Download an object with concurrent ranged reads
    Download(download::DownloadArgs),

    /// Inspect or delete transfer checkpoints
    #[command(subcommand)]
    Checkpoint(checkpoint::CheckpointCommands),

    /// Manage storage aliases
    #[command(subcommand)]
    Alias(alias::AliasCommands),

    /// Generate shell completion scripts
    Completions {
        /// Target shell
        shell: Shell,
    },
}

/// Run the selected command
pub async fn execute(cli: Cli) -> ExitCode {
    let output_config = OutputConfig {
        json: cli.json,
        no_color: cli.no_color,
        quiet: false,
    };

    match cli.command {
        Commands::Upload(args) => upload::execute(args, output_config).await,
        Commands::Download(args) => download::execute(args, output_config).await,
        Commands::Checkpoint(cmd) => checkpoint::execute(cmd, output_config).await,
        Commands::Alias(cmd) => alias::execute(cmd, output_config).await,
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "mpx", &mut std::io::stdout());
            ExitCode::Success
        }
    }
}
