//! Pieces shared by the upload and download commands
//!
//! Remote paths are written `alias/bucket/key`. The alias resolves to an
//! endpoint and credentials from the configuration file; transfer options
//! fall back to the `[defaults]` table of that file.

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Args;
use mpx_core::{
    AliasManager, ConfigManager, Error, ProgressPolicy, TransferDefaults, TransferEvent,
};
use mpx_s3::S3Client;

use crate::exit_code::ExitCode;
use crate::output::{Formatter, TransferProgress};

/// Options common to uploads and downloads
#[derive(Args, Debug, Clone, Default)]
pub struct TransferArgs {
    /// Part size (e.g., 8MiB, 64M, 1G); raised automatically above 10,000 parts
    #[arg(long, value_parser = parse_size)]
    pub part_size: Option<u64>,

    /// Number of parts transferred concurrently
    #[arg(long, short = 't')]
    pub tasks: Option<usize>,

    /// Do not read or write a checkpoint file
    #[arg(long, conflicts_with = "checkpoint")]
    pub no_checkpoint: bool,

    /// Checkpoint file location (default: next to the local file)
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    /// Update progress every N bytes instead of twice a second
    #[arg(long, value_parser = parse_size)]
    pub progress_bytes: Option<u64>,

    /// Suppress the progress bar and success message
    #[arg(long, short = 'q')]
    pub quiet: bool,
}

/// Transfer options after applying configured defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOptions {
    pub part_size: u64,
    pub task_count: usize,
    pub checkpoint: bool,
    pub checkpoint_path: Option<PathBuf>,
    pub progress: ProgressPolicy,
}

impl TransferArgs {
    pub fn resolve(&self, defaults: &TransferDefaults) -> ResolvedOptions {
        ResolvedOptions {
            part_size: self.part_size.unwrap_or(defaults.part_size),
            task_count: self.tasks.unwrap_or(defaults.task_count),
            checkpoint: !self.no_checkpoint && defaults.checkpoint,
            checkpoint_path: self.checkpoint.clone(),
            progress: self
                .progress_bytes
                .map(ProgressPolicy::ByBytes)
                .unwrap_or_default(),
        }
    }
}

/// A parsed `alias/bucket/key` path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub alias: String,
    pub bucket: String,
    /// May be empty (`alias/bucket` or `alias/bucket/`)
    pub key: String,
}

impl RemoteTarget {
    pub fn parse(path: &str) -> anyhow::Result<Self> {
        let mut segments = path.splitn(3, '/');
        let alias = segments.next().unwrap_or_default();
        let bucket = segments.next().unwrap_or_default();
        let key = segments.next().unwrap_or_default();
        if alias.is_empty() || bucket.is_empty() {
            bail!("Invalid remote path '{path}': expected alias/bucket/key");
        }
        Ok(Self {
            alias: alias.to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

impl std::fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.alias, self.bucket, self.key)
    }
}

/// Parse a size such as `8MiB`, `64M`, `1G` or `4096`
///
/// Suffixes are binary: `K`, `KB` and `KiB` all mean 1024.
pub fn parse_size(s: &str) -> anyhow::Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        bail!("Size cannot be empty");
    }

    let suffix_start = s.find(|c: char| c.is_ascii_alphabetic()).unwrap_or(s.len());
    let (num_str, suffix) = s.split_at(suffix_start);
    let num: u64 = num_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid size number: {num_str}"))?;

    let multiplier: u64 = match suffix.to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1 << 10,
        "M" | "MB" | "MIB" => 1 << 20,
        "G" | "GB" | "GIB" => 1 << 30,
        "T" | "TB" | "TIB" => 1 << 40,
        _ => bail!("Unknown size suffix: {suffix}"),
    };
    let size = num
        .checked_mul(multiplier)
        .with_context(|| format!("Size too large: {s}"))?;
    if size == 0 {
        bail!("Size must be greater than zero");
    }
    Ok(size)
}

/// Configured transfer defaults and an S3 client for `alias`
pub async fn connect(
    alias: &str,
    formatter: &Formatter,
) -> Result<(TransferDefaults, S3Client), ExitCode> {
    let config_manager = match ConfigManager::new() {
        Ok(manager) => manager,
        Err(e) => {
            formatter.error(&format!("Failed to locate configuration: {e}"));
            return Err(ExitCode::GeneralError);
        }
    };
    let config = match config_manager.load() {
        Ok(config) => config,
        Err(e) => {
            formatter.error(&format!("Failed to load configuration: {e}"));
            return Err(ExitCode::GeneralError);
        }
    };

    let alias = match AliasManager::with_config(config_manager).get(alias) {
        Ok(alias) => alias,
        Err(Error::AliasNotFound(_)) => {
            formatter.error(&format!("Alias '{alias}' not found"));
            return Err(ExitCode::NotFound);
        }
        Err(e) => {
            formatter.error(&format!("Failed to load aliases: {e}"));
            return Err(ExitCode::GeneralError);
        }
    };

    match S3Client::new(alias).await {
        Ok(client) => Ok((config.defaults, client)),
        Err(e) => {
            formatter.error(&format!("Failed to create S3 client: {e}"));
            Err(ExitCode::NetworkError)
        }
    }
}

/// Event sink that surfaces checkpoint decisions to the user
pub fn event_reporter(progress: TransferProgress) -> impl Fn(&TransferEvent) + Send + Sync {
    move |event: &TransferEvent| match event {
        TransferEvent::CheckpointResumed { completed, pending } => progress.println(&format!(
            "Resuming: {completed} parts already transferred, {pending} remaining"
        )),
        TransferEvent::CheckpointDiscarded { reason } => {
            progress.println(&format!("Starting over: {reason}"))
        }
        _ => {}
    }
}

/// Report a failed transfer and pick its exit code
pub fn report_failure(
    formatter: &Formatter,
    what: &str,
    error: &Error,
    checkpoint_enabled: bool,
) -> ExitCode {
    formatter.error(&format!("{what} failed: {error}"));
    if checkpoint_enabled && error.is_resumable() {
        formatter.note("Progress was saved; run the same command again to resume.");
    }
    ExitCode::from_error(error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("8MiB").unwrap(), 8 * 1024 * 1024);
        assert_eq!(parse_size("64M").unwrap(), 64 * 1024 * 1024);
        assert_eq!(parse_size("1g").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_size("5 KB").unwrap(), 5 * 1024);
        assert!(parse_size("").is_err());
        assert!(parse_size("0").is_err());
        assert!(parse_size("12XB").is_err());
        assert!(parse_size("MiB").is_err());
    }

    #[test]
    fn test_remote_target_parse() {
        let target = RemoteTarget::parse("local/bucket/dir/file.bin").unwrap();
        assert_eq!(target.alias, "local");
        assert_eq!(target.bucket, "bucket");
        assert_eq!(target.key, "dir/file.bin");
        assert_eq!(target.to_string(), "local/bucket/dir/file.bin");

        let bucket_only = RemoteTarget::parse("local/bucket").unwrap();
        assert!(bucket_only.key.is_empty());

        assert!(RemoteTarget::parse("local").is_err());
        assert!(RemoteTarget::parse("/bucket/key").is_err());
    }

    #[test]
    fn test_resolve_applies_defaults() {
        let defaults = TransferDefaults {
            part_size: 16 * 1024 * 1024,
            task_count: 8,
            checkpoint: true,
        };
        let args = TransferArgs {
            tasks: Some(2),
            no_checkpoint: true,
            progress_bytes: Some(1024),
            ..Default::default()
        };
        let resolved = args.resolve(&defaults);
        assert_eq!(resolved.part_size, 16 * 1024 * 1024);
        assert_eq!(resolved.task_count, 2);
        assert!(!resolved.checkpoint);
        assert_eq!(resolved.progress, ProgressPolicy::ByBytes(1024));
    }
}
