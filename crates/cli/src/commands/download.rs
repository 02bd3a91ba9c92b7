//! download command - Fetch an object with concurrent ranged reads
//!
//! Parts land in a `.mpx-part` file next to the destination, which is moved
//! into place only after every part arrived.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use mpx_core::{DownloadRequest, ObjectMeta, TransferController};
use serde::Serialize;

use super::transfer::{self, RemoteTarget, TransferArgs};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig, TransferProgress};

/// Download an object
#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Object to download (alias/bucket/key)
    pub source: String,

    /// Local destination; an existing directory keeps the object's name
    pub destination: PathBuf,

    /// Download a specific object version
    #[arg(long)]
    pub version_id: Option<String>,

    #[command(flatten)]
    pub transfer: TransferArgs,
}

/// JSON output for a finished download
#[derive(Debug, Serialize)]
struct DownloadOutput {
    status: &'static str,
    source: String,
    destination: String,
    size_bytes: u64,
    size_human: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_modified: Option<String>,
}

impl DownloadOutput {
    fn new(source: &RemoteTarget, destination: &Path, meta: &ObjectMeta) -> Self {
        Self {
            status: "success",
            source: source.to_string(),
            destination: destination.display().to_string(),
            size_bytes: meta.size,
            size_human: humansize::format_size(meta.size, humansize::BINARY),
            etag: meta.etag.clone(),
            last_modified: meta.last_modified.map(|ts| ts.to_string()),
        }
    }
}

/// Final file path for `key` given the requested destination
async fn destination_path(requested: &Path, key: &str) -> PathBuf {
    let is_dir = tokio::fs::metadata(requested)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);
    if !is_dir {
        return requested.to_path_buf();
    }
    let name = key.rsplit('/').next().unwrap_or(key);
    requested.join(name)
}

/// Execute the download command
pub async fn execute(args: DownloadArgs, output_config: OutputConfig) -> ExitCode {
    let output_config = OutputConfig {
        quiet: output_config.quiet || args.transfer.quiet,
        ..output_config
    };
    let formatter = Formatter::new(output_config);

    let source = match RemoteTarget::parse(&args.source) {
        Ok(source) if !source.key.is_empty() && !source.key.ends_with('/') => source,
        Ok(_) => {
            formatter.error(&format!(
                "'{}' does not name an object (expected alias/bucket/key)",
                args.source
            ));
            return ExitCode::UsageError;
        }
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::UsageError;
        }
    };

    let destination = destination_path(&args.destination, &source.key).await;
    let (defaults, client) = match transfer::connect(&source.alias, &formatter).await {
        Ok(connected) => connected,
        Err(code) => return code,
    };
    let options = args.transfer.resolve(&defaults);

    let progress = TransferProgress::new(formatter.shows_progress(), "Downloading");
    let mut request = DownloadRequest::new(&source.bucket, &source.key, &destination)
        .part_size(options.part_size)
        .task_count(options.task_count)
        .checkpoint(options.checkpoint)
        .progress(progress.clone())
        .progress_policy(options.progress)
        .events(transfer::event_reporter(progress.clone()));
    if let Some(version_id) = &args.version_id {
        request = request.version_id(version_id);
    }
    if let Some(path) = &options.checkpoint_path {
        request = request.checkpoint_path(path);
    }

    tracing::debug!(
        bucket = %source.bucket,
        key = %source.key,
        destination = %destination.display(),
        part_size = options.part_size,
        tasks = options.task_count,
        "Starting download"
    );

    let controller = TransferController::new(Arc::new(client));
    match controller.download(request).await {
        Ok(meta) => {
            progress.finish();
            if formatter.is_json() {
                formatter.json(&DownloadOutput::new(&source, &destination, &meta));
            } else {
                formatter.success(&format!(
                    "Downloaded {} to {} ({})",
                    formatter.style_url(&source.to_string()),
                    formatter.style_name(&destination.display().to_string()),
                    formatter.style_size(meta.size),
                ));
            }
            ExitCode::Success
        }
        Err(e) => {
            progress.abandon();
            transfer::report_failure(&formatter, "Download", &e, options.checkpoint)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_destination_directory_keeps_object_name() {
        let dir = TempDir::new().unwrap();
        let resolved = destination_path(dir.path(), "nested/dir/report.csv").await;
        assert_eq!(resolved, dir.path().join("report.csv"));

        let file = dir.path().join("renamed.csv");
        assert_eq!(destination_path(&file, "nested/report.csv").await, file);
    }

    #[test]
    fn test_download_output_json() {
        let source = RemoteTarget::parse("local/data/report.csv").unwrap();
        let meta = ObjectMeta {
            size: 1536,
            etag: Some("d41d8cd9".to_string()),
            last_modified: None,
            content_type: Some("text/csv".to_string()),
        };
        let output = DownloadOutput::new(&source, Path::new("report.csv"), &meta);
        insta::assert_json_snapshot!(output, @r#"
        {
          "status": "success",
          "source": "local/data/report.csv",
          "destination": "report.csv",
          "size_bytes": 1536,
          "size_human": "1.50 KiB",
          "etag": "d41d8cd9"
        }
        "#);
    }
}
