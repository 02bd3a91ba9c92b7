//! upload command - Send a local file to object storage in parts
//!
//! An interrupted upload leaves a checkpoint next to the source file;
//! running the same command again continues from the parts already sent.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::bail;
use clap::Args;
use mpx_core::{ObjectMetadata, TransferController, UploadOutcome, UploadRequest, UploadSource};
use serde::Serialize;

use super::transfer::{self, RemoteTarget, TransferArgs};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig, TransferProgress};

/// Upload a local file
#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Local file to upload
    pub source: PathBuf,

    /// Destination (alias/bucket/key); a key ending in '/' keeps the file name
    pub target: String,

    /// Content type (default: guessed from the file name)
    #[arg(long)]
    pub content_type: Option<String>,

    /// User metadata as KEY=VALUE (repeatable)
    #[arg(long = "meta", value_parser = parse_metadata)]
    pub metadata: Vec<(String, String)>,

    #[command(flatten)]
    pub transfer: TransferArgs,
}

/// JSON output for a finished upload
#[derive(Debug, Serialize)]
struct UploadOutput {
    status: &'static str,
    source: String,
    target: String,
    etag: String,
    size_bytes: u64,
    size_human: String,
    parts: usize,
    resumed: bool,
}

impl UploadOutput {
    fn new(source: &Path, alias: &str, outcome: &UploadOutcome) -> Self {
        Self {
            status: "success",
            source: source.display().to_string(),
            target: format!("{alias}/{}/{}", outcome.bucket, outcome.key),
            etag: outcome.etag.clone(),
            size_bytes: outcome.size,
            size_human: humansize::format_size(outcome.size, humansize::BINARY),
            parts: outcome.parts,
            resumed: outcome.resumed,
        }
    }
}

/// Parse a `KEY=VALUE` metadata pair
fn parse_metadata(s: &str) -> anyhow::Result<(String, String)> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => bail!("Invalid metadata '{s}': expected KEY=VALUE"),
    }
}

/// Object key for `source` under the requested key
fn object_key(requested: &str, source: &Path) -> String {
    if !requested.is_empty() && !requested.ends_with('/') {
        return requested.to_string();
    }
    let file_name = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{requested}{file_name}")
}

/// Execute the upload command
pub async fn execute(args: UploadArgs, output_config: OutputConfig) -> ExitCode {
    let output_config = OutputConfig {
        quiet: output_config.quiet || args.transfer.quiet,
        ..output_config
    };
    let formatter = Formatter::new(output_config);

    let target = match RemoteTarget::parse(&args.target) {
        Ok(target) => target,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::UsageError;
        }
    };

    match tokio::fs::metadata(&args.source).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => {
            formatter.error(&format!("'{}' is not a file", args.source.display()));
            return ExitCode::UsageError;
        }
        Err(e) => {
            formatter.error(&format!("Cannot read '{}': {e}", args.source.display()));
            return ExitCode::NotFound;
        }
    }

    let key = object_key(&target.key, &args.source);
    let (defaults, client) = match transfer::connect(&target.alias, &formatter).await {
        Ok(connected) => connected,
        Err(code) => return code,
    };
    let options = args.transfer.resolve(&defaults);

    let progress = TransferProgress::new(formatter.shows_progress(), "Uploading");
    let metadata = ObjectMetadata {
        content_type: args.content_type.clone(),
        user_metadata: args.metadata.into_iter().collect::<HashMap<_, _>>(),
    };

    let mut request = UploadRequest::new(UploadSource::file(&args.source), &target.bucket, &key)
        .metadata(metadata)
        .part_size(options.part_size)
        .task_count(options.task_count)
        .checkpoint(options.checkpoint)
        .progress(progress.clone())
        .progress_policy(options.progress)
        .events(transfer::event_reporter(progress.clone()));
    if let Some(path) = &options.checkpoint_path {
        request = request.checkpoint_path(path);
    }

    tracing::debug!(
        source = %args.source.display(),
        bucket = %target.bucket,
        key = %key,
        part_size = options.part_size,
        tasks = options.task_count,
        "Starting upload"
    );

    let controller = TransferController::new(Arc::new(client));
    match controller.upload(request).await {
        Ok(outcome) => {
            progress.finish();
            if formatter.is_json() {
                formatter.json(&UploadOutput::new(&args.source, &target.alias, &outcome));
            } else {
                let resumed = if outcome.resumed { " (resumed)" } else { "" };
                formatter.success(&format!(
                    "Uploaded {} to {} ({}, {} parts){resumed}",
                    formatter.style_name(&args.source.display().to_string()),
                    formatter.style_url(&format!("{}/{}/{key}", target.alias, target.bucket)),
                    formatter.style_size(outcome.size),
                    outcome.parts,
                ));
            }
            ExitCode::Success
        }
        Err(e) => {
            progress.abandon();
            transfer::report_failure(&formatter, "Upload", &e, options.checkpoint)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key() {
        let source = Path::new("/data/backup.tar");
        assert_eq!(object_key("", source), "backup.tar");
        assert_eq!(object_key("daily/", source), "daily/backup.tar");
        assert_eq!(object_key("daily/latest.tar", source), "daily/latest.tar");
    }

    #[test]
    fn test_parse_metadata() {
        assert_eq!(
            parse_metadata("owner=ops").unwrap(),
            ("owner".to_string(), "ops".to_string())
        );
        assert_eq!(
            parse_metadata("note=a=b").unwrap(),
            ("note".to_string(), "a=b".to_string())
        );
        assert!(parse_metadata("novalue").is_err());
        assert!(parse_metadata("=x").is_err());
    }

    #[test]
    fn test_upload_output_json() {
        let outcome = UploadOutcome {
            bucket: "backups".to_string(),
            key: "daily/backup.tar".to_string(),
            etag: "abc-3".to_string(),
            size: 3 * 1024 * 1024,
            parts: 3,
            resumed: true,
        };
        let output = UploadOutput::new(Path::new("backup.tar"), "local", &outcome);
        insta::assert_json_snapshot!(output, @r#"
        {
          "status": "success",
          "source": "backup.tar",
          "target": "local/backups/daily/backup.tar",
          "etag": "abc-3",
          "size_bytes": 3145728,
          "size_human": "3 MiB",
          "parts": 3,
          "resumed": true
        }
        "#);
    }
}
