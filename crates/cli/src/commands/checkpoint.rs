//! checkpoint command - Inspect or delete saved transfer state

use std::path::PathBuf;

use clap::Subcommand;
use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use mpx_core::checkpoint::LocalIdentity;
use mpx_core::{CheckpointStore, Direction, TransferCheckpoint};
use serde::Serialize;

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Checkpoint subcommands
#[derive(Subcommand, Debug)]
pub enum CheckpointCommands {
    /// Summarize a checkpoint file
    Show {
        /// Path to the checkpoint file
        path: PathBuf,

        /// List every part
        #[arg(long)]
        parts: bool,
    },

    /// Delete a checkpoint file so the next run starts over
    Remove {
        /// Path to the checkpoint file
        path: PathBuf,
    },
}

/// JSON output for `checkpoint show`
#[derive(Debug, Serialize)]
struct CheckpointSummary {
    path: String,
    direction: Direction,
    bucket: String,
    key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    version_id: Option<String>,
    local: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    total_size: u64,
    part_size: u64,
    parts_total: usize,
    parts_completed: usize,
    bytes_completed: u64,
    aborted: bool,
}

impl CheckpointSummary {
    fn new(path: &std::path::Path, checkpoint: &TransferCheckpoint) -> Self {
        Self {
            path: path.display().to_string(),
            direction: checkpoint.direction,
            bucket: checkpoint.bucket.clone(),
            key: checkpoint.key.clone(),
            version_id: checkpoint.version_id.clone(),
            local: describe_local(&checkpoint.local),
            session_id: checkpoint.session_id.clone(),
            total_size: checkpoint.total_size,
            part_size: checkpoint.part_size,
            parts_total: checkpoint.parts.len(),
            parts_completed: checkpoint.completed_count(),
            bytes_completed: checkpoint.completed_bytes(),
            aborted: checkpoint.aborted,
        }
    }
}

fn describe_local(local: &LocalIdentity) -> String {
    match local {
        LocalIdentity::File { path, .. } => path.display().to_string(),
        LocalIdentity::Stream {
            origin_offset,
            size,
        } => format!("stream ({size} bytes from offset {origin_offset})"),
        LocalIdentity::Destination { path, .. } => path.display().to_string(),
    }
}

/// Execute a checkpoint subcommand
pub async fn execute(cmd: CheckpointCommands, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    match cmd {
        CheckpointCommands::Show { path, parts } => execute_show(path, parts, &formatter).await,
        CheckpointCommands::Remove { path } => execute_remove(path, &formatter).await,
    }
}

async fn execute_show(path: PathBuf, show_parts: bool, formatter: &Formatter) -> ExitCode {
    let store = CheckpointStore::new(&path);
    if !store.exists().await {
        formatter.error(&format!("No checkpoint at '{}'", path.display()));
        return ExitCode::NotFound;
    }
    let checkpoint = match store.load().await {
        Ok(checkpoint) => checkpoint,
        Err(e) => {
            formatter.error(&format!("Failed to read checkpoint: {e}"));
            return ExitCode::from_error(&e);
        }
    };

    let summary = CheckpointSummary::new(&path, &checkpoint);
    if formatter.is_json() {
        formatter.json(&summary);
        return ExitCode::Success;
    }

    let remote = format!("{}/{}", summary.bucket, summary.key);
    formatter.println(&format!(
        "{} {}",
        formatter.style_key("Direction:"),
        summary.direction
    ));
    formatter.println(&format!(
        "{} {}",
        formatter.style_key("Object:   "),
        formatter.style_url(&remote)
    ));
    formatter.println(&format!(
        "{} {}",
        formatter.style_key("Local:    "),
        formatter.style_name(&summary.local)
    ));
    if let Some(session_id) = &summary.session_id {
        formatter.println(&format!(
            "{} {}",
            formatter.style_key("Session:  "),
            formatter.style_dim(session_id)
        ));
    }
    formatter.println(&format!(
        "{} {}/{} parts, {} of {}",
        formatter.style_key("Progress: "),
        summary.parts_completed,
        summary.parts_total,
        formatter.style_size(summary.bytes_completed),
        formatter.style_size(summary.total_size),
    ));
    if summary.aborted {
        formatter.warning("The remote session was aborted; the next run starts over.");
    }

    if show_parts {
        formatter.println(&parts_table(&checkpoint).to_string());
    }
    ExitCode::Success
}

fn parts_table(checkpoint: &TransferCheckpoint) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Part", "Offset", "Size", "Done", "ETag"]);
    for part in &checkpoint.parts {
        table.add_row(vec![
            Cell::new(part.part_number),
            Cell::new(part.offset),
            Cell::new(part.size),
            Cell::new(if part.completed { "yes" } else { "no" }),
            Cell::new(part.etag.as_deref().unwrap_or("-")),
        ]);
    }
    table
}

async fn execute_remove(path: PathBuf, formatter: &Formatter) -> ExitCode {
    let store = CheckpointStore::new(&path);
    if !store.exists().await {
        formatter.error(&format!("No checkpoint at '{}'", path.display()));
        return ExitCode::NotFound;
    }
    match store.remove().await {
        Ok(()) => {
            if formatter.is_json() {
                formatter.json(&serde_json::json!({
                    "status": "success",
                    "removed": path.display().to_string(),
                }));
            } else {
                formatter.success(&format!(
                    "Removed checkpoint {}",
                    formatter.style_name(&path.display().to_string())
                ));
            }
            ExitCode::Success
        }
        Err(e) => {
            formatter.error(&format!("Failed to remove checkpoint: {e}"));
            ExitCode::from_error(&e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpx_core::checkpoint::PartState;
    use std::path::Path;

    fn sample() -> TransferCheckpoint {
        TransferCheckpoint {
            format_version: 1,
            direction: Direction::Upload,
            bucket: "backups".to_string(),
            key: "db.dump".to_string(),
            version_id: None,
            local: LocalIdentity::File {
                path: PathBuf::from("db.dump"),
                size: 2048,
                modified: None,
            },
            remote: None,
            session_id: Some("upload-1".to_string()),
            total_size: 2048,
            part_size: 1024,
            parts: vec![
                PartState {
                    part_number: 1,
                    offset: 0,
                    size: 1024,
                    completed: true,
                    etag: Some("e1".to_string()),
                },
                PartState {
                    part_number: 2,
                    offset: 1024,
                    size: 1024,
                    completed: false,
                    etag: None,
                },
            ],
            aborted: false,
        }
    }

    #[test]
    fn test_summary_json() {
        let summary = CheckpointSummary::new(Path::new("db.dump.mpx-upload"), &sample());
        insta::assert_json_snapshot!(summary, @r#"
        {
          "path": "db.dump.mpx-upload",
          "direction": "upload",
          "bucket": "backups",
          "key": "db.dump",
          "local": "db.dump",
          "session_id": "upload-1",
          "total_size": 2048,
          "part_size": 1024,
          "parts_total": 2,
          "parts_completed": 1,
          "bytes_completed": 1024,
          "aborted": false
        }
        "#);
    }

    #[test]
    fn test_parts_table_lists_every_part() {
        let rendered = parts_table(&sample()).to_string();
        assert!(rendered.contains("e1"));
        assert_eq!(rendered.matches("yes").count(), 1);
        assert_eq!(rendered.matches("no").count(), 1);
    }

    #[test]
    fn test_describe_stream() {
        let local = LocalIdentity::Stream {
            origin_offset: 10,
            size: 90,
        };
        assert_eq!(describe_local(&local), "stream (90 bytes from offset 10)");
    }
}
