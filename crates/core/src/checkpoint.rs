//! Transfer checkpoints
//!
//! A checkpoint is a side-car JSON file describing one multipart transfer:
//! which object, which local artifact, which remote session, and which parts
//! are already done. It is written after every completed part so a crash
//! loses at most the parts that were in flight.

use std::path::{Path, PathBuf};

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::planner::{MAX_PARTS, PartPlan, PartRange};
use crate::traits::CompletedPart;

/// Current on-disk format version
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// Which way the bytes flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

/// The local side of a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum LocalIdentity {
    /// Upload source file, fingerprinted by size and modification time
    File {
        path: PathBuf,
        size: u64,
        modified: Option<Timestamp>,
    },
    /// Upload source stream, identified by its starting position and length
    Stream { origin_offset: u64, size: u64 },
    /// Download destination and the temp file parts are written into
    Destination { path: PathBuf, temp_path: PathBuf },
}

/// Fingerprint of the remote object a download started from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFingerprint {
    pub size: u64,
    pub etag: Option<String>,
    pub last_modified: Option<Timestamp>,
}

/// Progress of one part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartState {
    pub part_number: u32,
    pub offset: u64,
    pub size: u64,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl PartState {
    pub fn range(&self) -> PartRange {
        PartRange {
            part_number: self.part_number,
            offset: self.offset,
            size: self.size,
        }
    }
}

impl From<&PartRange> for PartState {
    fn from(range: &PartRange) -> Self {
        Self {
            part_number: range.part_number,
            offset: range.offset,
            size: range.size,
            completed: false,
            etag: None,
        }
    }
}

/// Persisted state of one transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferCheckpoint {
    pub format_version: u32,
    pub direction: Direction,
    pub bucket: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    pub local: LocalIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteFingerprint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub total_size: u64,
    /// Effective part size used to build `parts`
    pub part_size: u64,
    pub parts: Vec<PartState>,
    #[serde(default)]
    pub aborted: bool,
}

/// What a checkpoint must match to be resumable
#[derive(Debug, Clone)]
pub struct ExpectedState<'a> {
    pub direction: Direction,
    pub bucket: &'a str,
    pub key: &'a str,
    pub version_id: Option<&'a str>,
    pub local: &'a LocalIdentity,
    pub remote: Option<&'a RemoteFingerprint>,
    pub plan: &'a PartPlan,
}

impl TransferCheckpoint {
    /// Fresh upload checkpoint for an opened session
    pub fn new_upload(
        bucket: impl Into<String>,
        key: impl Into<String>,
        local: LocalIdentity,
        session_id: impl Into<String>,
        plan: &PartPlan,
    ) -> Self {
        Self {
            format_version: CHECKPOINT_FORMAT_VERSION,
            direction: Direction::Upload,
            bucket: bucket.into(),
            key: key.into(),
            version_id: None,
            local,
            remote: None,
            session_id: Some(session_id.into()),
            total_size: plan.total_size(),
            part_size: plan.part_size,
            parts: plan.parts.iter().map(PartState::from).collect(),
            aborted: false,
        }
    }

    /// Fresh download checkpoint for a fetched remote object
    pub fn new_download(
        bucket: impl Into<String>,
        key: impl Into<String>,
        version_id: Option<String>,
        local: LocalIdentity,
        remote: RemoteFingerprint,
        plan: &PartPlan,
    ) -> Self {
        Self {
            format_version: CHECKPOINT_FORMAT_VERSION,
            direction: Direction::Download,
            bucket: bucket.into(),
            key: key.into(),
            version_id,
            local,
            total_size: remote.size,
            remote: Some(remote),
            session_id: None,
            part_size: plan.part_size,
            parts: plan.parts.iter().map(PartState::from).collect(),
            aborted: false,
        }
    }

    /// Parts that still need to be transferred, in part order
    pub fn pending_parts(&self) -> Vec<PartRange> {
        self.parts
            .iter()
            .filter(|p| !p.completed)
            .map(PartState::range)
            .collect()
    }

    pub fn completed_count(&self) -> usize {
        self.parts.iter().filter(|p| p.completed).count()
    }

    /// Bytes covered by completed parts
    pub fn completed_bytes(&self) -> u64 {
        self.parts
            .iter()
            .filter(|p| p.completed)
            .map(|p| p.size)
            .sum()
    }

    pub fn is_complete(&self) -> bool {
        self.parts.iter().all(|p| p.completed)
    }

    /// Record a finished part
    ///
    /// A completed part is immutable: completing it again is an integrity
    /// error rather than a silent overwrite.
    pub fn mark_completed(&mut self, part_number: u32, etag: Option<String>) -> Result<()> {
        let part = self
            .parts
            .iter_mut()
            .find(|p| p.part_number == part_number)
            .ok_or_else(|| {
                Error::Integrity(format!("part {part_number} is not part of this transfer"))
            })?;
        if part.completed {
            return Err(Error::Integrity(format!(
                "part {part_number} was already completed"
            )));
        }
        part.completed = true;
        part.etag = etag;
        Ok(())
    }

    /// Part list for the final complete call
    ///
    /// Fails if any part is unfinished or lacks its ETag.
    pub fn completed_parts(&self) -> Result<Vec<CompletedPart>> {
        self.parts
            .iter()
            .map(|p| match (p.completed, &p.etag) {
                (true, Some(etag)) => Ok(CompletedPart {
                    part_number: p.part_number,
                    etag: etag.clone(),
                }),
                (true, None) => Err(Error::Integrity(format!(
                    "part {} has no ETag recorded",
                    p.part_number
                ))),
                (false, _) => Err(Error::Integrity(format!(
                    "part {} has not been transferred",
                    p.part_number
                ))),
            })
            .collect()
    }

    /// Check the structural invariants of the part list
    pub fn check_layout(&self) -> std::result::Result<(), String> {
        if self.parts.len() as u64 > MAX_PARTS {
            return Err(format!("{} parts exceed the limit", self.parts.len()));
        }
        let origin = self.parts.first().map(|p| p.offset).unwrap_or(0);
        let mut next = origin;
        for (index, part) in self.parts.iter().enumerate() {
            if part.part_number as usize != index + 1 {
                return Err(format!("part numbering breaks at position {}", index + 1));
            }
            if part.offset != next {
                return Err(format!(
                    "part {} does not start where the previous one ends",
                    part.part_number
                ));
            }
            next = next
                .checked_add(part.size)
                .ok_or_else(|| format!("part {} extends past the end of any file", part.part_number))?;
        }
        if next - origin != self.total_size {
            return Err(format!(
                "parts cover {} bytes, expected {}",
                next - origin,
                self.total_size
            ));
        }
        Ok(())
    }

    /// Why this checkpoint cannot be resumed, or `None` if it can
    pub fn mismatch(&self, expected: &ExpectedState<'_>) -> Option<String> {
        if self.format_version != CHECKPOINT_FORMAT_VERSION {
            return Some(format!("unsupported format version {}", self.format_version));
        }
        if self.aborted {
            return Some("transfer was aborted".into());
        }
        if self.direction != expected.direction {
            return Some(format!("checkpoint is for a {}", self.direction));
        }
        if self.bucket != expected.bucket || self.key != expected.key {
            return Some(format!(
                "checkpoint is for {}/{}, not {}/{}",
                self.bucket, self.key, expected.bucket, expected.key
            ));
        }
        if self.version_id.as_deref() != expected.version_id {
            return Some("object version differs".into());
        }
        if &self.local != expected.local {
            return Some("local file changed since the checkpoint was written".into());
        }
        if let Some(remote) = expected.remote {
            match &self.remote {
                Some(recorded) if recorded.size == remote.size && recorded.etag == remote.etag => {}
                _ => return Some("remote object changed since the checkpoint was written".into()),
            }
        }
        if self.direction == Direction::Upload && self.session_id.is_none() {
            return Some("no multipart session recorded".into());
        }
        if let Err(reason) = self.check_layout() {
            return Some(reason);
        }
        let planned = self.parts.len() == expected.plan.parts.len()
            && self
                .parts
                .iter()
                .zip(&expected.plan.parts)
                .all(|(state, range)| state.range() == *range);
        if !planned {
            return Some("part layout differs from the requested part size".into());
        }
        None
    }
}

/// Whether `checkpoint` may be resumed for the expected transfer
pub fn validate(checkpoint: &TransferCheckpoint, expected: &ExpectedState<'_>) -> bool {
    checkpoint.mismatch(expected).is_none()
}

/// Durable storage for one checkpoint file
///
/// Every write goes through one lock, so concurrent part completions never
/// interleave on disk.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    /// Revision of the snapshot most recently written to disk
    written: Mutex<u64>,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            written: Mutex::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Read and parse the checkpoint file
    pub async fn load(&self) -> Result<TransferCheckpoint> {
        let data = tokio::fs::read(&self.path).await?;
        let checkpoint = serde_json::from_slice(&data)?;
        Ok(checkpoint)
    }

    /// Persist `checkpoint`, replacing whatever was on disk
    pub async fn record(&self, checkpoint: &TransferCheckpoint) -> Result<()> {
        let data = serde_json::to_vec_pretty(checkpoint)?;
        let _written = self.written.lock().await;
        self.write_atomic(&data).await
    }

    /// Persist a snapshot taken at `revision`, unless a newer one is on disk
    async fn record_revision(&self, revision: u64, data: &[u8]) -> Result<()> {
        let mut written = self.written.lock().await;
        if revision <= *written {
            return Ok(());
        }
        self.write_atomic(data).await?;
        *written = revision;
        Ok(())
    }

    /// Delete the checkpoint file; a missing file is not an error
    pub async fn remove(&self) -> Result<()> {
        let _written = self.written.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_atomic(&self, data: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = sibling_path(&self.path, ".tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// `path` with `suffix` appended to its file name
pub(crate) fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

struct Tracked {
    checkpoint: TransferCheckpoint,
    revision: u64,
}

/// The in-memory checkpoint shared by all workers of one transfer
///
/// Mutations happen under a single mutex. When a store is attached, each
/// mutation is followed by a write of the snapshot it produced.
pub struct SharedCheckpoint {
    state: Mutex<Tracked>,
    store: Option<CheckpointStore>,
}

impl SharedCheckpoint {
    pub fn new(checkpoint: TransferCheckpoint, store: Option<CheckpointStore>) -> Self {
        Self {
            state: Mutex::new(Tracked {
                checkpoint,
                revision: 0,
            }),
            store,
        }
    }

    pub fn store(&self) -> Option<&CheckpointStore> {
        self.store.as_ref()
    }

    /// Copy of the current state
    pub async fn snapshot(&self) -> TransferCheckpoint {
        self.state.lock().await.checkpoint.clone()
    }

    /// Mark a part completed and persist the result
    ///
    /// The in-memory update is visible before this returns. A failure to
    /// write the file does not undo the completion; it is logged and the
    /// next completion writes again.
    pub async fn complete_part(&self, part_number: u32, etag: Option<String>) -> Result<()> {
        let (revision, data) = {
            let mut state = self.state.lock().await;
            state.checkpoint.mark_completed(part_number, etag)?;
            state.revision += 1;
            if self.store.is_none() {
                return Ok(());
            }
            (state.revision, serde_json::to_vec_pretty(&state.checkpoint)?)
        };

        if let Some(store) = &self.store
            && let Err(e) = store.record_revision(revision, &data).await
        {
            tracing::warn!(
                path = %store.path().display(),
                part_number,
                error = %e,
                "Failed to persist checkpoint"
            );
        }
        Ok(())
    }

    /// Flag the transfer as aborted and persist it
    pub async fn mark_aborted(&self) -> Result<()> {
        let (revision, data) = {
            let mut state = self.state.lock().await;
            state.checkpoint.aborted = true;
            state.revision += 1;
            (state.revision, serde_json::to_vec_pretty(&state.checkpoint)?)
        };
        if let Some(store) = &self.store {
            store.record_revision(revision, &data).await?;
        }
        Ok(())
    }
}
