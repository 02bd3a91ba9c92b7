//! Transfer orchestration
//!
//! [`TransferController`] runs one upload or download through
//! `Init -> ValidateCheckpoint | Fresh -> Prepare -> Transfer -> Finalize -> Done`,
//! with `Aborted` reachable from `Prepare` and `Transfer`. Part failures are
//! collected from the pool and turned into one terminal error only after
//! every in-flight part has drained.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::checkpoint::{
    CheckpointStore, Direction, ExpectedState, LocalIdentity, RemoteFingerprint,
    SharedCheckpoint, TransferCheckpoint, sibling_path,
};
use crate::error::{Error, Result};
use crate::events::{EventSink, NoopEvents, TransferEvent};
use crate::planner::{DEFAULT_PART_SIZE, plan_download, plan_upload};
use crate::pool::{
    AbortFlag, DownloadPartExecutor, PartOutcome, PartResult, UploadPartExecutor, WorkerPool,
};
use crate::progress::{NoopProgress, ProgressListener, ProgressPolicy, ProgressTracker};
use crate::retry::{RetryConfig, is_retryable_error, retry_with_backoff};
use crate::source::UploadSource;
use crate::traits::{MultipartTransport, ObjectMeta, ObjectMetadata};

/// Default number of parts in flight
pub const DEFAULT_TASK_COUNT: usize = 4;

/// Suffix of the default upload checkpoint, next to the source file
pub const UPLOAD_CHECKPOINT_SUFFIX: &str = ".mpx-upload";
/// Suffix of the default download checkpoint, next to the destination
pub const DOWNLOAD_CHECKPOINT_SUFFIX: &str = ".mpx-download";
/// Suffix of the temp file a download is assembled in
pub const DOWNLOAD_TEMP_SUFFIX: &str = ".mpx-part";

/// Controller states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Init,
    ValidateCheckpoint,
    Fresh,
    Prepare,
    Transfer,
    Finalize,
    Done,
    Aborted,
}

impl std::fmt::Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransferState::Init => "init",
            TransferState::ValidateCheckpoint => "validate_checkpoint",
            TransferState::Fresh => "fresh",
            TransferState::Prepare => "prepare",
            TransferState::Transfer => "transfer",
            TransferState::Finalize => "finalize",
            TransferState::Done => "done",
            TransferState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

fn enter(direction: Direction, key: &str, state: TransferState) {
    tracing::debug!(%direction, key, %state, "Transfer state");
}

/// Options shared by uploads and downloads
#[derive(Clone)]
struct Tuning {
    part_size: u64,
    task_count: usize,
    enable_checkpoint: bool,
    checkpoint_path: Option<PathBuf>,
    progress: Arc<dyn ProgressListener>,
    progress_policy: ProgressPolicy,
    events: Arc<dyn EventSink>,
    retry: RetryConfig,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            task_count: DEFAULT_TASK_COUNT,
            enable_checkpoint: true,
            checkpoint_path: None,
            progress: Arc::new(NoopProgress),
            progress_policy: ProgressPolicy::default(),
            events: Arc::new(NoopEvents),
            retry: RetryConfig::default(),
        }
    }
}

macro_rules! tuning_setters {
    () => {
        /// Requested part size in bytes; raised automatically for very large objects
        pub fn part_size(mut self, bytes: u64) -> Self {
            self.tuning.part_size = bytes;
            self
        }

        /// Maximum number of parts in flight
        pub fn task_count(mut self, count: usize) -> Self {
            self.tuning.task_count = count;
            self
        }

        /// Enable or disable the checkpoint file
        pub fn checkpoint(mut self, enabled: bool) -> Self {
            self.tuning.enable_checkpoint = enabled;
            self
        }

        /// Use an explicit checkpoint location instead of the default
        pub fn checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
            self.tuning.checkpoint_path = Some(path.into());
            self
        }

        pub fn progress<L: ProgressListener + 'static>(mut self, listener: L) -> Self {
            self.tuning.progress = Arc::new(listener);
            self
        }

        pub fn progress_policy(mut self, policy: ProgressPolicy) -> Self {
            self.tuning.progress_policy = policy;
            self
        }

        pub fn events<S: EventSink + 'static>(mut self, sink: S) -> Self {
            self.tuning.events = Arc::new(sink);
            self
        }

        /// Backoff for metadata lookups and session aborts
        pub fn retry(mut self, config: RetryConfig) -> Self {
            self.tuning.retry = config;
            self
        }
    };
}

/// Parameters of one upload
pub struct UploadRequest {
    source: UploadSource,
    bucket: String,
    key: String,
    metadata: ObjectMetadata,
    tuning: Tuning,
}

impl UploadRequest {
    pub fn new(source: UploadSource, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            source,
            bucket: bucket.into(),
            key: key.into(),
            metadata: ObjectMetadata::default(),
            tuning: Tuning::default(),
        }
    }

    pub fn metadata(mut self, metadata: ObjectMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    tuning_setters!();
}

/// Parameters of one download
pub struct DownloadRequest {
    bucket: String,
    key: String,
    version_id: Option<String>,
    destination: PathBuf,
    tuning: Tuning,
}

impl DownloadRequest {
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            version_id: None,
            destination: destination.into(),
            tuning: Tuning::default(),
        }
    }

    pub fn version_id(mut self, version_id: impl Into<String>) -> Self {
        self.version_id = Some(version_id.into());
        self
    }

    tuning_setters!();
}

/// Result of a finished upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    pub bucket: String,
    pub key: String,
    /// ETag of the assembled object
    pub etag: String,
    pub size: u64,
    pub parts: usize,
    /// Whether the run continued from a checkpoint
    pub resumed: bool,
}

/// Drives uploads and downloads against one transport
pub struct TransferController<T: ?Sized> {
    transport: Arc<T>,
}

impl<T: ?Sized> Clone for TransferController<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T> TransferController<T>
where
    T: MultipartTransport + ?Sized + 'static,
{
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// Upload `request.source` as one multipart object and return its ETag
    pub async fn upload(&self, request: UploadRequest) -> Result<UploadOutcome> {
        let UploadRequest {
            source,
            bucket,
            key,
            mut metadata,
            tuning,
        } = request;
        check_target(&bucket, &key, tuning.task_count)?;

        let checkpoint_path = if tuning.enable_checkpoint {
            match (&tuning.checkpoint_path, source.path()) {
                (Some(path), _) => Some(path.clone()),
                (None, Some(file)) => Some(sibling_path(file, UPLOAD_CHECKPOINT_SUFFIX)),
                (None, None) => {
                    return Err(Error::Validation(
                        "a stream upload with checkpointing needs an explicit checkpoint path"
                            .into(),
                    ));
                }
            }
        } else {
            None
        };
        if metadata.content_type.is_none() {
            let guess_from = source
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(&key));
            metadata.content_type = mime_guess::from_path(guess_from)
                .first()
                .map(|mime| mime.to_string());
        }

        enter(Direction::Upload, &key, TransferState::Init);
        let opened = source.open().await?;
        let plan = plan_upload(opened.size, tuning.part_size, opened.origin_offset)?;
        let events = Arc::clone(&tuning.events);
        let store = checkpoint_path.map(CheckpointStore::new);

        let resumed = match &store {
            Some(store) => {
                enter(Direction::Upload, &key, TransferState::ValidateCheckpoint);
                let expected = ExpectedState {
                    direction: Direction::Upload,
                    bucket: &bucket,
                    key: &key,
                    version_id: None,
                    local: &opened.identity,
                    remote: None,
                    plan: &plan,
                };
                let resumed = self.load_resumable(store, &expected, &tuning).await;
                if let Some(checkpoint) = &resumed {
                    Self::announce_resume(store, checkpoint, &tuning);
                }
                resumed
            }
            None => None,
        };
        let was_resumed = resumed.is_some();

        let checkpoint = match resumed {
            Some(checkpoint) => checkpoint,
            None => {
                enter(Direction::Upload, &key, TransferState::Fresh);
                enter(Direction::Upload, &key, TransferState::Prepare);
                let session_id = self
                    .transport
                    .initiate_multipart_upload(&bucket, &key, &metadata)
                    .await?;
                tracing::info!(
                    %bucket,
                    %key,
                    %session_id,
                    parts = plan.parts.len(),
                    "Opened multipart session"
                );
                events.on_event(&TransferEvent::SessionOpened {
                    session_id: session_id.clone(),
                });

                let checkpoint = TransferCheckpoint::new_upload(
                    &bucket,
                    &key,
                    opened.identity.clone(),
                    &session_id,
                    &plan,
                );
                if let Some(store) = &store
                    && let Err(e) = store.record(&checkpoint).await
                {
                    enter(Direction::Upload, &key, TransferState::Aborted);
                    self.abort_session(&bucket, &key, &session_id, &tuning).await;
                    return Err(e);
                }
                checkpoint
            }
        };
        let session_id = checkpoint
            .session_id
            .clone()
            .ok_or_else(|| Error::Integrity("upload checkpoint has no session id".into()))?;

        enter(Direction::Upload, &key, TransferState::Transfer);
        let pending = checkpoint.pending_parts();
        let progress = Arc::new(ProgressTracker::new(
            plan.total_size(),
            checkpoint.completed_bytes(),
            tuning.progress_policy,
            Arc::clone(&tuning.progress),
        ));
        let shared = Arc::new(SharedCheckpoint::new(checkpoint, store));
        let executor = Arc::new(UploadPartExecutor {
            transport: Arc::clone(&self.transport),
            bucket: bucket.clone(),
            key: key.clone(),
            session_id: session_id.clone(),
            reader: opened.reader,
            checkpoint: Arc::clone(&shared),
            progress: Arc::clone(&progress),
        });
        let results = WorkerPool::new(tuning.task_count)
            .run(pending, &AbortFlag::new(), executor, Arc::clone(&events))
            .await;
        progress.finish();

        if let Some(error) = terminal_error(results) {
            return Err(self
                .fail_upload(&shared, &bucket, &key, &session_id, error, &tuning)
                .await);
        }

        enter(Direction::Upload, &key, TransferState::Finalize);
        let snapshot = shared.snapshot().await;
        let parts = match snapshot.completed_parts() {
            Ok(parts) => parts,
            Err(e) => {
                return Err(self
                    .fail_upload(&shared, &bucket, &key, &session_id, e, &tuning)
                    .await);
            }
        };

        match self
            .transport
            .complete_multipart_upload(&bucket, &key, &session_id, &parts)
            .await
        {
            Ok(etag) => {
                tracing::info!(%bucket, %key, %etag, "Multipart upload completed");
                events.on_event(&TransferEvent::FinalizeSucceeded {
                    etag: Some(etag.clone()),
                });
                discard_store(shared.store()).await;
                enter(Direction::Upload, &key, TransferState::Done);
                Ok(UploadOutcome {
                    bucket,
                    key,
                    etag,
                    size: snapshot.total_size,
                    parts: parts.len(),
                    resumed: was_resumed,
                })
            }
            Err(e) => {
                events.on_event(&TransferEvent::FinalizeFailed {
                    kind: e.kind(),
                    message: e.to_string(),
                });
                Err(self
                    .fail_upload(&shared, &bucket, &key, &session_id, e, &tuning)
                    .await)
            }
        }
    }

    /// Download an object into `request.destination` and return its metadata
    pub async fn download(&self, request: DownloadRequest) -> Result<ObjectMeta> {
        let DownloadRequest {
            bucket,
            key,
            version_id,
            destination,
            tuning,
        } = request;
        check_target(&bucket, &key, tuning.task_count)?;
        if destination.as_os_str().is_empty() {
            return Err(Error::Validation("destination path cannot be empty".into()));
        }

        let temp_path = sibling_path(&destination, DOWNLOAD_TEMP_SUFFIX);
        let store = tuning.enable_checkpoint.then(|| {
            CheckpointStore::new(
                tuning
                    .checkpoint_path
                    .clone()
                    .unwrap_or_else(|| sibling_path(&destination, DOWNLOAD_CHECKPOINT_SUFFIX)),
            )
        });
        let events = Arc::clone(&tuning.events);

        enter(Direction::Download, &key, TransferState::Init);
        let transport = &self.transport;
        let meta = retry_with_backoff(
            &tuning.retry,
            || transport.head_object(&bucket, &key, version_id.as_deref()),
            is_retryable_error,
        )
        .await?;
        let plan = plan_download(meta.size, tuning.part_size)?;
        let remote = RemoteFingerprint {
            size: meta.size,
            etag: meta.etag.clone(),
            last_modified: meta.last_modified,
        };
        let local = LocalIdentity::Destination {
            path: destination.clone(),
            temp_path: temp_path.clone(),
        };

        let resumed = match &store {
            Some(store) => {
                enter(Direction::Download, &key, TransferState::ValidateCheckpoint);
                let expected = ExpectedState {
                    direction: Direction::Download,
                    bucket: &bucket,
                    key: &key,
                    version_id: version_id.as_deref(),
                    local: &local,
                    remote: Some(&remote),
                    plan: &plan,
                };
                match self.load_resumable(store, &expected, &tuning).await {
                    Some(checkpoint) if temp_matches(&temp_path, meta.size).await => {
                        Self::announce_resume(store, &checkpoint, &tuning);
                        Some(checkpoint)
                    }
                    Some(_) => {
                        self.discard_checkpoint(
                            store,
                            None,
                            "temp file is missing or has the wrong size".into(),
                            &tuning,
                        )
                        .await;
                        None
                    }
                    None => None,
                }
            }
            None => None,
        };

        let checkpoint = match resumed {
            Some(checkpoint) => checkpoint,
            None => {
                enter(Direction::Download, &key, TransferState::Fresh);
                enter(Direction::Download, &key, TransferState::Prepare);
                let checkpoint = TransferCheckpoint::new_download(
                    &bucket,
                    &key,
                    version_id.clone(),
                    local.clone(),
                    remote,
                    &plan,
                );
                let prepared = async {
                    presize_temp(&temp_path, meta.size).await?;
                    if let Some(store) = &store {
                        store.record(&checkpoint).await?;
                    }
                    Ok::<_, Error>(())
                };
                if let Err(e) = prepared.await {
                    enter(Direction::Download, &key, TransferState::Aborted);
                    remove_quietly(&temp_path).await;
                    return Err(e);
                }
                tracing::info!(
                    %bucket,
                    %key,
                    size = meta.size,
                    parts = plan.parts.len(),
                    "Prepared download"
                );
                checkpoint
            }
        };

        enter(Direction::Download, &key, TransferState::Transfer);
        let pending = checkpoint.pending_parts();
        let progress = Arc::new(ProgressTracker::new(
            plan.total_size(),
            checkpoint.completed_bytes(),
            tuning.progress_policy,
            Arc::clone(&tuning.progress),
        ));
        let shared = Arc::new(SharedCheckpoint::new(checkpoint, store));
        let executor = Arc::new(DownloadPartExecutor {
            transport: Arc::clone(&self.transport),
            bucket: bucket.clone(),
            key: key.clone(),
            version_id: version_id.clone(),
            temp_path: temp_path.clone(),
            checkpoint: Arc::clone(&shared),
            progress: Arc::clone(&progress),
        });
        let results = WorkerPool::new(tuning.task_count)
            .run(pending, &AbortFlag::new(), executor, Arc::clone(&events))
            .await;
        progress.finish();

        if let Some(error) = terminal_error(results) {
            enter(Direction::Download, &key, TransferState::Aborted);
            if error.is_resumable() && shared.store().is_some() {
                tracing::warn!(%key, error = %error, "Download interrupted; checkpoint kept for resume");
            } else {
                remove_quietly(&temp_path).await;
                discard_store(shared.store()).await;
            }
            return Err(error);
        }

        enter(Direction::Download, &key, TransferState::Finalize);
        if let Err(source) = place_file(&temp_path, &destination).await {
            let e = Error::Placement {
                destination: destination.clone(),
                temp_path: temp_path.clone(),
                source,
            };
            tracing::warn!(
                temp = %temp_path.display(),
                error = %e,
                "Download complete but could not be placed"
            );
            events.on_event(&TransferEvent::FinalizeFailed {
                kind: e.kind(),
                message: e.to_string(),
            });
            discard_store(shared.store()).await;
            return Err(e);
        }

        events.on_event(&TransferEvent::FinalizeSucceeded {
            etag: meta.etag.clone(),
        });
        discard_store(shared.store()).await;
        tracing::info!(
            %bucket,
            %key,
            destination = %destination.display(),
            "Download completed"
        );
        enter(Direction::Download, &key, TransferState::Done);
        Ok(meta)
    }

    /// Load and validate an existing checkpoint, discarding it if unusable
    async fn load_resumable(
        &self,
        store: &CheckpointStore,
        expected: &ExpectedState<'_>,
        tuning: &Tuning,
    ) -> Option<TransferCheckpoint> {
        if !store.exists().await {
            return None;
        }
        match store.load().await {
            Ok(checkpoint) => match checkpoint.mismatch(expected) {
                None => Some(checkpoint),
                Some(reason) => {
                    self.discard_checkpoint(store, Some(&checkpoint), reason, tuning)
                        .await;
                    None
                }
            },
            Err(e) => {
                self.discard_checkpoint(store, None, e.to_string(), tuning)
                    .await;
                None
            }
        }
    }

    fn announce_resume(store: &CheckpointStore, checkpoint: &TransferCheckpoint, tuning: &Tuning) {
        let completed = checkpoint.completed_count();
        let pending = checkpoint.parts.len() - completed;
        tracing::info!(
            path = %store.path().display(),
            completed,
            pending,
            "Resuming from checkpoint"
        );
        tuning
            .events
            .on_event(&TransferEvent::CheckpointResumed { completed, pending });
    }

    /// Drop an unusable checkpoint and abort any session it still holds open
    async fn discard_checkpoint(
        &self,
        store: &CheckpointStore,
        stale: Option<&TransferCheckpoint>,
        reason: String,
        tuning: &Tuning,
    ) {
        tracing::warn!(path = %store.path().display(), %reason, "Discarding checkpoint");
        tuning
            .events
            .on_event(&TransferEvent::CheckpointDiscarded { reason });

        if let Some(stale) = stale
            && stale.direction == Direction::Upload
            && !stale.aborted
            && let Some(session_id) = &stale.session_id
        {
            self.abort_session(&stale.bucket, &stale.key, session_id, tuning)
                .await;
        }
        discard_store(Some(store)).await;
    }

    /// Best-effort abort of a remote session
    async fn abort_session(&self, bucket: &str, key: &str, session_id: &str, tuning: &Tuning) {
        let transport = &self.transport;
        let aborted = retry_with_backoff(
            &tuning.retry,
            || transport.abort_multipart_upload(bucket, key, session_id),
            is_retryable_error,
        )
        .await;
        match aborted {
            Ok(()) => {
                tracing::info!(bucket, key, session_id, "Aborted multipart session");
                tuning.events.on_event(&TransferEvent::SessionAborted {
                    session_id: session_id.to_string(),
                });
            }
            Err(e) => {
                tracing::warn!(bucket, key, session_id, error = %e, "Failed to abort multipart session");
            }
        }
    }

    /// Apply the cleanup rules for a failed upload and hand back its error
    async fn fail_upload(
        &self,
        shared: &SharedCheckpoint,
        bucket: &str,
        key: &str,
        session_id: &str,
        error: Error,
        tuning: &Tuning,
    ) -> Error {
        enter(Direction::Upload, key, TransferState::Aborted);
        if error.is_resumable() && shared.store().is_some() {
            tracing::warn!(key, error = %error, "Upload interrupted; checkpoint kept for resume");
            return error;
        }

        self.abort_session(bucket, key, session_id, tuning).await;
        if let Some(store) = shared.store()
            && let Err(e) = store.remove().await
        {
            tracing::warn!(path = %store.path().display(), error = %e, "Failed to remove checkpoint");
            // A lingering file must at least never be resumed
            if let Err(e) = shared.mark_aborted().await {
                tracing::warn!(error = %e, "Failed to flag checkpoint as aborted");
            }
        }
        error
    }
}

fn check_target(bucket: &str, key: &str, task_count: usize) -> Result<()> {
    if bucket.is_empty() {
        return Err(Error::Validation("bucket name cannot be empty".into()));
    }
    if key.is_empty() {
        return Err(Error::Validation("object key cannot be empty".into()));
    }
    if task_count == 0 {
        return Err(Error::Validation("task count must be at least 1".into()));
    }
    Ok(())
}

/// Pick the single error a failed transfer reports
///
/// The lowest-numbered client or integrity failure wins, so the caller sees
/// the cause of an abort rather than whatever raced alongside it. Otherwise
/// the lowest-numbered failure is reported.
pub(crate) fn terminal_error(results: Vec<PartResult>) -> Option<Error> {
    let mut aborting: Option<(u32, Error)> = None;
    let mut other: Option<(u32, Error)> = None;
    let mut skipped: Option<u32> = None;

    for PartResult {
        part_number,
        outcome,
    } in results
    {
        match outcome {
            PartOutcome::Completed => {}
            PartOutcome::Skipped => {
                skipped = Some(skipped.map_or(part_number, |n| n.min(part_number)));
            }
            PartOutcome::Failed(e) => {
                let slot = if e.aborts_transfer() {
                    &mut aborting
                } else {
                    &mut other
                };
                if slot.as_ref().is_none_or(|(n, _)| part_number < *n) {
                    *slot = Some((part_number, e));
                }
            }
        }
    }

    aborting
        .or(other)
        .map(|(_, e)| e)
        .or_else(|| skipped.map(|n| Error::Integrity(format!("part {n} was never transferred"))))
}

async fn discard_store(store: Option<&CheckpointStore>) {
    if let Some(store) = store
        && let Err(e) = store.remove().await
    {
        tracing::warn!(path = %store.path().display(), error = %e, "Failed to remove checkpoint");
    }
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove temp file"),
    }
}

async fn temp_matches(path: &Path, size: u64) -> bool {
    matches!(tokio::fs::metadata(path).await, Ok(m) if m.is_file() && m.len() == size)
}

/// Create (or truncate) the temp file at its final length
async fn presize_temp(path: &Path, size: u64) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file = tokio::fs::File::create(path).await?;
    file.set_len(size).await?;
    file.sync_all().await?;
    Ok(())
}

/// Move the finished temp file to its destination
async fn place_file(temp: &Path, destination: &Path) -> std::io::Result<()> {
    match tokio::fs::rename(temp, destination).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
            tracing::debug!(
                temp = %temp.display(),
                destination = %destination.display(),
                "Rename crosses devices, copying instead"
            );
            copy_verified(temp, destination).await
        }
        Err(e) => Err(e),
    }
}

/// Copy `src` to `dst`, verify the copy, then delete `src`
///
/// On a mismatch the partial copy is removed and `src` is kept.
pub(crate) async fn copy_verified(src: &Path, dst: &Path) -> std::io::Result<()> {
    let expected_len = tokio::fs::metadata(src).await?.len();
    let copied = tokio::fs::copy(src, dst).await?;
    tokio::fs::OpenOptions::new()
        .write(true)
        .open(dst)
        .await?
        .sync_all()
        .await?;

    let verified = copied == expected_len && sha256_file(src).await? == sha256_file(dst).await?;
    if !verified {
        remove_quietly(dst).await;
        return Err(std::io::Error::other(format!(
            "copy of {} to {} does not match the original",
            src.display(),
            dst.display()
        )));
    }

    tokio::fs::remove_file(src).await?;
    Ok(())
}

async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
