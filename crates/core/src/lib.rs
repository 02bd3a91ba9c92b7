//! mpx-core: Resumable multipart transfer engine
//!
//! This crate moves large objects to and from S3-compatible storage in
//! parts, with:
//! - Deterministic part planning under the 10,000-part ceiling
//! - Checkpoint files that let an interrupted transfer resume
//! - A bounded pool of part workers with coarse abort semantics
//! - Throttled progress reporting and an optional event observer
//! - Alias and configuration management for the CLI
//!
//! The engine only talks to the remote side through [`MultipartTransport`],
//! so it is independent of any specific S3 SDK.

pub mod alias;
pub mod checkpoint;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod planner;
pub mod pool;
pub mod progress;
pub mod retry;
pub mod source;
pub mod traits;

pub use alias::{Alias, AliasManager};
pub use checkpoint::{CheckpointStore, Direction, TransferCheckpoint};
pub use config::{Config, ConfigManager, TransferDefaults};
pub use controller::{
    DownloadRequest, TransferController, TransferState, UploadOutcome, UploadRequest,
};
pub use error::{Error, ErrorKind, Result};
pub use events::{EventSink, NoopEvents, TransferEvent};
pub use planner::{MAX_PARTS, PartPlan, PartRange, plan_download, plan_upload};
pub use pool::{AbortFlag, PartExecutor, PartOutcome, PartResult, WorkerPool};
pub use progress::{ProgressListener, ProgressPolicy, ProgressSnapshot, ProgressTracker};
pub use retry::{RetryBuilder, RetryConfig, is_retryable_error, retry_with_backoff};
pub use source::UploadSource;
pub use traits::{ByteStream, CompletedPart, MultipartTransport, ObjectMeta, ObjectMetadata};
