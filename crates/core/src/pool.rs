//! Bounded-concurrency part execution
//!
//! A fixed set of `min(task_count, pending)` workers pull parts from a shared
//! queue and push one [`PartResult`] per part to a channel. A worker picks up
//! the next part as soon as its current one finishes, so exactly that many
//! parts are in flight until the queue runs dry.
//!
//! Cancellation is coarse: once the [`AbortFlag`] is raised no new part
//! starts, but parts already running are never interrupted. [`WorkerPool::run`]
//! only returns after every worker has exited.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::checkpoint::SharedCheckpoint;
use crate::error::{Error, Result};
use crate::events::{EventSink, TransferEvent};
use crate::planner::PartRange;
use crate::progress::ProgressTracker;
use crate::source::PartReader;
use crate::traits::MultipartTransport;

/// Shared signal that stops further part dispatch
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How one part ended
#[derive(Debug)]
pub enum PartOutcome {
    Completed,
    Failed(Error),
    /// Never attempted because the abort flag was already raised
    Skipped,
}

/// Outcome of one part, reported back to the controller
#[derive(Debug)]
pub struct PartResult {
    pub part_number: u32,
    pub outcome: PartOutcome,
}

impl PartResult {
    /// Skipped parts count as failed: they still have to be transferred
    pub fn is_failed(&self) -> bool {
        !matches!(self.outcome, PartOutcome::Completed)
    }
}

/// Executes a single part
#[async_trait]
pub trait PartExecutor: Send + Sync + 'static {
    async fn execute(&self, part: PartRange) -> Result<()>;
}

/// Sliding-window scheduler for part transfers
#[derive(Debug, Clone)]
pub struct WorkerPool {
    task_count: usize,
}

impl WorkerPool {
    pub fn new(task_count: usize) -> Self {
        Self {
            task_count: task_count.max(1),
        }
    }

    /// Run every part in `pending` and return their results in part order
    pub async fn run<E: PartExecutor>(
        &self,
        pending: Vec<PartRange>,
        abort: &AbortFlag,
        executor: Arc<E>,
        events: Arc<dyn EventSink>,
    ) -> Vec<PartResult> {
        let expected: Vec<u32> = pending.iter().map(|p| p.part_number).collect();
        if expected.is_empty() {
            return Vec::new();
        }

        let workers = self.task_count.min(expected.len());
        tracing::debug!(parts = expected.len(), workers, "Dispatching parts");

        let queue = Arc::new(Mutex::new(VecDeque::from(pending)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut set = JoinSet::new();

        for worker in 0..workers {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let abort = abort.clone();
            let executor = Arc::clone(&executor);
            let events = Arc::clone(&events);

            set.spawn(async move {
                while let Some(part) = next_part(&queue) {
                    let outcome = if abort.is_raised() {
                        events.on_event(&TransferEvent::PartSkipped {
                            part_number: part.part_number,
                        });
                        PartOutcome::Skipped
                    } else {
                        run_part(worker, part, executor.as_ref(), &abort, events.as_ref()).await
                    };

                    let result = PartResult {
                        part_number: part.part_number,
                        outcome,
                    };
                    if tx.send(result).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let mut results = Vec::with_capacity(expected.len());
        while results.len() < expected.len() {
            match rx.recv().await {
                Some(result) => results.push(result),
                None => break,
            }
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Transfer worker terminated abnormally");
            }
        }

        // A panicking worker loses the part it was holding
        for part_number in expected {
            if !results.iter().any(|r| r.part_number == part_number) {
                results.push(PartResult {
                    part_number,
                    outcome: PartOutcome::Failed(Error::LocalIo(std::io::Error::other(
                        "transfer worker terminated before reporting",
                    ))),
                });
            }
        }

        results.sort_by_key(|r| r.part_number);
        results
    }
}

fn next_part(queue: &Mutex<VecDeque<PartRange>>) -> Option<PartRange> {
    match queue.lock() {
        Ok(mut guard) => guard.pop_front(),
        Err(poisoned) => poisoned.into_inner().pop_front(),
    }
}

async fn run_part<E: PartExecutor>(
    worker: usize,
    part: PartRange,
    executor: &E,
    abort: &AbortFlag,
    events: &dyn EventSink,
) -> PartOutcome {
    tracing::trace!(worker, part_number = part.part_number, "Part started");
    match executor.execute(part).await {
        Ok(()) => {
            tracing::debug!(part_number = part.part_number, size = part.size, "Part completed");
            events.on_event(&TransferEvent::PartCompleted {
                part_number: part.part_number,
                size: part.size,
            });
            PartOutcome::Completed
        }
        Err(e) => {
            if e.aborts_transfer() {
                abort.raise();
            }
            tracing::warn!(part_number = part.part_number, error = %e, "Part failed");
            events.on_event(&TransferEvent::PartFailed {
                part_number: part.part_number,
                kind: e.kind(),
                message: e.to_string(),
            });
            PartOutcome::Failed(e)
        }
    }
}

/// Reads a part from the source and uploads it into the open session
pub(crate) struct UploadPartExecutor<T: ?Sized> {
    pub transport: Arc<T>,
    pub bucket: String,
    pub key: String,
    pub session_id: String,
    pub reader: PartReader,
    pub checkpoint: Arc<SharedCheckpoint>,
    pub progress: Arc<ProgressTracker>,
}

#[async_trait]
impl<T> PartExecutor for UploadPartExecutor<T>
where
    T: MultipartTransport + ?Sized + 'static,
{
    async fn execute(&self, part: PartRange) -> Result<()> {
        let data = self.reader.read_part(part.offset, part.size).await?;
        let etag = self
            .transport
            .put_part(
                &self.bucket,
                &self.key,
                &self.session_id,
                part.part_number,
                data,
            )
            .await?;
        self.checkpoint
            .complete_part(part.part_number, Some(etag))
            .await?;
        self.progress.add(part.size);
        Ok(())
    }
}

/// Fetches a byte range and writes it into the pre-sized temp file
pub(crate) struct DownloadPartExecutor<T: ?Sized> {
    pub transport: Arc<T>,
    pub bucket: String,
    pub key: String,
    pub version_id: Option<String>,
    pub temp_path: PathBuf,
    pub checkpoint: Arc<SharedCheckpoint>,
    pub progress: Arc<ProgressTracker>,
}

#[async_trait]
impl<T> PartExecutor for DownloadPartExecutor<T>
where
    T: MultipartTransport + ?Sized + 'static,
{
    async fn execute(&self, part: PartRange) -> Result<()> {
        let mut body = self
            .transport
            .get_range(
                &self.bucket,
                &self.key,
                self.version_id.as_deref(),
                part.offset,
                part.end(),
            )
            .await?;

        // Each part writes through its own handle into a disjoint range
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&self.temp_path)
            .await?;
        file.seek(std::io::SeekFrom::Start(part.offset)).await?;

        let mut received: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            let len = chunk.len() as u64;
            if received + len > part.size {
                return Err(Error::Integrity(format!(
                    "part {} returned more than the {} bytes requested",
                    part.part_number, part.size
                )));
            }
            file.write_all(&chunk).await?;
            received += len;
            self.progress.add(len);
        }
        if received != part.size {
            return Err(Error::Integrity(format!(
                "part {} returned {received} bytes, expected {}",
                part.part_number, part.size
            )));
        }

        file.flush().await?;
        file.sync_data().await?;
        self.checkpoint.complete_part(part.part_number, None).await
    }
}
