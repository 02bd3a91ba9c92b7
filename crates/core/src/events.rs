//! Transfer event notifications
//!
//! Observers are optional. An engine run with [`NoopEvents`] behaves exactly
//! like one with a real sink.

use serde::Serialize;

use crate::error::ErrorKind;

/// Something notable happened during a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransferEvent {
    /// A valid checkpoint was found and will be continued
    CheckpointResumed { completed: usize, pending: usize },
    /// A checkpoint existed but could not be used
    CheckpointDiscarded { reason: String },
    /// A new remote multipart session was opened
    SessionOpened { session_id: String },
    /// A remote multipart session was aborted
    SessionAborted { session_id: String },
    PartCompleted { part_number: u32, size: u64 },
    PartFailed { part_number: u32, kind: ErrorKind, message: String },
    /// The part was never attempted because the transfer was aborting
    PartSkipped { part_number: u32 },
    FinalizeSucceeded { etag: Option<String> },
    FinalizeFailed { kind: ErrorKind, message: String },
}

/// Receiver of [`TransferEvent`]s
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &TransferEvent);
}

impl<F> EventSink for F
where
    F: Fn(&TransferEvent) + Send + Sync,
{
    fn on_event(&self, event: &TransferEvent) {
        self(event)
    }
}

/// Sink that ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEvents;

impl EventSink for NoopEvents {
    fn on_event(&self, _event: &TransferEvent) {}
}
