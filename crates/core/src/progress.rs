//! Progress aggregation
//!
//! Workers add transferred bytes with a lock-free atomic increment. Emission
//! to the listener goes through a separate mutex that is only ever
//! `try_lock`ed on the hot path, so a slow listener never stalls a transfer.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Default interval for [`ProgressPolicy::ByTime`]
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// When to call the [`ProgressListener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPolicy {
    /// Emit every time the cumulative byte count crosses a multiple of this value
    ByBytes(u64),
    /// Emit at most once per interval, regardless of byte volume
    ByTime(Duration),
}

impl Default for ProgressPolicy {
    fn default() -> Self {
        ProgressPolicy::ByTime(DEFAULT_PROGRESS_INTERVAL)
    }
}

/// Point-in-time view of a transfer's progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    /// Bytes transferred so far, including bytes restored from a checkpoint
    pub transferred: u64,
    pub total: u64,
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Receiver of [`ProgressSnapshot`]s
pub trait ProgressListener: Send + Sync {
    fn on_progress(&self, snapshot: ProgressSnapshot);
}

impl<F> ProgressListener for F
where
    F: Fn(ProgressSnapshot) + Send + Sync,
{
    fn on_progress(&self, snapshot: ProgressSnapshot) {
        self(snapshot)
    }
}

/// Listener that ignores every snapshot
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressListener for NoopProgress {
    fn on_progress(&self, _snapshot: ProgressSnapshot) {}
}

struct EmitState {
    last_time: Instant,
    last_bytes: u64,
    emitted_any: bool,
}

/// Thread-safe byte counter with throttled emission
pub struct ProgressTracker {
    total: u64,
    transferred: AtomicU64,
    policy: ProgressPolicy,
    started: Instant,
    emit: Mutex<EmitState>,
    listener: Arc<dyn ProgressListener>,
}

impl ProgressTracker {
    /// `already_transferred` seeds the counter on resume
    pub fn new(
        total: u64,
        already_transferred: u64,
        policy: ProgressPolicy,
        listener: Arc<dyn ProgressListener>,
    ) -> Self {
        let now = Instant::now();
        let start = already_transferred.min(total);
        Self {
            total,
            transferred: AtomicU64::new(start),
            policy,
            started: now,
            emit: Mutex::new(EmitState {
                last_time: now,
                last_bytes: start,
                emitted_any: false,
            }),
            listener,
        }
    }

    /// Record `bytes` more transferred and emit if the policy says so
    pub fn add(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }
        self.transferred.fetch_add(bytes, Ordering::Relaxed);

        // A caller that loses the `try_lock` race leaves its crossing to the
        // holder, which re-checks after every emission. A crossing that lands
        // after the holder's last check is folded into the next emission or
        // into `finish`.
        loop {
            let Ok(mut state) = self.emit.try_lock() else {
                return;
            };
            if !self.is_due(&state) || !self.emit_locked(&mut state) {
                return;
            }
        }
    }

    fn is_due(&self, state: &EmitState) -> bool {
        match self.policy {
            ProgressPolicy::ByBytes(granularity) => {
                let granularity = granularity.max(1);
                self.transferred() / granularity > state.last_bytes / granularity
            }
            ProgressPolicy::ByTime(interval) => state.last_time.elapsed() >= interval,
        }
    }

    /// Emit the final value unconditionally (unless nothing changed)
    pub fn finish(&self) {
        let mut state = match self.emit.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.emit_locked(&mut state);
    }

    /// Bytes recorded so far, clamped to the total
    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed).min(self.total)
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Returns whether the listener was called
    fn emit_locked(&self, state: &mut EmitState) -> bool {
        // Re-read under the lock: a value read before acquiring it may be
        // older than one another thread already emitted.
        let value = self.transferred();
        if value < state.last_bytes || (value == state.last_bytes && state.emitted_any) {
            return false;
        }
        state.last_bytes = value;
        state.last_time = Instant::now();
        state.emitted_any = true;
        self.listener.on_progress(ProgressSnapshot {
            transferred: value,
            total: self.total,
            elapsed: self.started.elapsed(),
        });
        true
    }
}
