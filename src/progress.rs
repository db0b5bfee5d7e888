//! Progress reporting and cancellation primitives for long-running runs.
//!
//! A full manuscript run can take hours, so the orchestrator publishes
//! [`ProgressUpdate`]s at fixed stage milestones through a pluggable
//! [`ProgressSink`]. Sinks are fire-and-forget: a slow or disconnected
//! consumer must never stall generation, so `emit` is synchronous and
//! infallible from the caller's point of view.
//!
//! Cancellation is cooperative: the orchestrator polls a [`CancelToken`] at
//! every stage and chapter boundary and aborts cleanly when it is set,
//! leaving any in-flight LLM call to finish and discarding its result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A single progress milestone.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressUpdate {
    /// Human-readable stage name, e.g. `"concept expansion"`.
    pub stage: String,
    /// Overall completion percentage in `[0.0, 100.0]`.
    pub percent: f32,
}

impl ProgressUpdate {
    #[must_use]
    pub fn new(stage: impl Into<String>, percent: f32) -> Self {
        Self {
            stage: stage.into(),
            percent,
        }
    }
}

/// Consumer of progress milestones.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, update: ProgressUpdate);
}

/// Sink that forwards updates into a `flume` channel.
///
/// The receiving half can live in a WebSocket handler, a CLI spinner, or a
/// test. Send failures (receiver dropped) are ignored.
pub struct ChannelSink {
    tx: flume::Sender<ProgressUpdate>,
}

impl ChannelSink {
    /// Create a sink plus the receiver for its updates.
    #[must_use]
    pub fn unbounded() -> (Self, flume::Receiver<ProgressUpdate>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, update: ProgressUpdate) {
        let _ = self.tx.send(update);
    }
}

/// Sink that logs each milestone through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn emit(&self, update: ProgressUpdate) {
        tracing::info!(
            stage = %update.stage,
            percent = update.percent,
            "generation progress"
        );
    }
}

/// Adapter turning a closure into a [`ProgressSink`].
pub struct FnSink<F>(pub F);

impl<F> ProgressSink for FnSink<F>
where
    F: Fn(&str, f32) + Send + Sync,
{
    fn emit(&self, update: ProgressUpdate) {
        (self.0)(&update.stage, update.percent);
    }
}

/// Cloneable cooperative cancellation flag.
///
/// Setting the flag does not interrupt an in-flight LLM call; the
/// orchestrator observes it at the next stage boundary.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
