//! Cooperative cancellation
//!
//! A running export cannot be interrupted mid-call; it polls a shared
//! token at a fixed set of checkpoints instead.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag for one export task
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns true when cancellation was requested, logging where it was seen.
    pub fn observe(&self, checkpoint: Checkpoint, task_id: &str) -> bool {
        let cancelled = self.is_cancelled();
        if cancelled {
            tracing::info!(task_id, %checkpoint, "cancellation observed");
        }
        cancelled
    }
}

/// Points in the per-snapshot loop where cancellation is honoured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// Before any work on the next snapshot
    BeforeSnapshot,
    /// After the track mutations were applied
    AfterApply,
    /// Immediately before the bounce is issued
    BeforeRender,
    /// After the bounce returned; the fresh temp file is discarded
    AfterRender,
}

impl Checkpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeSnapshot => "before_snapshot",
            Self::AfterApply => "after_apply",
            Self::BeforeRender => "before_render",
            Self::AfterRender => "after_render",
        }
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
