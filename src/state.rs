use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

/// Cross-task sweep state: the cancel flag and the completed-cell counter.
///
/// Clones share the same flag and counter, so a clone handed to another
/// task can cancel the sweep or watch its progress.
#[derive(Debug, Clone, Default)]
pub struct SweepState {
    cancelled: Arc<AtomicBool>,
    completed: Arc<AtomicUsize>,
}

impl SweepState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Takes effect before the next cell is submitted.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Cells that produced an image in the current sweep.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    /// A handle that can only cancel.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancelled.clone())
    }

    /// Clear both the flag and the counter at the start of a sweep.
    pub(crate) fn reset(&self) {
        self.cancelled.store(false, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
    }

    /// Count one more successful cell and return the new total.
    pub(crate) fn record_completed(&self) -> usize {
        self.completed.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Cloneable cancel trigger for a running sweep.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
