//! Seam through which workers propose status transitions.

use crate::worker::{CycleProgress, WorkerSpec};

/// Receives every status transition a worker issues. Implementations fan the
/// update out to whatever session-synchronization layer is wired in; workers
/// never mutate shared state directly.
pub trait StatusPublisher: Send + Sync {
    fn publish(&self, spec: &WorkerSpec, status: &str, progress: &CycleProgress);
}

/// Publisher that drops every update. Used where no session layer exists.
#[derive(Clone, Default)]
pub struct NoopStatusPublisher;

impl StatusPublisher for NoopStatusPublisher {
    fn publish(&self, _spec: &WorkerSpec, _status: &str, _progress: &CycleProgress) {}
}
