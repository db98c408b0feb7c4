//! Bridge from worker status transitions into the session state store.

use std::sync::Arc;

use serde_json::Value;

use herald_core::current_unix_timestamp_ms;
use herald_engine::{CycleProgress, StatusPublisher, WorkerSpec};
use herald_state::SessionStateStore;

/// Publishes every worker transition as a processing-state update keyed by
/// the session that started the worker; the store fans it out to every
/// session sharing the operator email.
pub struct StorePublisher {
    store: Arc<SessionStateStore>,
}

impl StorePublisher {
    pub fn new(store: Arc<SessionStateStore>) -> Self {
        Self { store }
    }
}

impl StatusPublisher for StorePublisher {
    fn publish(&self, spec: &WorkerSpec, status: &str, progress: &CycleProgress) {
        let progress = serde_json::to_value(progress).unwrap_or(Value::Null);
        self.store.update_processing_state(
            &spec.session_id,
            &spec.profile_id,
            spec.kind,
            status,
            progress,
            current_unix_timestamp_ms(),
        );
    }
}
