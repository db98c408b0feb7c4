//! Ownership of the `(profile_id, message_kind)` → active worker map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use herald_core::{current_unix_timestamp_ms, MessageKind};
use herald_platform::PlatformClient;

use crate::block_list::BlockListRegistry;
use crate::heartbeat::spawn_presence_heartbeat;
use crate::publisher::StatusPublisher;
use crate::worker::{
    run_worker, CycleProgress, WorkerContext, WorkerExit, WorkerSpec, WorkerTimings,
    MAIL_MIN_CONTENT_CHARS, STATUS_PROCESSING, STATUS_READY,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerKey {
    pub profile_id: String,
    pub kind: MessageKind,
}

impl WorkerKey {
    pub fn new(profile_id: &str, kind: MessageKind) -> Self {
        Self {
            profile_id: profile_id.to_string(),
            kind,
        }
    }
}

/// Result of a start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A worker already owns the key; the request is a no-op.
    AlreadyRunning,
    /// The request failed validation and no worker was created.
    Rejected(String),
}

struct ActiveWorker {
    cancel_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
    started_unix_ms: u64,
}

#[derive(Default)]
struct SupervisorInner {
    active: HashMap<WorkerKey, ActiveWorker>,
    statuses: HashMap<WorkerKey, String>,
}

struct SupervisorShared {
    client: Arc<PlatformClient>,
    blocks: Arc<BlockListRegistry>,
    publisher: Arc<dyn StatusPublisher>,
    timings: WorkerTimings,
    inner: Mutex<SupervisorInner>,
}

impl SupervisorShared {
    fn guard(&self) -> MutexGuard<'_, SupervisorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn note_status(&self, key: &WorkerKey, status: &str) {
        self.guard()
            .statuses
            .insert(key.clone(), status.to_string());
    }

    fn deregister(&self, key: &WorkerKey, exit: &WorkerExit) {
        let mut inner = self.guard();
        inner.active.remove(key);
        // Cleaned-up keys read back as "Ready"; the terminal status string
        // stays visible to clients through the session state store.
        inner.statuses.remove(key);
        info!(
            profile_id = key.profile_id.as_str(),
            kind = key.kind.as_str(),
            stopped = matches!(exit, WorkerExit::Stopped),
            "worker deregistered",
        );
    }
}

/// Enforces at-most-one live worker per key and owns worker lifecycle:
/// start, cooperative stop, status reads, and block-list clears.
pub struct WorkerSupervisor {
    shared: Arc<SupervisorShared>,
}

impl WorkerSupervisor {
    pub fn new(
        client: Arc<PlatformClient>,
        blocks: Arc<BlockListRegistry>,
        publisher: Arc<dyn StatusPublisher>,
        timings: WorkerTimings,
    ) -> Self {
        Self {
            shared: Arc::new(SupervisorShared {
                client,
                blocks,
                publisher,
                timings,
                inner: Mutex::new(SupervisorInner::default()),
            }),
        }
    }

    /// Creates a worker for the key unless one is already registered. The
    /// check and the registration happen under one lock, so concurrent
    /// duplicate starts cannot race a second worker into existence.
    pub fn start(&self, spec: WorkerSpec) -> StartOutcome {
        if let Err(reason) = validate_spec(&spec) {
            return StartOutcome::Rejected(reason);
        }
        let key = WorkerKey::new(&spec.profile_id, spec.kind);

        let mut inner = self.shared.guard();
        if inner.active.contains_key(&key) {
            return StartOutcome::AlreadyRunning;
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (heartbeat_tx, heartbeat_rx) = watch::channel(false);
        let heartbeat = spawn_presence_heartbeat(
            Arc::clone(&self.shared.client),
            spec.profile_id.clone(),
            self.shared.timings.heartbeat_interval(),
            heartbeat_rx,
        );

        let shared = Arc::clone(&self.shared);
        let task_key = key.clone();
        let context = WorkerContext {
            client: Arc::clone(&self.shared.client),
            blocks: Arc::clone(&self.shared.blocks),
            publisher: Arc::new(RecordingPublisher {
                shared: Arc::clone(&self.shared),
                key: key.clone(),
            }),
            spec,
            timings: self.shared.timings.clone(),
        };
        let handle = tokio::spawn(async move {
            let exit = run_worker(context, cancel_rx).await;
            let _ = heartbeat_tx.send(true);
            let _ = heartbeat.await;
            shared.deregister(&task_key, &exit);
        });

        inner
            .statuses
            .insert(key.clone(), STATUS_PROCESSING.to_string());
        inner.active.insert(
            key,
            ActiveWorker {
                cancel_tx,
                handle,
                started_unix_ms: current_unix_timestamp_ms(),
            },
        );
        StartOutcome::Started
    }

    /// Signals cancellation. The worker deregisters itself once it observes
    /// the token and has published its terminal status.
    pub fn stop(&self, profile_id: &str, kind: MessageKind) -> bool {
        let inner = self.shared.guard();
        match inner.active.get(&WorkerKey::new(profile_id, kind)) {
            Some(active) => {
                let _ = active.cancel_tx.send(true);
                true
            }
            None => false,
        }
    }

    /// Signals cancellation to every active worker, returning how many were
    /// signalled.
    pub fn stop_all(&self) -> usize {
        let inner = self.shared.guard();
        for active in inner.active.values() {
            let _ = active.cancel_tx.send(true);
        }
        inner.active.len()
    }

    /// Latest known status for the key; `"Ready"` when no worker has ever
    /// run or the last one has completed cleanup.
    pub fn status(&self, profile_id: &str, kind: MessageKind) -> String {
        self.shared
            .guard()
            .statuses
            .get(&WorkerKey::new(profile_id, kind))
            .cloned()
            .unwrap_or_else(|| STATUS_READY.to_string())
    }

    pub fn is_processing(&self, profile_id: &str, kind: MessageKind) -> bool {
        self.shared
            .guard()
            .active
            .contains_key(&WorkerKey::new(profile_id, kind))
    }

    pub fn active_count(&self) -> usize {
        self.shared.guard().active.len()
    }

    pub fn started_unix_ms(&self, profile_id: &str, kind: MessageKind) -> Option<u64> {
        self.shared
            .guard()
            .active
            .get(&WorkerKey::new(profile_id, kind))
            .map(|active| active.started_unix_ms)
    }

    /// Drops the profile's block entries for the kind. A running worker's
    /// decisions about counterparts it already contacted are unaffected;
    /// only future filtering changes.
    pub fn clear_blocks(&self, profile_id: &str, kind: MessageKind) -> usize {
        self.shared.blocks.clear(profile_id, kind)
    }

    pub fn blocked_counterparts(&self, profile_id: &str, kind: MessageKind) -> Vec<String> {
        self.shared.blocks.snapshot(profile_id, kind)
    }

    /// Signals every worker and waits for all of them to finish cleanup.
    pub async fn shutdown(&self) {
        let handles = {
            let mut inner = self.shared.guard();
            for active in inner.active.values() {
                let _ = active.cancel_tx.send(true);
            }
            inner
                .active
                .drain()
                .map(|(_, active)| active.handle)
                .collect::<Vec<_>>()
        };
        for handle in handles {
            let _ = handle.await;
        }
    }
}

/// Records each published status in the supervisor before forwarding it to
/// the wired session layer, so `status()` reflects the worker's latest
/// transition while it is alive.
struct RecordingPublisher {
    shared: Arc<SupervisorShared>,
    key: WorkerKey,
}

impl StatusPublisher for RecordingPublisher {
    fn publish(&self, spec: &WorkerSpec, status: &str, progress: &CycleProgress) {
        self.shared.note_status(&self.key, status);
        self.shared.publisher.publish(spec, status, progress);
    }
}

fn validate_spec(spec: &WorkerSpec) -> Result<(), String> {
    if spec.profile_id.trim().is_empty() {
        return Err("profile id is required".to_string());
    }
    if spec.operator_email.trim().is_empty() {
        return Err("operator id is required".to_string());
    }
    if spec.kind == MessageKind::Mail && spec.message.chars().count() < MAIL_MIN_CONTENT_CHARS {
        return Err(format!(
            "mail content must be at least {MAIL_MIN_CONTENT_CHARS} characters",
        ));
    }
    Ok(())
}
