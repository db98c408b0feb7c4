//! Per-profile worker loops, their supervisor, and the block-list registry.
//!
//! The supervisor guarantees at most one live worker per
//! `(profile_id, message_kind)`; workers are cooperative tokio tasks that
//! observe a watch-channel cancellation token at every suspension point and
//! publish each status transition through the [`StatusPublisher`] seam.

pub mod block_list;
pub mod heartbeat;
pub mod publisher;
pub mod supervisor;
pub mod worker;

pub use block_list::BlockListRegistry;
pub use heartbeat::spawn_presence_heartbeat;
pub use publisher::{NoopStatusPublisher, StatusPublisher};
pub use supervisor::{StartOutcome, WorkerKey, WorkerSupervisor};
pub use worker::{
    run_worker, CycleProgress, WorkerContext, WorkerExit, WorkerSpec, WorkerTimings,
    MAIL_MIN_CONTENT_CHARS, STATUS_PROCESSING, STATUS_READY, STATUS_STOPPED,
};
