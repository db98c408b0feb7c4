//! Cooperative send loops, one per `(profile_id, message_kind)`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{info, warn};

use herald_core::MessageKind;
use herald_platform::{
    counterpart_for_profile, fetch_eligible_conversations, resolve_counterparts, CallOutcome,
    ChatMessageRequest, CollectAbort, MailDraftRequest, PlatformClient,
};

use crate::block_list::BlockListRegistry;
use crate::publisher::StatusPublisher;

pub const STATUS_READY: &str = "Ready";
pub const STATUS_PROCESSING: &str = "Processing";
pub const STATUS_STOPPED: &str = "Processing stopped";

/// Pause between successful sends to the same profile's counterparts.
pub const DEFAULT_SEND_PACING_MS: u64 = 7_000;
/// Pause after a rate limit or edge timeout, and between idle cycles.
pub const DEFAULT_COOLDOWN_MS: u64 = 50_000;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 110_000;
/// Mail bodies shorter than this are rejected before a worker is created.
pub const MAIL_MIN_CONTENT_CHARS: usize = 150;

/// Everything a start request carries; immutable for the worker's lifetime.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub profile_id: String,
    pub kind: MessageKind,
    pub operator_email: String,
    pub session_id: String,
    pub message: String,
    pub attachment_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WorkerTimings {
    pub send_pacing_ms: u64,
    pub cooldown_ms: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for WorkerTimings {
    fn default() -> Self {
        Self {
            send_pacing_ms: DEFAULT_SEND_PACING_MS,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
        }
    }
}

impl WorkerTimings {
    pub fn send_pacing(&self) -> Duration {
        Duration::from_millis(self.send_pacing_ms.max(1))
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms.max(1))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }
}

/// Progress counters for the current cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleProgress {
    pub sent: u64,
    pub skipped: u64,
    pub total: u64,
}

/// How a worker left its loop. `Stopped` is the expected outcome of a stop
/// request; `Failed` carries the fatal reason surfaced to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    Stopped,
    Failed(String),
}

pub struct WorkerContext {
    pub client: Arc<PlatformClient>,
    pub blocks: Arc<BlockListRegistry>,
    pub publisher: Arc<dyn StatusPublisher>,
    pub spec: WorkerSpec,
    pub timings: WorkerTimings,
}

impl WorkerContext {
    fn publish(&self, status: &str, progress: &CycleProgress) {
        self.publisher.publish(&self.spec, status, progress);
    }
}

/// Outcome of delivering to one counterpart.
enum SendStep {
    Delivered(Value),
    Skipped(String),
    Cancelled,
    Fatal(String),
}

/// Runs the fetch → filter → resolve → send cycle until cancellation or a
/// fatal classification. The terminal status is published here, before
/// returning, so supervisors only have to deregister.
pub async fn run_worker(ctx: WorkerContext, mut cancel_rx: watch::Receiver<bool>) -> WorkerExit {
    let mut last_progress = CycleProgress::default();
    ctx.publish(STATUS_PROCESSING, &last_progress);

    let exit = loop {
        match run_cycle(&ctx, &mut cancel_rx).await {
            CycleEnd::Completed(progress) => {
                last_progress = progress;
                info!(
                    profile_id = ctx.spec.profile_id.as_str(),
                    kind = ctx.spec.kind.as_str(),
                    sent = progress.sent,
                    skipped = progress.skipped,
                    total = progress.total,
                    "worker cycle finished",
                );
                if !herald_platform::wait_or_cancel(ctx.timings.cooldown(), &mut cancel_rx).await {
                    break WorkerExit::Stopped;
                }
            }
            CycleEnd::Stopped(progress) => {
                last_progress = progress;
                break WorkerExit::Stopped;
            }
            CycleEnd::Failed(progress, reason) => {
                last_progress = progress;
                break WorkerExit::Failed(reason);
            }
        }
    };

    match &exit {
        WorkerExit::Stopped => ctx.publish(STATUS_STOPPED, &last_progress),
        WorkerExit::Failed(reason) => ctx.publish(reason, &last_progress),
    }
    exit
}

enum CycleEnd {
    Completed(CycleProgress),
    Stopped(CycleProgress),
    Failed(CycleProgress, String),
}

async fn run_cycle(ctx: &WorkerContext, cancel_rx: &mut watch::Receiver<bool>) -> CycleEnd {
    let mut progress = CycleProgress::default();
    if *cancel_rx.borrow() {
        return CycleEnd::Stopped(progress);
    }

    let candidates = match fetch_eligible_conversations(
        &ctx.client,
        &ctx.spec.profile_id,
        ctx.spec.kind,
        ctx.timings.cooldown(),
        cancel_rx,
    )
    .await
    {
        Ok(candidates) => candidates,
        Err(CollectAbort::Cancelled) => return CycleEnd::Stopped(progress),
        Err(CollectAbort::Fatal(reason)) => return CycleEnd::Failed(progress, reason),
    };

    let eligible = candidates
        .into_iter()
        .filter(|candidate| !candidate.blocked_by_platform)
        .filter(|candidate| {
            !ctx.blocks
                .contains(&ctx.spec.profile_id, ctx.spec.kind, &candidate.counterpart_id)
        })
        .collect::<Vec<_>>();

    progress.total = eligible.len() as u64;
    ctx.publish(STATUS_PROCESSING, &progress);

    if eligible.is_empty() {
        return CycleEnd::Completed(progress);
    }

    let conversation_ids = eligible
        .iter()
        .map(|candidate| candidate.conversation_id.clone())
        .collect::<Vec<_>>();
    let resolved = match resolve_counterparts(
        &ctx.client,
        &ctx.spec.profile_id,
        &conversation_ids,
        ctx.timings.cooldown(),
        cancel_rx,
    )
    .await
    {
        Ok(resolved) => resolved,
        Err(CollectAbort::Cancelled) => return CycleEnd::Stopped(progress),
        Err(CollectAbort::Fatal(reason)) => return CycleEnd::Failed(progress, reason),
    };

    for candidate in &eligible {
        if *cancel_rx.borrow() {
            return CycleEnd::Stopped(progress);
        }

        let Some(last_message) = resolved.get(&candidate.conversation_id) else {
            progress.skipped += 1;
            ctx.publish(STATUS_PROCESSING, &progress);
            continue;
        };
        let counterpart = counterpart_for_profile(&ctx.spec.profile_id, last_message);
        if ctx
            .blocks
            .contains(&ctx.spec.profile_id, ctx.spec.kind, &counterpart)
        {
            progress.skipped += 1;
            ctx.publish(STATUS_PROCESSING, &progress);
            continue;
        }

        let step = match ctx.spec.kind {
            MessageKind::Chat => deliver_chat(ctx, &counterpart, cancel_rx).await,
            MessageKind::Mail => deliver_mail(ctx, &counterpart, cancel_rx).await,
        };
        match step {
            SendStep::Delivered(_) => {
                ctx.blocks
                    .record(&ctx.spec.profile_id, ctx.spec.kind, &counterpart);
                progress.sent += 1;
                ctx.publish(STATUS_PROCESSING, &progress);
                if !herald_platform::wait_or_cancel(ctx.timings.send_pacing(), cancel_rx).await {
                    return CycleEnd::Stopped(progress);
                }
            }
            SendStep::Skipped(reason) => {
                warn!(
                    profile_id = ctx.spec.profile_id.as_str(),
                    counterpart = counterpart.as_str(),
                    reason = reason.as_str(),
                    "send skipped",
                );
                progress.skipped += 1;
                ctx.publish(STATUS_PROCESSING, &progress);
            }
            SendStep::Cancelled => return CycleEnd::Stopped(progress),
            SendStep::Fatal(reason) => return CycleEnd::Failed(progress, reason),
        }
    }

    CycleEnd::Completed(progress)
}

/// Chat delivery: the optional attachment first, then the templated text,
/// each classified independently.
async fn deliver_chat(
    ctx: &WorkerContext,
    counterpart: &str,
    cancel_rx: &mut watch::Receiver<bool>,
) -> SendStep {
    if let Some(attachment_id) = ctx.spec.attachment_id.as_deref() {
        let message =
            ChatMessageRequest::attachment(&ctx.spec.profile_id, counterpart, attachment_id);
        let step = attempt_until_classified(
            || ctx.client.send_chat_message(&message),
            ctx.timings.cooldown(),
            cancel_rx,
        )
        .await;
        if !matches!(step, SendStep::Delivered(_)) {
            return step;
        }
    }

    let message = ChatMessageRequest::text(&ctx.spec.profile_id, counterpart, &ctx.spec.message);
    attempt_until_classified(
        || ctx.client.send_chat_message(&message),
        ctx.timings.cooldown(),
        cancel_rx,
    )
    .await
}

/// Mail delivery is a three-step transaction: create a draft, send it, then
/// delete it. A create or send failure aborts only this counterpart; draft
/// cleanup is best-effort.
async fn deliver_mail(
    ctx: &WorkerContext,
    counterpart: &str,
    cancel_rx: &mut watch::Receiver<bool>,
) -> SendStep {
    let draft = MailDraftRequest {
        sender_id: ctx.spec.profile_id.clone(),
        recipients: vec![counterpart.to_string()],
        content: ctx.spec.message.clone(),
        attachments: ctx.spec.attachment_id.iter().cloned().collect(),
    };
    let created = attempt_until_classified(
        || ctx.client.create_mail_draft(&draft),
        ctx.timings.cooldown(),
        cancel_rx,
    )
    .await;
    let draft_id = match created {
        SendStep::Delivered(data) => match data.get("draft_id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                return SendStep::Skipped("mail draft response missing draft_id".to_string());
            }
        },
        other => return other,
    };

    let sent = attempt_until_classified(
        || ctx.client.send_mail_draft(&ctx.spec.profile_id, &draft_id),
        ctx.timings.cooldown(),
        cancel_rx,
    )
    .await;

    if matches!(sent, SendStep::Delivered(_) | SendStep::Skipped(_)) {
        let cleanup = ctx
            .client
            .delete_mail_draft(&ctx.spec.profile_id, &draft_id)
            .await;
        if !cleanup.is_success() {
            warn!(
                profile_id = ctx.spec.profile_id.as_str(),
                draft_id = draft_id.as_str(),
                "mail draft cleanup failed",
            );
        }
    }
    sent
}

/// Repeats one classified operation until it resolves to something other
/// than a rate limit or transient timeout. Retries never count as skipped
/// and never advance past the current counterpart.
async fn attempt_until_classified<F, Fut>(
    mut operation: F,
    cooldown: Duration,
    cancel_rx: &mut watch::Receiver<bool>,
) -> SendStep
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CallOutcome>,
{
    loop {
        if *cancel_rx.borrow() {
            return SendStep::Cancelled;
        }
        match operation().await {
            CallOutcome::Success(data) => return SendStep::Delivered(data),
            CallOutcome::RateLimited | CallOutcome::TransientTimeout => {
                if !herald_platform::wait_or_cancel(cooldown, cancel_rx).await {
                    return SendStep::Cancelled;
                }
            }
            CallOutcome::SoftError(reason) => return SendStep::Skipped(reason),
            CallOutcome::Fatal(reason) => return SendStep::Fatal(reason),
        }
    }
}
