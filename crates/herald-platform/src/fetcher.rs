//! Paginated retrieval of the full eligible-conversation collection.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::warn;

use crate::client::PlatformClient;
use crate::outcome::CallOutcome;
use crate::pacing::wait_or_cancel;
use crate::types::{CollectAbort, ConversationCandidate};

/// Walks pages 1, 2, 3… until the platform returns an empty page, appending
/// results. Rate limits and edge timeouts re-request the *same* page after
/// the cooldown; they never advance the walk. Cancellation abandons the
/// cycle; a fatal classification propagates so the owning worker stops.
pub async fn fetch_eligible_conversations(
    client: &PlatformClient,
    profile_id: &str,
    kind: herald_core::MessageKind,
    cooldown: Duration,
    cancel_rx: &mut watch::Receiver<bool>,
) -> Result<Vec<ConversationCandidate>, CollectAbort> {
    let mut collected = Vec::new();
    let mut page = 1_u32;

    loop {
        if *cancel_rx.borrow() {
            return Err(CollectAbort::Cancelled);
        }

        match client.list_conversation_page(profile_id, kind, page).await {
            CallOutcome::Success(data) => {
                let candidates = parse_conversation_page(&data);
                if candidates.is_empty() {
                    return Ok(collected);
                }
                collected.extend(candidates);
                page = page.saturating_add(1);
            }
            CallOutcome::RateLimited | CallOutcome::TransientTimeout => {
                if !wait_or_cancel(cooldown, cancel_rx).await {
                    return Err(CollectAbort::Cancelled);
                }
            }
            CallOutcome::Fatal(reason) => return Err(CollectAbort::Fatal(reason)),
            CallOutcome::SoftError(reason) => {
                warn!(
                    profile_id,
                    page,
                    reason = reason.as_str(),
                    "conversation page fetch soft-failed",
                );
                return Ok(collected);
            }
        }
    }
}

fn parse_conversation_page(data: &Value) -> Vec<ConversationCandidate> {
    let Some(items) = data.get("conversations").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| serde_json::from_value(item.clone()).ok())
        .collect()
}
