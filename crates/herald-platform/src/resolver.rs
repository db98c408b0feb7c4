//! Batch resolution of conversation ids to their latest message, and
//! derivation of the counterpart identity from it.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::warn;

use crate::client::PlatformClient;
use crate::outcome::CallOutcome;
use crate::pacing::wait_or_cancel;
use crate::types::{CollectAbort, LastMessage};

/// Resolves the latest message per conversation in one round trip. Entries
/// the platform cannot resolve (or that fail to parse) are simply absent
/// from the mapping; the caller treats them as skips.
pub async fn resolve_counterparts(
    client: &PlatformClient,
    profile_id: &str,
    conversation_ids: &[String],
    cooldown: Duration,
    cancel_rx: &mut watch::Receiver<bool>,
) -> Result<HashMap<String, LastMessage>, CollectAbort> {
    if conversation_ids.is_empty() {
        return Ok(HashMap::new());
    }

    loop {
        if *cancel_rx.borrow() {
            return Err(CollectAbort::Cancelled);
        }

        match client.last_messages_batch(profile_id, conversation_ids).await {
            CallOutcome::Success(data) => return Ok(parse_last_messages(&data)),
            CallOutcome::RateLimited | CallOutcome::TransientTimeout => {
                if !wait_or_cancel(cooldown, cancel_rx).await {
                    return Err(CollectAbort::Cancelled);
                }
            }
            CallOutcome::Fatal(reason) => return Err(CollectAbort::Fatal(reason)),
            CallOutcome::SoftError(reason) => {
                warn!(
                    profile_id,
                    reason = reason.as_str(),
                    "batch message resolution soft-failed",
                );
                return Ok(HashMap::new());
            }
        }
    }
}

/// The counterpart is whoever the profile is talking to: when the latest
/// message was addressed to the profile, it is the sender; otherwise it is
/// the declared recipient.
pub fn counterpart_for_profile(profile_id: &str, message: &LastMessage) -> String {
    if message.recipient_id == profile_id {
        message.sender_id.clone()
    } else {
        message.recipient_id.clone()
    }
}

fn parse_last_messages(data: &Value) -> HashMap<String, LastMessage> {
    let Some(items) = data.get("messages").and_then(Value::as_array) else {
        return HashMap::new();
    };
    items
        .iter()
        .filter_map(|item| serde_json::from_value::<LastMessage>(item.clone()).ok())
        .map(|message| (message.conversation_id.clone(), message))
        .collect()
}
