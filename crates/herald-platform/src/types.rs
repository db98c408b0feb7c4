//! Wire types exchanged with the platform API.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One eligible conversation as listed by the platform. Transient: re-fetched
/// every cycle, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConversationCandidate {
    pub conversation_id: String,
    pub counterpart_id: String,
    #[serde(default)]
    pub blocked_by_platform: bool,
}

/// Latest message of a conversation, used to derive the current counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LastMessage {
    pub conversation_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    #[serde(default)]
    pub content: Option<String>,
}

/// Outbound chat message payload.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessageRequest {
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_id: Option<String>,
}

impl ChatMessageRequest {
    pub fn text(sender_id: &str, recipient_id: &str, content: &str) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            content: content.to_string(),
            message_type: "text",
            attachment_id: None,
        }
    }

    pub fn attachment(sender_id: &str, recipient_id: &str, attachment_id: &str) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            content: String::new(),
            message_type: "attachment",
            attachment_id: Some(attachment_id.to_string()),
        }
    }
}

/// Outbound mail draft payload.
#[derive(Debug, Clone, Serialize)]
pub struct MailDraftRequest {
    pub sender_id: String,
    pub recipients: Vec<String>,
    pub content: String,
    pub attachments: Vec<String>,
}

/// A media attachment owned by a profile.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
}

/// Why a collection walk or resolution pass stopped before producing a
/// result. `Cancelled` means the cycle is abandoned; `Fatal` means the owning
/// worker must stop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectAbort {
    #[error("operation cancelled")]
    Cancelled,
    #[error("{0}")]
    Fatal(String),
}
