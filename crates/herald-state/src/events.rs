//! Typed events pushed to subscribed clients.

use serde::Serialize;
use serde_json::Value;

use herald_core::MessageKind;

/// One processing-state entry as seen by clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingSnapshot {
    pub session_id: String,
    pub profile_id: String,
    pub kind: MessageKind,
    pub status: String,
    pub progress: Value,
    pub updated_unix_ms: u64,
}

/// Wire event emitted on the push channel, serialized as `{type, data}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum StateEvent {
    InitialState { states: Vec<ProcessingSnapshot> },
    StateUpdate(ProcessingSnapshot),
    SessionUpdate {
        session_id: String,
        operator_email: Option<String>,
        removed: bool,
    },
}
