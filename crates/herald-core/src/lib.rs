//! Foundational low-level utilities shared across Herald crates.
//!
//! Provides the message-kind vocabulary and the time helpers used by
//! processing-state timestamps and the session inactivity sweep.

pub mod message_kind;
pub mod time_utils;

pub use message_kind::MessageKind;
pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms, is_idle_expired};
