//! Per-profile memory of counterparts already contacted this run.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use herald_core::MessageKind;

/// Keyed store of contacted counterparts, one set per
/// `(profile_id, message_kind)`. Entries live for the process lifetime or
/// until an explicit clear; nothing is persisted.
#[derive(Default)]
pub struct BlockListRegistry {
    inner: Mutex<HashMap<(String, MessageKind), HashSet<String>>>,
}

impl BlockListRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, profile_id: &str, kind: MessageKind, counterpart_id: &str) -> bool {
        self.guard()
            .get(&(profile_id.to_string(), kind))
            .is_some_and(|entries| entries.contains(counterpart_id))
    }

    /// Records a contacted counterpart. Returns false when it was already
    /// present.
    pub fn record(&self, profile_id: &str, kind: MessageKind, counterpart_id: &str) -> bool {
        self.guard()
            .entry((profile_id.to_string(), kind))
            .or_default()
            .insert(counterpart_id.to_string())
    }

    /// Drops every entry for the profile and kind, returning how many were
    /// removed. Only future send decisions are affected.
    pub fn clear(&self, profile_id: &str, kind: MessageKind) -> usize {
        self.guard()
            .remove(&(profile_id.to_string(), kind))
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    pub fn snapshot(&self, profile_id: &str, kind: MessageKind) -> Vec<String> {
        let mut entries = self
            .guard()
            .get(&(profile_id.to_string(), kind))
            .map(|entries| entries.iter().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        entries.sort();
        entries
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<(String, MessageKind), HashSet<String>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
