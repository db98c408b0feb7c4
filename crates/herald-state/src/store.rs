//! Central registry of client sessions and per-profile processing state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use herald_core::{is_idle_expired, MessageKind};

use crate::events::{ProcessingSnapshot, StateEvent};

/// Sessions idle longer than this are evicted by the background sweep.
pub const DEFAULT_SESSION_MAX_IDLE_MS: u64 = 9 * 60 * 60 * 1_000;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60_000;

#[derive(Debug, Clone)]
pub struct SessionStateStoreConfig {
    pub max_session_idle_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for SessionStateStoreConfig {
    fn default() -> Self {
        Self {
            max_session_idle_ms: DEFAULT_SESSION_MAX_IDLE_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub operator_email: Option<String>,
    pub last_activity_unix_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct StateKey {
    session_id: String,
    kind: MessageKind,
    profile_id: String,
}

#[derive(Debug, Clone)]
struct ProcessingState {
    status: String,
    progress: Value,
    updated_unix_ms: u64,
}

struct Subscriber {
    id: u64,
    session_id: String,
    tx: mpsc::UnboundedSender<StateEvent>,
}

#[derive(Default)]
struct StoreInner {
    sessions: BTreeMap<String, SessionRecord>,
    email_index: BTreeMap<String, BTreeSet<String>>,
    processing: BTreeMap<StateKey, ProcessingState>,
    subscribers: Vec<Subscriber>,
    next_subscriber_id: u64,
}

/// Exclusive owner of session records and processing-state entries, and the
/// publish/subscribe hub that keeps every session of one operator email
/// consistent.
pub struct SessionStateStore {
    config: SessionStateStoreConfig,
    inner: Mutex<StoreInner>,
}

impl SessionStateStore {
    pub fn new(config: SessionStateStoreConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(StoreInner::default()),
        }
    }

    pub fn config(&self) -> &SessionStateStoreConfig {
        &self.config
    }

    /// Upserts a session record, keeping the email index consistent: the id
    /// is removed from its previous email's set before being indexed under
    /// the new one. The update is announced to every session sharing the
    /// email.
    pub fn set_session(&self, session_id: &str, operator_email: Option<&str>, now_unix_ms: u64) {
        let mut inner = self.guard();
        if let Some(previous) = inner.sessions.get(session_id) {
            if let Some(old_email) = previous.operator_email.clone() {
                if Some(old_email.as_str()) != operator_email {
                    detach_from_email_index(&mut inner, &old_email, session_id);
                }
            }
        }

        let record = SessionRecord {
            session_id: session_id.to_string(),
            operator_email: operator_email.map(str::to_string),
            last_activity_unix_ms: now_unix_ms,
        };
        inner.sessions.insert(session_id.to_string(), record);
        if let Some(email) = operator_email {
            inner
                .email_index
                .entry(email.to_string())
                .or_default()
                .insert(session_id.to_string());
        }

        let targets = fanout_targets(&inner, session_id);
        publish_to_sessions(
            &mut inner,
            &targets,
            StateEvent::SessionUpdate {
                session_id: session_id.to_string(),
                operator_email: operator_email.map(str::to_string),
                removed: false,
            },
        );
    }

    /// Refreshes a session's activity stamp. Returns false for unknown ids.
    pub fn touch_session(&self, session_id: &str, now_unix_ms: u64) -> bool {
        let mut inner = self.guard();
        match inner.sessions.get_mut(session_id) {
            Some(record) => {
                record.last_activity_unix_ms = now_unix_ms;
                true
            }
            None => false,
        }
    }

    pub fn session(&self, session_id: &str) -> Option<SessionRecord> {
        self.guard().sessions.get(session_id).cloned()
    }

    pub fn sessions_for_email(&self, email: &str) -> Vec<SessionRecord> {
        let inner = self.guard();
        inner
            .email_index
            .get(email)
            .into_iter()
            .flatten()
            .filter_map(|session_id| inner.sessions.get(session_id).cloned())
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.guard().sessions.len()
    }

    /// Upserts the `(session, kind, profile)` entry and fans the update out
    /// to every session sharing the operator email. Updates that would move
    /// the entry's timestamp backwards are dropped, so readers always
    /// observe a non-decreasing timestamp per key.
    pub fn update_processing_state(
        &self,
        session_id: &str,
        profile_id: &str,
        kind: MessageKind,
        status: &str,
        progress: Value,
        updated_unix_ms: u64,
    ) -> bool {
        let mut inner = self.guard();
        let key = StateKey {
            session_id: session_id.to_string(),
            kind,
            profile_id: profile_id.to_string(),
        };
        if let Some(existing) = inner.processing.get(&key) {
            if existing.updated_unix_ms > updated_unix_ms {
                return false;
            }
        }
        inner.processing.insert(
            key,
            ProcessingState {
                status: status.to_string(),
                progress: progress.clone(),
                updated_unix_ms,
            },
        );

        let targets = fanout_targets(&inner, session_id);
        publish_to_sessions(
            &mut inner,
            &targets,
            StateEvent::StateUpdate(ProcessingSnapshot {
                session_id: session_id.to_string(),
                profile_id: profile_id.to_string(),
                kind,
                status: status.to_string(),
                progress,
                updated_unix_ms,
            }),
        );
        true
    }

    /// Entries written by one session, unmerged.
    pub fn states_for_session(&self, session_id: &str) -> Vec<ProcessingSnapshot> {
        collect_states_for_session(&self.guard(), session_id)
    }

    /// Most recent entry per `(profile, kind)` across every session of the
    /// email, ties going to the later timestamp.
    pub fn states_for_email(&self, email: &str) -> Vec<ProcessingSnapshot> {
        collect_states_for_email(&self.guard(), email)
    }

    /// The initial snapshot for a connecting client: merged states when the
    /// session belongs to a known email, otherwise that session's own
    /// entries.
    pub fn snapshot_for_session(&self, session_id: &str) -> Vec<ProcessingSnapshot> {
        collect_snapshot_for_session(&self.guard(), session_id)
    }

    /// Removes the session, its processing entries, and its index entry,
    /// then notifies the email's other sessions. The removed session's own
    /// subscribers are dropped, ending their streams.
    pub fn remove_session(&self, session_id: &str) -> bool {
        let mut inner = self.guard();
        let Some(record) = inner.sessions.remove(session_id) else {
            return false;
        };
        if let Some(email) = record.operator_email.as_deref() {
            detach_from_email_index(&mut inner, email, session_id);
        }
        inner
            .processing
            .retain(|key, _| key.session_id != session_id);

        let mut targets = fanout_targets(&inner, session_id);
        if let Some(email) = record.operator_email.as_deref() {
            if let Some(session_ids) = inner.email_index.get(email) {
                targets.extend(session_ids.iter().cloned());
            }
        }
        publish_to_sessions(
            &mut inner,
            &targets,
            StateEvent::SessionUpdate {
                session_id: session_id.to_string(),
                operator_email: record.operator_email.clone(),
                removed: true,
            },
        );
        inner
            .subscribers
            .retain(|subscriber| subscriber.session_id != session_id);
        true
    }

    /// Evicts sessions idle past the configured threshold. Returns the
    /// removed ids.
    pub fn sweep_expired(&self, now_unix_ms: u64) -> Vec<String> {
        let expired = {
            let inner = self.guard();
            inner
                .sessions
                .values()
                .filter(|record| {
                    is_idle_expired(
                        record.last_activity_unix_ms,
                        now_unix_ms,
                        self.config.max_session_idle_ms,
                    )
                })
                .map(|record| record.session_id.clone())
                .collect::<Vec<_>>()
        };
        for session_id in &expired {
            self.remove_session(session_id);
        }
        expired
    }

    /// Registers a push subscriber for the session. The receiver's first
    /// event is the initial snapshot, enqueued under the same lock so no
    /// update between snapshot and subscription can be missed.
    pub fn subscribe(&self, session_id: &str) -> (u64, mpsc::UnboundedReceiver<StateEvent>) {
        let mut inner = self.guard();
        let states = collect_snapshot_for_session(&inner, session_id);
        let id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(StateEvent::InitialState { states });
        inner.subscribers.push(Subscriber {
            id,
            session_id: session_id.to_string(),
            tx,
        });
        (id, rx)
    }

    pub fn unsubscribe(&self, subscriber_id: u64) {
        self.guard()
            .subscribers
            .retain(|subscriber| subscriber.id != subscriber_id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.guard().subscribers.len()
    }

    fn guard(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn snapshot(key: &StateKey, state: &ProcessingState) -> ProcessingSnapshot {
    ProcessingSnapshot {
        session_id: key.session_id.clone(),
        profile_id: key.profile_id.clone(),
        kind: key.kind,
        status: state.status.clone(),
        progress: state.progress.clone(),
        updated_unix_ms: state.updated_unix_ms,
    }
}

fn collect_states_for_session(inner: &StoreInner, session_id: &str) -> Vec<ProcessingSnapshot> {
    inner
        .processing
        .iter()
        .filter(|(key, _)| key.session_id == session_id)
        .map(|(key, state)| snapshot(key, state))
        .collect()
}

fn collect_states_for_email(inner: &StoreInner, email: &str) -> Vec<ProcessingSnapshot> {
    let Some(session_ids) = inner.email_index.get(email) else {
        return Vec::new();
    };
    let mut merged: BTreeMap<(String, MessageKind), ProcessingSnapshot> = BTreeMap::new();
    for (key, state) in inner
        .processing
        .iter()
        .filter(|(key, _)| session_ids.contains(&key.session_id))
    {
        let entry_key = (key.profile_id.clone(), key.kind);
        let candidate = snapshot(key, state);
        match merged.get(&entry_key) {
            Some(existing) if existing.updated_unix_ms > candidate.updated_unix_ms => {}
            _ => {
                merged.insert(entry_key, candidate);
            }
        }
    }
    merged.into_values().collect()
}

fn collect_snapshot_for_session(inner: &StoreInner, session_id: &str) -> Vec<ProcessingSnapshot> {
    match inner
        .sessions
        .get(session_id)
        .and_then(|record| record.operator_email.as_deref())
    {
        Some(email) => collect_states_for_email(inner, email),
        None => collect_states_for_session(inner, session_id),
    }
}

/// Every session the event must reach: all sessions sharing the origin's
/// email, or just the origin when its email is unknown.
fn fanout_targets(inner: &StoreInner, session_id: &str) -> BTreeSet<String> {
    let mut targets = BTreeSet::new();
    targets.insert(session_id.to_string());
    if let Some(email) = inner
        .sessions
        .get(session_id)
        .and_then(|record| record.operator_email.as_deref())
    {
        if let Some(session_ids) = inner.email_index.get(email) {
            targets.extend(session_ids.iter().cloned());
        }
    }
    targets
}

fn publish_to_sessions(inner: &mut StoreInner, targets: &BTreeSet<String>, event: StateEvent) {
    inner.subscribers.retain(|subscriber| {
        if !targets.contains(&subscriber.session_id) {
            return true;
        }
        subscriber.tx.send(event.clone()).is_ok()
    });
}

fn detach_from_email_index(inner: &mut StoreInner, email: &str, session_id: &str) {
    if let Some(session_ids) = inner.email_index.get_mut(email) {
        session_ids.remove(session_id);
        if session_ids.is_empty() {
            inner.email_index.remove(email);
        }
    }
}
