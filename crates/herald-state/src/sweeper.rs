//! Background eviction of idle sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use herald_core::current_unix_timestamp_ms;

use crate::store::SessionStateStore;

/// Spawns the periodic sweep that evicts sessions idle past the store's
/// threshold. Runs until the shutdown token flips.
pub fn spawn_session_sweeper(
    store: Arc<SessionStateStore>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let interval = Duration::from_millis(store.config().sweep_interval_ms.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = store.sweep_expired(current_unix_timestamp_ms());
                    if !removed.is_empty() {
                        info!(count = removed.len(), "evicted idle sessions");
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
