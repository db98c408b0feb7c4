//! Online-presence heartbeat tied to a worker's lifetime.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use herald_platform::PlatformClient;

/// Spawns the presence loop for one profile: an immediate liveness call,
/// then one per interval until the token flips. Failures are logged and
/// swallowed; the heartbeat is an independent failure domain and never
/// cancels the owning worker.
pub fn spawn_presence_heartbeat(
    client: Arc<PlatformClient>,
    profile_id: String,
    interval: Duration,
    mut cancel_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = client.set_online_presence(&profile_id, true).await;
                    if !outcome.is_success() {
                        warn!(
                            profile_id = profile_id.as_str(),
                            ?outcome,
                            "presence heartbeat failed",
                        );
                    }
                }
                changed = cancel_rx.changed() => {
                    if changed.is_err() || *cancel_rx.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
