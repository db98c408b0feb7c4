//! Cancellation-aware pacing waits.

use std::time::Duration;

use tokio::sync::watch;

/// Sleeps for `duration` unless the cancellation token flips first. Returns
/// true when the full wait elapsed, false when cancellation was observed.
/// Every cooldown and pacing pause in a worker must go through here so that
/// `stop()` is honored mid-sleep instead of after it.
pub async fn wait_or_cancel(duration: Duration, cancel_rx: &mut watch::Receiver<bool>) -> bool {
    if *cancel_rx.borrow() {
        return false;
    }
    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    return false;
                }
            }
        }
    }
}
