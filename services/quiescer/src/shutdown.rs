//! Cooperative stop signal.
//!
//! A level-triggered flag built on a `watch` channel. Every suspension point of
//! an actor waits through [`StopListener::sleep`], so raising the signal
//! unblocks whichever wait is in progress.

use std::time::Duration;

use tokio::sync::watch;

/// Owning side of the stop signal.
#[derive(Debug)]
pub struct StopSignal {
    tx: watch::Sender<bool>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Raise the signal. Idempotent.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Create a listener observing this signal.
    pub fn listener(&self) -> StopListener {
        StopListener {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Observing side of the stop signal.
///
/// A listener whose [`StopSignal`] has been dropped reports stopped.
#[derive(Debug, Clone)]
pub struct StopListener {
    rx: watch::Receiver<bool>,
}

impl StopListener {
    /// Check if stop has been signaled.
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Wait until stop is signaled.
    pub async fn stopped(&mut self) {
        // Err means the sender is gone, which counts as stopped
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }

    /// Sleep for `duration` unless stop is signaled first.
    ///
    /// Returns `true` if the wait ended because of the stop signal.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_stopped() {
            return true;
        }
        let interrupted = tokio::select! {
            _ = self.stopped() => true,
            _ = tokio::time::sleep(duration) => false,
        };
        interrupted || self.is_stopped()
    }

    /// Sleep for a number of seconds, see [`StopListener::sleep`].
    pub async fn sleep_secs(&mut self, secs: f64) -> bool {
        self.sleep(secs_to_duration(secs)).await
    }
}

/// Convert fractional seconds, saturating at `Duration::MAX`.
///
/// Negative and NaN values become zero.
pub fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}
