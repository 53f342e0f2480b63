//! Per-source politeness delay.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Spaces dispatches to one source at least `delay` apart.
///
/// Shared (`Arc`) by every pass that talks to the same source, so parallel
/// passes over different parent items of one site still respect the delay.
#[derive(Debug)]
pub struct Throttle {
    delay: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_slot: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Wait until the next dispatch slot and reserve it.
    ///
    /// Waiters queue on the lock, so slots are handed out one at a time.
    pub async fn wait(&self) {
        if self.delay.is_zero() {
            return;
        }
        let mut next_slot = self.next_slot.lock().await;
        if let Some(at) = *next_slot {
            tokio::time::sleep_until(at).await;
        }
        *next_slot = Some(Instant::now() + self.delay);
    }
}
