//! Cooldown tracking for rate-limited actions.

use std::time::Duration;

use tokio::time::Instant;

/// Remembers when an action last fired and when it may fire next.
///
/// A throttle never fires anything itself; the scheduler asks it for the
/// next permitted slot and records each firing with [`Throttle::mark`].
#[derive(Debug, Clone)]
pub struct Throttle {
    window: Duration,
    last: Option<Instant>,
}

impl Throttle {
    /// A throttle that allows one firing per `window`.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// The earliest instant at or after `now` when the action may fire.
    #[must_use]
    pub fn next_slot(&self, now: Instant) -> Instant {
        match self.last {
            Some(last) => now.max(last + self.window),
            None => now,
        }
    }

    /// Record a firing at `now`.
    pub fn mark(&mut self, now: Instant) {
        self.last = Some(now);
    }
}
