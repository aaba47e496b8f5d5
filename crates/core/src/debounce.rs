//! Cancellable scheduled task used to collapse bursts of triggers.

use std::time::Duration;

use tokio::time::Instant;

/// Each trigger cancels the pending deadline and schedules a new one
/// `window` later. The owner polls with the current time and runs its action
/// once when the deadline has passed.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Restart the window from `now`. Returns the new deadline.
    pub fn trigger(&mut self, now: Instant) -> Instant {
        let deadline = now + self.window;
        self.deadline = Some(deadline);
        deadline
    }

    /// Drop the pending deadline. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Consume the deadline if it has passed.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_collapses_to_one_firing() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(300));

        let mut fired = 0;
        for ms in (0..100).step_by(2) {
            let now = start + Duration::from_millis(ms);
            debouncer.trigger(now);
            if debouncer.fire_if_due(now) {
                fired += 1;
            }
        }
        assert_eq!(fired, 0);
        assert_eq!(debouncer.deadline(), Some(start + Duration::from_millis(398)));

        assert!(!debouncer.fire_if_due(start + Duration::from_millis(397)));
        assert!(debouncer.fire_if_due(start + Duration::from_millis(398)));
        assert!(!debouncer.fire_if_due(start + Duration::from_millis(1000)));
    }

    #[test]
    fn test_cancel() {
        let now = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(10));
        assert!(!debouncer.cancel());
        debouncer.trigger(now);
        assert!(debouncer.is_pending());
        assert!(debouncer.cancel());
        assert!(!debouncer.fire_if_due(now + Duration::from_secs(1)));
    }
}
