//! Debounce timer for background updates.
//!
//! Every `schedule` pushes the deadline out by the full delay, so a burst
//! of edits fires once, `delay` after the last edit. The timer never
//! sleeps: the owning loop asks for [`DebounceTimer::next_deadline`] and
//! calls [`DebounceTimer::fire_if_due`] with the current instant.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct DebounceTimer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl DebounceTimer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn schedule(&mut self) {
        self.schedule_at(Instant::now());
    }

    pub fn schedule_at(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Disarm and return true when the deadline has passed
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
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

    const DELAY: Duration = Duration::from_millis(500);

    #[test]
    fn test_fires_once_after_delay() {
        let start = Instant::now();
        let mut timer = DebounceTimer::new(DELAY);
        timer.schedule_at(start);

        assert!(!timer.fire_if_due(start + Duration::from_millis(499)));
        assert!(timer.fire_if_due(start + DELAY));
        assert!(!timer.fire_if_due(start + DELAY * 2));
        assert!(!timer.is_armed());
    }

    #[test]
    fn test_reschedule_pushes_deadline_out() {
        let start = Instant::now();
        let mut timer = DebounceTimer::new(DELAY);
        timer.schedule_at(start);
        timer.schedule_at(start + Duration::from_millis(300));

        assert_eq!(
            timer.next_deadline(),
            Some(start + Duration::from_millis(800))
        );
        assert!(!timer.fire_if_due(start + DELAY));
        assert!(timer.fire_if_due(start + Duration::from_millis(800)));
    }

    #[test]
    fn test_cancel_disarms() {
        let start = Instant::now();
        let mut timer = DebounceTimer::new(DELAY);
        timer.schedule_at(start);
        timer.cancel();
        assert_eq!(timer.next_deadline(), None);
        assert!(!timer.fire_if_due(start + DELAY));
    }
}
