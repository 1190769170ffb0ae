use std::time::Instant;

/// A one-shot timer callback. Periodic behaviour is obtained by
/// re-registering from inside the callback (spec.md §4.2).
pub type TimeoutCallback = Box<dyn FnOnce() + Send>;

pub struct TimerRegistration {
    pub deadline: Instant,
    pub label: &'static str,
    pub arg: u64,
    pub callback: TimeoutCallback,
}

impl std::fmt::Debug for TimerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerRegistration")
            .field("deadline", &self.deadline)
            .field("label", &self.label)
            .field("arg", &self.arg)
            .finish()
    }
}

/// Timer records ordered by deadline ascending, ties broken by insertion
/// order (spec.md §3, §5).
#[derive(Default)]
pub struct TimerWheel {
    timers: Vec<TimerRegistration>,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self { timers: Vec::new() }
    }

    /// Inserts keeping the vector sorted by deadline; a stable partition
    /// point preserves FIFO order among equal deadlines.
    pub fn insert(&mut self, registration: TimerRegistration) {
        let pos = self
            .timers
            .partition_point(|t| t.deadline <= registration.deadline);
        self.timers.insert(pos, registration);
    }

    /// Matches on `(label, arg)` ignoring deadline; idempotent on absence.
    pub fn unregister(&mut self, label: &str, arg: u64) -> bool {
        let before = self.timers.len();
        self.timers.retain(|t| !(t.label == label && t.arg == arg));
        self.timers.len() != before
    }

    pub fn earliest_deadline(&self) -> Option<Instant> {
        self.timers.first().map(|t| t.deadline)
    }

    /// Removes and returns the earliest timer if its deadline has passed,
    /// implementing the one-shot semantics described in spec.md §4.2: the
    /// record is removed *before* its callback runs.
    pub fn pop_expired(&mut self, now: Instant) -> Option<TimerRegistration> {
        match self.timers.first() {
            Some(t) if t.deadline <= now => Some(self.timers.remove(0)),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn reg(deadline: Instant, label: &'static str, out: Arc<AtomicU32>, order: u32) -> TimerRegistration {
        TimerRegistration {
            deadline,
            label,
            arg: 0,
            callback: Box::new(move || out.store(order, Ordering::SeqCst)),
        }
    }

    #[test]
    fn earliest_deadline_first_regardless_of_registration_order() {
        let now = Instant::now();
        let mut wheel = TimerWheel::new();
        let marker = Arc::new(AtomicU32::new(0));

        wheel.insert(reg(now + Duration::from_millis(30), "c", marker.clone(), 3));
        wheel.insert(reg(now + Duration::from_millis(10), "a", marker.clone(), 1));
        wheel.insert(reg(now + Duration::from_millis(20), "b", marker.clone(), 2));

        let mut order = Vec::new();
        while let Some(t) = wheel.pop_expired(now + Duration::from_millis(31)) {
            order.push(t.label);
        }
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn ties_broken_by_insertion_order() {
        let now = Instant::now();
        let mut wheel = TimerWheel::new();
        let marker = Arc::new(AtomicU32::new(0));
        wheel.insert(reg(now, "first", marker.clone(), 1));
        wheel.insert(reg(now, "second", marker, 2));

        let first = wheel.pop_expired(now).unwrap();
        assert_eq!(first.label, "first");
        let second = wheel.pop_expired(now).unwrap();
        assert_eq!(second.label, "second");
    }

    #[test]
    fn unregister_matches_label_and_arg_ignoring_deadline() {
        let now = Instant::now();
        let mut wheel = TimerWheel::new();
        let marker = Arc::new(AtomicU32::new(0));
        wheel.insert(reg(now + Duration::from_secs(1), "only", marker, 0));

        assert!(wheel.unregister("only", 0));
        assert!(!wheel.unregister("only", 0));
        assert!(wheel.is_empty());
    }

    #[test]
    fn pop_expired_is_one_shot() {
        let now = Instant::now();
        let mut wheel = TimerWheel::new();
        let marker = Arc::new(AtomicU32::new(0));
        wheel.insert(reg(now, "once", marker, 0));

        assert!(wheel.pop_expired(now).is_some());
        assert!(wheel.pop_expired(now).is_none());
    }
}
