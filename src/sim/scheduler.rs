//! Deterministic discrete event scheduler.
//!
//! Events are processed in timestamp order, ties broken by scheduling order.

use std::{cmp::Ordering, collections::BinaryHeap, fmt, time::Duration};

use tracing::trace;

/// Unique identifier of a scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u64);

impl EventId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// An event popped from the scheduler.
#[derive(Debug, Clone)]
pub struct Scheduled<E> {
    pub at: Duration,
    pub id: EventId,
    pub event: E,
}

impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<E> Eq for Scheduled<E> {}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Scheduled<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed, the heap pops the earliest first.
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// A virtual clock and its queue of pending events.
pub struct Scheduler<E> {
    now: Duration,
    pending: BinaryHeap<Scheduled<E>>,
    next_id: u64,
}

impl<E> Default for Scheduler<E> {
    fn default() -> Self {
        Self {
            now: Duration::ZERO,
            pending: BinaryHeap::new(),
            next_id: 0,
        }
    }
}

impl<E: fmt::Debug> Scheduler<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current virtual time.
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Schedules an event at an absolute time. Times in the past are processed next, at the
    /// current time.
    pub fn schedule_at(&mut self, at: Duration, event: E) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;

        self.pending.push(Scheduled {
            at: at.max(self.now),
            id,
            event,
        });

        id
    }

    /// Schedules an event after a delay from now.
    pub fn schedule_after(&mut self, delay: Duration, event: E) -> EventId {
        self.schedule_at(self.now.saturating_add(delay), event)
    }

    /// Cancels a pending event. Returns `true` if it was still pending.
    pub fn cancel(&mut self, id: EventId) -> bool {
        let mut events = std::mem::take(&mut self.pending).into_vec();
        let len = events.len();
        events.retain(|e| e.id != id);
        let cancelled = events.len() < len;
        self.pending = BinaryHeap::from(events);

        cancelled
    }

    /// Returns the time of the next pending event, if any.
    pub fn next_event_time(&self) -> Option<Duration> {
        self.pending.peek().map(|e| e.at)
    }

    /// Pops the next event, advancing the clock to its time.
    pub fn step(&mut self) -> Option<Scheduled<E>> {
        let scheduled = self.pending.pop()?;
        self.now = self.now.max(scheduled.at);

        trace!(at = ?scheduled.at, id = scheduled.id.0, event = ?scheduled.event, "event");

        Some(scheduled)
    }

    /// Pops the next event if it is due no later than `until`.
    pub fn step_until(&mut self, until: Duration) -> Option<Scheduled<E>> {
        match self.next_event_time() {
            Some(at) if at <= until => self.step(),
            _ => {
                self.now = self.now.max(until);
                None
            }
        }
    }
}

impl<E> fmt::Debug for Scheduler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("now", &self.now)
            .field("pending_count", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    #[test]
    fn timestamp_order() {
        let mut scheduler = Scheduler::new();

        scheduler.schedule_at(ms(100), "b");
        scheduler.schedule_at(ms(50), "a");
        scheduler.schedule_at(ms(200), "c");

        let order: Vec<_> = std::iter::from_fn(|| scheduler.step())
            .map(|s| (s.at, s.event))
            .collect();
        assert_eq!(order, vec![(ms(50), "a"), (ms(100), "b"), (ms(200), "c")]);
        assert_eq!(scheduler.now(), ms(200));
    }

    #[test]
    fn ties_in_scheduling_order() {
        let mut scheduler = Scheduler::new();

        for i in 0..10 {
            scheduler.schedule_at(ms(5), i);
        }

        let order: Vec<_> = std::iter::from_fn(|| scheduler.step())
            .map(|s| s.event)
            .collect();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn cancel() {
        let mut scheduler = Scheduler::new();

        let a = scheduler.schedule_after(ms(10), "a");
        scheduler.schedule_after(ms(20), "b");

        assert!(scheduler.cancel(a));
        assert!(!scheduler.cancel(a));
        assert_eq!(scheduler.pending_count(), 1);
        assert_eq!(scheduler.step().unwrap().event, "b");
    }

    #[test]
    fn step_until_advances_the_clock() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_at(ms(30), ());

        assert!(scheduler.step_until(ms(20)).is_none());
        assert_eq!(scheduler.now(), ms(20));
        assert!(scheduler.step_until(ms(30)).is_some());
        assert!(scheduler.step_until(ms(40)).is_none());
        assert_eq!(scheduler.now(), ms(40));
    }

    #[test]
    fn past_events_run_now() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_at(ms(30), 1);
        scheduler.step();

        scheduler.schedule_at(ms(10), 2);
        let next = scheduler.step().unwrap();
        assert_eq!(next.at, ms(30));
    }
}
