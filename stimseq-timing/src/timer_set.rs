//! One-shot timers that are checked, never preempting: the owner polls
//! `pop_due` from its event loop and dispatches the returned action itself.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

/// A timer whose deadline has passed, removed from its set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fired<A> {
    pub handle: TimerHandle,
    pub deadline: Duration,
    pub action: A,
}

#[derive(Debug)]
struct Entry<A> {
    deadline: Duration,
    handle: TimerHandle,
    action: A,
}

// Ordered by deadline, then by arming order, so equal deadlines fire FIFO.
impl<A> Ord for Entry<A> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.handle.cmp(&other.handle))
    }
}

impl<A> PartialOrd for Entry<A> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<A> PartialEq for Entry<A> {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl<A> Eq for Entry<A> {}

/// Cancellable collection of delayed actions.
///
/// Delays are offsets from the set's epoch, which for a trial is its start.
/// After `cancel_all` nothing armed before the call is ever returned by
/// `pop_due`.
#[derive(Debug)]
pub struct TimerSet<A> {
    heap: BinaryHeap<Reverse<Entry<A>>>,
    next_handle: u64,
}

impl<A> TimerSet<A> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_handle: 0,
        }
    }

    pub fn schedule(&mut self, delay: Duration, action: A) -> TimerHandle {
        let handle = TimerHandle(self.next_handle);
        self.next_handle += 1;
        self.heap.push(Reverse(Entry {
            deadline: delay,
            handle,
            action,
        }));
        handle
    }

    /// Drops every pending timer. Idempotent.
    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.heap.len();
        self.heap.clear();
        cancelled
    }

    /// Removes and returns the earliest timer whose deadline is at or before `now`.
    pub fn pop_due(&mut self, now: Duration) -> Option<Fired<A>> {
        if self.heap.peek()?.0.deadline > now {
            return None;
        }
        self.heap.pop().map(|Reverse(e)| Fired {
            handle: e.handle,
            deadline: e.deadline,
            action: e.action,
        })
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.heap.peek().map(|Reverse(e)| e.deadline)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<A> Default for TimerSet<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn drain(set: &mut TimerSet<&'static str>, now: Duration) -> Vec<&'static str> {
        std::iter::from_fn(|| set.pop_due(now)).map(|f| f.action).collect()
    }

    #[test]
    fn fires_in_deadline_order() {
        let mut set = TimerSet::new();
        set.schedule(ms(300), "c");
        set.schedule(ms(100), "a");
        set.schedule(ms(200), "b");

        assert_eq!(set.next_deadline(), Some(ms(100)));
        assert_eq!(drain(&mut set, ms(150)), vec!["a"]);
        assert_eq!(drain(&mut set, ms(300)), vec!["b", "c"]);
        assert!(set.is_empty());
    }

    #[test]
    fn equal_deadlines_fire_in_arming_order() {
        let mut set = TimerSet::new();
        set.schedule(ms(300), "swap");
        set.schedule(ms(300), "open");
        set.schedule(ms(300), "close");
        assert_eq!(drain(&mut set, ms(300)), vec!["swap", "open", "close"]);
    }

    #[test]
    fn nothing_fires_before_deadline() {
        let mut set = TimerSet::new();
        let handle = set.schedule(ms(10), "x");
        assert!(set.pop_due(ms(9)).is_none());
        let fired = set.pop_due(ms(10)).unwrap();
        assert_eq!(fired.handle, handle);
        assert_eq!(fired.deadline, ms(10));
    }

    #[test]
    fn cancel_all_is_idempotent_and_final() {
        let mut set = TimerSet::new();
        set.schedule(ms(0), "due");
        set.schedule(ms(50), "later");
        assert_eq!(set.cancel_all(), 2);
        assert_eq!(set.cancel_all(), 0);
        assert!(set.pop_due(ms(1_000)).is_none());
        assert_eq!(set.next_deadline(), None);
    }

    #[test]
    fn handles_are_unique_across_cancellation() {
        let mut set = TimerSet::new();
        let a = set.schedule(ms(1), ());
        set.cancel_all();
        let b = set.schedule(ms(1), ());
        assert_ne!(a, b);
    }

    proptest! {
        #[test]
        fn pops_are_sorted_and_complete(delays in prop::collection::vec(0u64..1_000, 0..40)) {
            let mut set = TimerSet::new();
            for (i, d) in delays.iter().enumerate() {
                set.schedule(ms(*d), i);
            }
            let mut popped = Vec::new();
            while let Some(f) = set.pop_due(ms(1_000)) {
                popped.push((f.deadline, f.action));
            }
            prop_assert_eq!(popped.len(), delays.len());
            for pair in popped.windows(2) {
                // ties keep arming order
                prop_assert!(pair[0] <= pair[1]);
            }
        }
    }
}
