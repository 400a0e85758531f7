//! Keyed one-shot timer queue.
//!
//! Each key identifies one timer slot (e.g. "chip 0, seek timer"). A slot
//! holds at most one outstanding deadline: arming it again replaces the
//! pending deadline and payload. The owner drives time forward with
//! [`Scheduler::pop_due`] and dispatches the returned payloads itself, so
//! callbacks never re-enter the scheduler.

use std::fmt::Debug;

use log::trace;

use crate::Ticks;

/// A timer that reached its deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fired<K, T> {
    /// Emulated time at which the timer fired.
    pub at: Ticks,
    /// Slot the timer was armed on.
    pub key: K,
    /// Payload supplied when the timer was armed.
    pub payload: T,
}

#[derive(Debug)]
struct Pending<K, T> {
    due: Ticks,
    seq: u64,
    key: K,
    payload: T,
}

/// Keyed one-shot timer queue measured in [`Ticks`].
#[derive(Debug)]
pub struct Scheduler<K, T> {
    now: Ticks,
    seq: u64,
    pending: Vec<Pending<K, T>>,
}

impl<K: Copy + Eq + Debug, T: Debug> Scheduler<K, T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: Ticks::ZERO,
            seq: 0,
            pending: Vec::new(),
        }
    }

    /// Current emulated time.
    #[must_use]
    pub fn now(&self) -> Ticks {
        self.now
    }

    /// Arm `key` to fire `delay` ticks from now.
    ///
    /// Returns the payload of the timer this one superseded, if the slot was
    /// already armed.
    pub fn schedule(&mut self, key: K, delay: Ticks, payload: T) -> Option<T> {
        let previous = self.cancel(&key);
        let due = self.now + delay;
        trace!("arm {key:?} at {due} with {payload:?}");
        self.seq += 1;
        self.pending.push(Pending {
            due,
            seq: self.seq,
            key,
            payload,
        });
        previous
    }

    /// Disarm `key`, returning its payload if it was pending.
    pub fn cancel(&mut self, key: &K) -> Option<T> {
        let idx = self.pending.iter().position(|p| p.key == *key)?;
        Some(self.pending.swap_remove(idx).payload)
    }

    #[must_use]
    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.iter().any(|p| p.key == *key)
    }

    /// Deadline of the earliest pending timer.
    #[must_use]
    pub fn next_due(&self) -> Option<Ticks> {
        self.pending.iter().map(|p| p.due).min()
    }

    /// Number of armed timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Remove the earliest timer due at or before `limit`.
    ///
    /// Timers with equal deadlines fire in the order they were armed. The
    /// scheduler clock moves forward to the deadline of the returned timer.
    pub fn pop_due(&mut self, limit: Ticks) -> Option<Fired<K, T>> {
        let idx = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, p)| p.due <= limit)
            .min_by_key(|(_, p)| (p.due, p.seq))
            .map(|(i, _)| i)?;
        let p = self.pending.swap_remove(idx);
        if p.due > self.now {
            self.now = p.due;
        }
        Some(Fired {
            at: p.due,
            key: p.key,
            payload: p.payload,
        })
    }

    /// Move the clock forward without firing anything.
    ///
    /// Callers drain due timers with [`Scheduler::pop_due`] first; time never
    /// moves backwards.
    pub fn advance_to(&mut self, at: Ticks) {
        if at > self.now {
            self.now = at;
        }
    }

    /// Drop every pending timer whose key matches `pred`.
    pub fn cancel_where(&mut self, mut pred: impl FnMut(&K) -> bool) {
        self.pending.retain(|p| !pred(&p.key));
    }
}

impl<K: Copy + Eq + Debug, T: Debug> Default for Scheduler<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Slot {
        A,
        B,
    }

    #[test]
    fn fires_in_deadline_order() {
        let mut s: Scheduler<Slot, u8> = Scheduler::new();
        s.schedule(Slot::A, Ticks(100), 1);
        s.schedule(Slot::B, Ticks(50), 2);

        let first = s.pop_due(Ticks(1000)).expect("B due");
        assert_eq!(first.key, Slot::B);
        assert_eq!(first.at, Ticks(50));
        assert_eq!(s.now(), Ticks(50));

        let second = s.pop_due(Ticks(1000)).expect("A due");
        assert_eq!(second.payload, 1);
        assert!(s.pop_due(Ticks(1000)).is_none());
    }

    #[test]
    fn rearming_supersedes_payload() {
        let mut s: Scheduler<Slot, &str> = Scheduler::new();
        assert!(s.schedule(Slot::A, Ticks(10), "first").is_none());
        assert_eq!(s.schedule(Slot::A, Ticks(20), "second"), Some("first"));
        assert_eq!(s.len(), 1);

        assert!(s.pop_due(Ticks(15)).is_none());
        let fired = s.pop_due(Ticks(20)).expect("rearmed timer");
        assert_eq!(fired.payload, "second");
    }

    #[test]
    fn cancel_disarms() {
        let mut s: Scheduler<Slot, u8> = Scheduler::new();
        s.schedule(Slot::A, Ticks(10), 7);
        assert!(s.is_pending(&Slot::A));
        assert_eq!(s.cancel(&Slot::A), Some(7));
        assert!(!s.is_pending(&Slot::A));
        assert!(s.pop_due(Ticks(100)).is_none());
    }

    #[test]
    fn delays_are_relative_to_current_time() {
        let mut s: Scheduler<Slot, u8> = Scheduler::new();
        s.advance_to(Ticks(1000));
        s.schedule(Slot::A, Ticks(5), 0);
        assert_eq!(s.next_due(), Some(Ticks(1005)));
    }

    #[test]
    fn equal_deadlines_fire_in_arm_order() {
        let mut s: Scheduler<Slot, u8> = Scheduler::new();
        s.schedule(Slot::B, Ticks(10), 1);
        s.schedule(Slot::A, Ticks(10), 2);
        assert_eq!(s.pop_due(Ticks(10)).map(|f| f.key), Some(Slot::B));
        assert_eq!(s.pop_due(Ticks(10)).map(|f| f.key), Some(Slot::A));
    }
}
