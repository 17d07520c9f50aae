// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The event queue at the heart of the kernel.
//!
//! The [`Scheduler`] is generic over an event type `E`; a model defines its
//! own enum of event kinds and dispatches popped events itself. Two events
//! scheduled for the same instant pop in the order they were scheduled.
//!
//! Scheduling returns an [`EventHandle`] that can be used to cancel the
//! event. Cancellation invalidates a generation token carried inside the
//! queued entry rather than searching the queue; cancelling an event that
//! has already fired (or has already been cancelled) is a no-op.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;

use spine_track::entity::Entity;
use spine_track::trace;

use crate::time::clock::Clock;
use crate::time::simtime::SimTime;

/// Identifies one scheduled event so that it can be cancelled.
///
/// A handle is only valid for the scheduler that issued it. Stale handles
/// are harmless: cancellation through them does nothing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EventHandle {
    slot: usize,
    generation: u64,
}

struct Entry<E> {
    at: SimTime,
    seq: u64,
    slot: usize,
    generation: u64,
    event: E,
}

// Entries are ordered by time with the sequence number as the FIFO
// tie-break. The heap is a max-heap so the comparison is reversed.
impl<E> Ord for Entry<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.at, other.seq).cmp(&(self.at, self.seq))
    }
}

impl<E> PartialOrd for Entry<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> PartialEq for Entry<E> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl<E> Eq for Entry<E> {}

/// A time-ordered queue of model events.
pub struct Scheduler<E> {
    entity: Rc<Entity>,
    clock: Clock,
    heap: BinaryHeap<Entry<E>>,
    generations: Vec<u64>,
    free_slots: Vec<usize>,
    next_seq: u64,
}

impl<E> Scheduler<E> {
    /// Create a scheduler that advances `clock` as it pops events.
    #[must_use]
    pub fn new(clock: &Clock, parent: &Rc<Entity>) -> Self {
        Self {
            entity: Rc::new(Entity::new(parent, "scheduler")),
            clock: clock.clone(),
            heap: BinaryHeap::new(),
            generations: Vec::new(),
            free_slots: Vec::new(),
            next_seq: 0,
        }
    }

    /// Schedule `event` to fire `delay` after the current time.
    pub fn schedule_in(&mut self, delay: SimTime, event: E) -> EventHandle {
        let at = self.clock.now() + delay;
        let slot = match self.free_slots.pop() {
            Some(slot) => slot,
            None => {
                self.generations.push(0);
                self.generations.len() - 1
            }
        };
        let generation = self.generations[slot];
        let seq = self.next_seq;
        self.next_seq += 1;

        trace!(self.entity ; "schedule slot {slot} at {at}");
        self.heap.push(Entry {
            at,
            seq,
            slot,
            generation,
            event,
        });
        EventHandle { slot, generation }
    }

    /// Cancel a previously scheduled event.
    ///
    /// A no-op if the event has already fired or been cancelled.
    pub fn cancel(&mut self, handle: EventHandle) {
        if self.generations[handle.slot] == handle.generation {
            trace!(self.entity ; "cancel slot {}", handle.slot);
            self.generations[handle.slot] += 1;
        }
    }

    /// Pop the next live event, advancing the clock to its firing time.
    ///
    /// Returns `None` when the queue holds no live events.
    pub fn pop(&mut self) -> Option<(SimTime, E)> {
        loop {
            let entry = self.heap.pop()?;
            let live = self.generations[entry.slot] == entry.generation;
            self.generations[entry.slot] = self.generations[entry.slot].wrapping_add(1);
            self.free_slots.push(entry.slot);
            if live {
                self.clock.advance_to(entry.at);
                return Some((entry.at, entry.event));
            }
        }
    }

    /// Pop the next live event if it fires at or before `limit`.
    ///
    /// Events beyond the limit stay queued, so a model with a self
    /// re-arming timer can still be run for a bounded amount of time.
    pub fn pop_until(&mut self, limit: SimTime) -> Option<(SimTime, E)> {
        match self.time_of_next() {
            Some(at) if at <= limit => self.pop(),
            _ => None,
        }
    }

    /// Returns the time of the next live event, discarding any cancelled
    /// entries found on the way.
    pub fn time_of_next(&mut self) -> Option<SimTime> {
        loop {
            let entry = self.heap.peek()?;
            if self.generations[entry.slot] == entry.generation {
                return Some(entry.at);
            }
            let entry = self.heap.pop().unwrap();
            self.generations[entry.slot] = self.generations[entry.slot].wrapping_add(1);
            self.free_slots.push(entry.slot);
        }
    }

    /// True when no live events remain.
    pub fn is_empty(&mut self) -> bool {
        self.time_of_next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use spine_track::entity::toplevel;
    use spine_track::test_init;

    use super::*;

    fn scheduler() -> Scheduler<u32> {
        let (_test_tracker, tracker) = test_init!(10);
        let top = toplevel(&tracker, "top");
        let clock = Clock::new(&top);
        Scheduler::new(&clock, &top)
    }

    #[test]
    fn fifo_at_same_instant() {
        let mut sched = scheduler();
        sched.schedule_in(SimTime::from_ns(5), 1);
        sched.schedule_in(SimTime::from_ns(5), 2);
        sched.schedule_in(SimTime::from_ns(5), 3);

        assert_eq!(sched.pop().unwrap().1, 1);
        assert_eq!(sched.pop().unwrap().1, 2);
        assert_eq!(sched.pop().unwrap().1, 3);
        assert!(sched.pop().is_none());
    }

    #[test]
    fn time_ordering() {
        let mut sched = scheduler();
        sched.schedule_in(SimTime::from_ns(30), 30);
        sched.schedule_in(SimTime::from_ns(10), 10);
        sched.schedule_in(SimTime::from_ns(20), 20);

        assert_eq!(sched.pop().unwrap(), (SimTime::from_ns(10), 10));
        assert_eq!(sched.pop().unwrap(), (SimTime::from_ns(20), 20));
        assert_eq!(sched.pop().unwrap(), (SimTime::from_ns(30), 30));
    }

    #[test]
    fn cancelled_events_do_not_fire() {
        let mut sched = scheduler();
        let keep = sched.schedule_in(SimTime::from_ns(1), 1);
        let drop = sched.schedule_in(SimTime::from_ns(2), 2);
        sched.schedule_in(SimTime::from_ns(3), 3);

        sched.cancel(drop);
        let _ = keep;

        assert_eq!(sched.pop().unwrap().1, 1);
        assert_eq!(sched.pop().unwrap().1, 3);
        assert!(sched.pop().is_none());
    }

    #[test]
    fn cancel_after_fire_is_noop() {
        let mut sched = scheduler();
        let handle = sched.schedule_in(SimTime::from_ns(1), 1);
        assert_eq!(sched.pop().unwrap().1, 1);

        // The slot has been recycled; a stale handle must not touch it.
        sched.cancel(handle);
        sched.cancel(handle);
        let live = sched.schedule_in(SimTime::from_ns(2), 2);
        sched.cancel(handle);
        assert_eq!(sched.pop().unwrap().1, 2);
        let _ = live;
    }

    #[test]
    fn pop_until_leaves_later_events() {
        let mut sched = scheduler();
        sched.schedule_in(SimTime::from_ns(10), 10);
        sched.schedule_in(SimTime::from_ns(100), 100);

        assert_eq!(sched.pop_until(SimTime::from_ns(50)).unwrap().1, 10);
        assert!(sched.pop_until(SimTime::from_ns(50)).is_none());
        assert_eq!(sched.time_of_next(), Some(SimTime::from_ns(100)));
        assert_eq!(sched.pop().unwrap().1, 100);
    }
}
