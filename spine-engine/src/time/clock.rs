// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The clock shared between the scheduler and the callbacks it dispatches.
//!
//! Callbacks never read ambient global time; they are handed a [`Clock`] and
//! read [`Clock::now`] explicitly. Only the scheduler moves the clock
//! forwards, when it pops the next event off its queue.

use std::cell::Cell;
use std::rc::Rc;

use spine_track::entity::Entity;
use spine_track::set_time;

use super::simtime::SimTime;

/// A cloneable read handle onto the current simulation time.
#[derive(Clone)]
pub struct Clock {
    entity: Rc<Entity>,
    now: Rc<Cell<SimTime>>,
}

impl Clock {
    /// Create a new [Clock] starting at time zero.
    #[must_use]
    pub fn new(parent: &Rc<Entity>) -> Self {
        Self {
            entity: Rc::new(Entity::new(parent, "clock")),
            now: Rc::new(Cell::new(SimTime::ZERO)),
        }
    }

    /// Returns the current simulation time.
    #[must_use]
    pub fn now(&self) -> SimTime {
        self.now.get()
    }

    /// Returns the current simulation time in `ns`.
    #[must_use]
    pub fn now_ns(&self) -> u64 {
        self.now.get().ns()
    }

    /// Advance the clock. Only the scheduler should do this.
    pub(crate) fn advance_to(&self, to_time: SimTime) {
        let now = self.now.get();
        assert!(to_time >= now, "Time moving backwards");
        if to_time != now {
            set_time!(self.entity ; to_time.ns() as f64);
            self.now.set(to_time);
        }
    }
}

#[cfg(test)]
mod tests {
    use spine_track::entity::toplevel;
    use spine_track::test_init;

    use super::*;

    #[test]
    fn shared_handles_agree() {
        let (_test_tracker, tracker) = test_init!(10);
        let top = toplevel(&tracker, "top");

        let clock = Clock::new(&top);
        let other = clock.clone();
        assert_eq!(clock.now(), SimTime::ZERO);

        clock.advance_to(SimTime::from_ns(42));
        assert_eq!(other.now_ns(), 42);
    }

    #[test]
    #[should_panic(expected = "Time moving backwards")]
    fn no_time_travel() {
        let (_test_tracker, tracker) = test_init!(10);
        let top = toplevel(&tracker, "top");

        let clock = Clock::new(&top);
        clock.advance_to(SimTime::from_ns(10));
        clock.advance_to(SimTime::from_ns(9));
    }
}
