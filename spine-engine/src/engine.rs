// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::rc::Rc;

use spine_track::Tracker;
use spine_track::entity::{Entity, toplevel};
use spine_track::tracker::stdout_tracker;

use crate::time::clock::Clock;

/// Owner of the pieces every simulation needs: the entity hierarchy root,
/// the shared [`Tracker`] and the [`Clock`].
///
/// The event queue itself is created by the model because it is generic
/// over the model's event type; see
/// [`Scheduler`](crate::scheduler::Scheduler).
pub struct Engine {
    toplevel: Rc<Entity>,
    tracker: Tracker,
    clock: Clock,
}

impl Engine {
    /// Create a standalone engine.
    pub fn new(tracker: &Tracker) -> Self {
        let toplevel = toplevel(tracker, "top");
        let clock = Clock::new(&toplevel);
        Self {
            toplevel,
            tracker: tracker.clone(),
            clock,
        }
    }

    #[must_use]
    pub fn clock(&self) -> Clock {
        self.clock.clone()
    }

    #[must_use]
    pub fn time_now_ns(&self) -> u64 {
        self.clock.now_ns()
    }

    #[must_use]
    pub fn top(&self) -> &Rc<Entity> {
        &self.toplevel
    }

    #[must_use]
    pub fn tracker(&self) -> Tracker {
        self.tracker.clone()
    }
}

/// Create a default engine that sends [`Track`](spine_track::Track) events
/// to stdout.
///
/// This is provided to keep documentation examples simple with fewer
/// concepts to have to consider at once.
impl Default for Engine {
    fn default() -> Self {
        let tracker = stdout_tracker(log::Level::Info);
        Self::new(&tracker)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // The tracker can be using a buffered writer and so it needs to be
        // shut down cleanly to ensure that it is flushed properly.
        self.tracker.shutdown();
    }
}
