// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! `SPINE` engine - the discrete-event kernel
//!
//! This library provides the kernel that the
//! [switch models](../spine_switch/index.html) run against: simulated
//! [time](crate::time), a generic [event scheduler](crate::scheduler) and the
//! shared [error types](crate::types).
//!
//! The kernel is deliberately small. Models are plain structs that mutate
//! their state from callbacks; the only way to suspend work is to schedule
//! an event for later with [`Scheduler::schedule_in`](crate::scheduler::Scheduler::schedule_in).
//! Events are an enum of kinds defined by the model, carried in the queue
//! and dispatched by a model-side handler:
//!
//! ```rust
//! use spine_engine::engine::Engine;
//! use spine_engine::scheduler::Scheduler;
//! use spine_engine::time::simtime::SimTime;
//!
//! enum Tick {
//!     Poll,
//! }
//!
//! let engine = Engine::default();
//! let mut scheduler: Scheduler<Tick> = Scheduler::new(&engine.clock(), engine.top());
//! scheduler.schedule_in(SimTime::from_us(5), Tick::Poll);
//!
//! let (at, _event) = scheduler.pop().unwrap();
//! assert_eq!(at, SimTime::from_ns(5_000));
//! assert_eq!(engine.clock().now(), at);
//! ```
//!
//! All callbacks run to completion before the next event; there is no
//! preemption, so state mutations are atomic with respect to one another.

pub mod engine;
pub mod scheduler;
pub mod test_helpers;
pub mod time;
pub mod types;
