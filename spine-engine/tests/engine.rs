// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use spine_engine::scheduler::Scheduler;
use spine_engine::test_helpers::start_test;
use spine_engine::time::simtime::SimTime;

#[derive(Debug, PartialEq)]
enum Event {
    Tick(u32),
    Resume,
}

#[test]
fn clock_follows_pops() {
    let engine = start_test(file!());
    let clock = engine.clock();
    let mut sched: Scheduler<Event> = Scheduler::new(&clock, engine.top());

    sched.schedule_in(SimTime::from_us(3), Event::Resume);
    sched.schedule_in(SimTime::from_ns(500), Event::Tick(0));

    assert_eq!(engine.time_now_ns(), 0);

    let (at, event) = sched.pop().unwrap();
    assert_eq!(event, Event::Tick(0));
    assert_eq!(at, SimTime::from_ns(500));
    assert_eq!(clock.now(), SimTime::from_ns(500));

    let (at, event) = sched.pop().unwrap();
    assert_eq!(event, Event::Resume);
    assert_eq!(at, SimTime::from_us(3));
    assert_eq!(engine.time_now_ns(), 3_000);
}

#[test]
fn rearming_timer_runs_to_a_limit() {
    let engine = start_test(file!());
    let mut sched: Scheduler<Event> = Scheduler::new(&engine.clock(), engine.top());

    let interval = SimTime::from_ns(1_000);
    sched.schedule_in(interval, Event::Tick(0));

    let mut fired = 0;
    while let Some((_, event)) = sched.pop_until(SimTime::from_ns(5_000)) {
        match event {
            Event::Tick(n) => {
                fired += 1;
                sched.schedule_in(interval, Event::Tick(n + 1));
            }
            Event::Resume => unreachable!(),
        }
    }

    assert_eq!(fired, 5);
    assert!(!sched.is_empty());
}

#[test]
fn delays_accumulate_from_now() {
    let engine = start_test(file!());
    let mut sched: Scheduler<Event> = Scheduler::new(&engine.clock(), engine.top());

    sched.schedule_in(SimTime::from_ns(10), Event::Tick(0));
    let (at, _) = sched.pop().unwrap();
    assert_eq!(at.ns(), 10);

    // Scheduled relative to the advanced clock, not to zero.
    sched.schedule_in(SimTime::from_ns(10), Event::Tick(1));
    let (at, _) = sched.pop().unwrap();
    assert_eq!(at.ns(), 20);
}
