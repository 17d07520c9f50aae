// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::rc::Rc;

use spine_engine::engine::Engine;
use spine_engine::scheduler::Scheduler;
use spine_engine::test_helpers::start_test;
use spine_engine::time::clock::Clock;
use spine_engine::time::simtime::SimTime;
use spine_switch::events::SwitchEvent;
use spine_switch::feedback::{self, CreditFeedbackHeader};
use spine_switch::mmu::MmuConfig;
use spine_switch::packet::{Packet, l3};
use spine_switch::settings::{CpemConfig, Settings, node_id_to_ip};
use spine_switch::switch::Switch;
use spine_switch::test_helpers::{TestDevice, test_devices};

const DST: u32 = 20;
const LINK_BPS: u64 = 100_000_000_000;

fn cpem_settings() -> Settings {
    Settings {
        cpem: CpemConfig {
            enabled: true,
            use_dynamic_threshold: false,
            ..CpemConfig::default()
        },
        ..Settings::default()
    }
}

fn setup(
    settings: Settings,
    num_ports: usize,
) -> (Engine, Clock, Scheduler<SwitchEvent>, Switch, Vec<Rc<TestDevice>>) {
    let engine = start_test(file!());
    let clock = engine.clock();
    let scheduler = Scheduler::new(&clock, engine.top());

    let (devices, handles) = test_devices(num_ports);
    let mut switch = Switch::new(
        engine.top(),
        1,
        Rc::new(settings),
        &MmuConfig::default(),
        devices,
    );
    switch.add_table_entry(node_id_to_ip(DST), 2);

    (engine, clock, scheduler, switch, handles)
}

fn data_packet(size: u32) -> Packet {
    Packet::new(l3::UDP, size)
        .set_addresses(node_id_to_ip(10), node_id_to_ip(DST))
        .set_ports(1_000, 2_000)
        .set_pg(3)
}

fn run_until(
    switch: &mut Switch,
    clock: &Clock,
    scheduler: &mut Scheduler<SwitchEvent>,
    limit_ns: u64,
) {
    while let Some((_, event)) = scheduler.pop_until(SimTime::from_ns(limit_ns)) {
        switch.handle_event(event, clock, scheduler);
    }
}

#[test]
fn ticks_are_staggered_across_ports() {
    let (_engine, _clock, mut scheduler, mut switch, _handles) = setup(cpem_settings(), 4);
    switch.cpem_init(&mut scheduler);

    // interval * port / num_devices for ports 1..3.
    for (expect_ns, expect_port) in [(2_500, 1), (5_000, 2), (7_500, 3)] {
        let (at, event) = scheduler.pop().unwrap();
        assert_eq!(at, SimTime::from_ns(expect_ns));
        assert_eq!(event, SwitchEvent::CpemTick { port: expect_port });
    }
    assert!(scheduler.pop().is_none());
}

#[test]
fn down_links_are_not_initialised() {
    let (_engine, _clock, mut scheduler, mut switch, handles) = setup(cpem_settings(), 4);
    handles[2].link_up.set(false);
    switch.cpem_init(&mut scheduler);

    assert!(switch.cpem().state(1).initialized);
    assert!(!switch.cpem().state(2).initialized);
    assert!(switch.cpem().state(3).initialized);
}

#[test]
fn quiet_queue_emits_no_feedback() {
    let (_engine, clock, mut scheduler, mut switch, handles) = setup(cpem_settings(), 3);
    switch.cpem_init(&mut scheduler);

    // 10 kB of ingress occupancy on port 1, well under the 50 kB low
    // threshold.
    for _ in 0..10 {
        switch
            .receive_from_device(1, data_packet(1_000), &clock, &mut scheduler)
            .unwrap();
    }
    assert_eq!(switch.mmu().ingress_port_bytes(1), 10_000);

    run_until(&mut switch, &clock, &mut scheduler, 50_000);

    assert_eq!(switch.stats().cpem_feedback_sent, 0);
    assert_eq!(handles[1].num_sent(), 0);
    // The timer keeps re-arming regardless.
    assert!(!scheduler.is_empty());
}

#[test]
fn congested_queue_emits_feedback_upstream() {
    let (_engine, clock, mut scheduler, mut switch, handles) = setup(cpem_settings(), 3);
    switch.cpem_init(&mut scheduler);

    for _ in 0..60 {
        switch
            .receive_from_device(1, data_packet(1_000), &clock, &mut scheduler)
            .unwrap();
    }
    assert_eq!(switch.mmu().ingress_port_bytes(1), 60_000);

    run_until(&mut switch, &clock, &mut scheduler, 25_000);

    assert!(switch.stats().cpem_feedback_sent > 0);
    assert!(handles[1].num_sent() > 0);

    // The report went back through the congested port at top priority,
    // link-local, and describes that port.
    let (qindex, packet) = handles[1].sent.borrow()[0].clone();
    assert_eq!(qindex, 0);
    assert_eq!(packet.header.ttl, 1);
    let header = feedback::parse_feedback(&packet).unwrap();
    assert_eq!(header.queue_len, 60_000);
    assert_eq!(header.port_index, 1);
    assert!(header.credit_value > 0);
}

#[test]
fn feedback_is_consumed_and_derates_the_port() {
    let (_engine, clock, mut scheduler, mut switch, handles) = setup(cpem_settings(), 3);
    switch.cpem_init(&mut scheduler);

    let header = CreditFeedbackHeader::new(100_000, 0, 500, 4);
    let packet = feedback::build_feedback_packet(&header, node_id_to_ip(9));
    switch
        .receive_from_device(1, packet.clone(), &clock, &mut scheduler)
        .unwrap();

    // Consumed locally: nothing was forwarded anywhere.
    assert_eq!(switch.stats().cpem_feedback_recv, 1);
    for handle in &handles {
        assert_eq!(handle.num_sent(), 0);
    }
    assert_eq!(switch.mmu().used_buffer_total(), 0);

    // One EWMA step from zero toward 500.
    let credit = switch.cpem().state(1).feedback_credit;
    assert!((credit - 100.0).abs() < 1e-6);

    // The inbound port's device was derated but stays above the floor.
    let rate = handles[1].effective_rate_bps.get();
    assert!(rate < LINK_BPS);
    assert!(rate >= LINK_BPS / 10);
    assert_eq!(switch.stats().cpem_rate_adjustments, 1);

    // A second identical report at the same instant composes through the
    // EWMA.
    switch
        .receive_from_device(1, packet, &clock, &mut scheduler)
        .unwrap();
    let credit = switch.cpem().state(1).feedback_credit;
    assert!((credit - 180.0).abs() < 1e-6);
}

#[test]
fn rate_never_drops_below_the_floor() {
    let (_engine, clock, mut scheduler, mut switch, handles) = setup(cpem_settings(), 3);
    switch.cpem_init(&mut scheduler);

    let header = CreditFeedbackHeader::new(1_000_000, 0, 1_000, 4);
    for _ in 0..50 {
        let packet = feedback::build_feedback_packet(&header, node_id_to_ip(9));
        switch
            .receive_from_device(1, packet, &clock, &mut scheduler)
            .unwrap();
    }

    // Gain 0.8 against a saturated credit: ratio 0.2, floored at 0.1.
    let rate = handles[1].effective_rate_bps.get();
    assert!(rate >= LINK_BPS / 10);
    assert!(rate <= (LINK_BPS as f64 * 0.21) as u64);
    assert!(switch.stats().cpem_rate_adjustments >= 1);
}

#[test]
fn sends_accumulate_inflight_credit() {
    let (_engine, clock, mut scheduler, mut switch, _handles) = setup(cpem_settings(), 3);
    switch.cpem_init(&mut scheduler);

    for _ in 0..5 {
        switch
            .receive_from_device(1, data_packet(2_000), &clock, &mut scheduler)
            .unwrap();
    }

    // The egress port carries the in-flight estimate.
    let state = switch.cpem().state(2);
    assert_eq!(state.inflight_bytes, 10_000);
    assert!(state.inflight_credit > 0.0);

    // The ingress port does not.
    assert_eq!(switch.cpem().state(1).inflight_bytes, 0);
}

#[test]
fn disabled_module_routes_nothing_and_consumes_nothing() {
    // Default settings: module off.
    let (_engine, clock, mut scheduler, mut switch, _handles) = setup(Settings::default(), 3);
    switch.cpem_init(&mut scheduler);
    assert!(scheduler.is_empty());

    // With the module off a stray feedback packet hits the forwarding
    // path, which cannot hash its protocol.
    let header = CreditFeedbackHeader::new(100_000, 0, 500, 4);
    let packet = feedback::build_feedback_packet(&header, node_id_to_ip(9));
    let result = switch.receive_from_device(1, packet, &clock, &mut scheduler);
    assert!(result.is_err());
    assert_eq!(switch.stats().cpem_feedback_recv, 0);
}
