// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::rc::Rc;

use spine_engine::engine::Engine;
use spine_engine::scheduler::Scheduler;
use spine_engine::test_helpers::start_test;
use spine_engine::time::clock::Clock;
use spine_switch::device::PfcOp;
use spine_switch::events::SwitchEvent;
use spine_switch::mmu::MmuConfig;
use spine_switch::packet::{Packet, l3};
use spine_switch::settings::{Settings, node_id_to_ip};
use spine_switch::switch::Switch;
use spine_switch::test_helpers::{TestDevice, test_devices};

const DST: u32 = 20;

fn setup(
    settings: Settings,
    mmu_config: &MmuConfig,
    num_ports: usize,
) -> (Engine, Clock, Scheduler<SwitchEvent>, Switch, Vec<Rc<TestDevice>>) {
    let engine = start_test(file!());
    let clock = engine.clock();
    let scheduler = Scheduler::new(&clock, engine.top());

    let (devices, handles) = test_devices(num_ports);
    let mut switch = Switch::new(engine.top(), 1, Rc::new(settings), mmu_config, devices);
    switch.add_table_entry(node_id_to_ip(DST), 2);

    (engine, clock, scheduler, switch, handles)
}

fn data_packet(size: u32) -> Packet {
    Packet::new(l3::UDP, size)
        .set_addresses(node_id_to_ip(10), node_id_to_ip(DST))
        .set_ports(1_000, 2_000)
        .set_pg(3)
}

#[test]
fn pfc_pause_round_trip() {
    // 375 kB of buffer shared by two ports, ingress alpha 0.0625. The
    // egress alpha is opened up so only the ingress side constrains.
    let mmu_config = MmuConfig {
        active_port_cnt: 2,
        static_max_bytes: 375_000,
        egress_alpha: 8.0,
        ..MmuConfig::default()
    };
    let (_engine, clock, mut scheduler, mut switch, handles) =
        setup(Settings::default(), &mmu_config, 3);

    for _ in 0..200 {
        switch
            .receive_from_device(1, data_packet(1_000), &clock, &mut scheduler)
            .unwrap();
    }

    // Every packet was admitted and forwarded to port 2.
    assert_eq!(switch.stats().dropped_pkt_sw_ingress, 0);
    assert_eq!(switch.stats().dropped_pkt_sw_egress, 0);
    assert_eq!(handles[2].num_sent(), 200);
    assert_eq!(switch.mmu().ingress_port_bytes(1), 200_000);

    // The triggering class tripped the dynamic threshold: a pause frame
    // went out of the ingress port and the class is paused.
    assert!(switch.mmu().is_paused(1, 3));
    assert!(handles[1].num_pfc(PfcOp::Pause) > 0);
    assert_eq!(handles[1].num_pfc(PfcOp::Resume), 0);

    // Drain the egress queue; dequeue notifications restore the counters
    // and re-evaluate resume.
    let sent = handles[2].sent.borrow().clone();
    for (qindex, packet) in sent {
        let mut packet = packet;
        switch.notify_dequeue(2, qindex, &mut packet, &clock, &mut scheduler);
    }

    assert_eq!(switch.mmu().used_buffer_total(), 0);
    assert_eq!(switch.mmu().ingress_port_bytes(1), 0);
    assert_eq!(switch.mmu().egress_port_bytes(2), 0);
    assert!(!switch.mmu().is_paused(1, 3));
    assert_eq!(handles[1].num_pfc(PfcOp::Resume), 1);

    // The timed resume was cancelled when the resume frame went out.
    assert!(scheduler.is_empty());

    // All dequeued bytes were counted against the egress port.
    assert_eq!(switch.tx_bytes_out_dev(2), 200_000);
    assert_eq!(switch.rx_bytes_in_dev(1), 200_000);
}

#[test]
fn pause_expires_by_timer_without_dequeues() {
    let mmu_config = MmuConfig {
        active_port_cnt: 2,
        static_max_bytes: 375_000,
        ..MmuConfig::default()
    };
    let (_engine, clock, mut scheduler, mut switch, handles) =
        setup(Settings::default(), &mmu_config, 3);

    for _ in 0..50 {
        switch
            .receive_from_device(1, data_packet(1_000), &clock, &mut scheduler)
            .unwrap();
    }
    assert!(switch.mmu().is_paused(1, 3));
    let pause_time_us = u64::from(handles[1].pause_time_us.get());

    // Let the scheduled resume fire; the local pause flag clears even
    // though the buffer is still full.
    let mut fired = 0;
    while let Some((at, event)) = scheduler.pop() {
        assert_eq!(at.us(), pause_time_us);
        switch.handle_event(event, &clock, &mut scheduler);
        fired += 1;
    }
    assert_eq!(fired, 1);
    assert!(!switch.mmu().is_paused(1, 3));
}

#[test]
fn ingress_headroom_exhaustion_drops() {
    // Twelve active ports squeeze the shared pool down to 99 240 bytes;
    // one hot flow runs through its headroom and starts dropping.
    let mmu_config = MmuConfig {
        static_max_bytes: 375_000,
        ..MmuConfig::default()
    };
    let (_engine, clock, mut scheduler, mut switch, handles) =
        setup(Settings::default(), &mmu_config, 3);

    for _ in 0..200 {
        switch
            .receive_from_device(1, data_packet(1_000), &clock, &mut scheduler)
            .unwrap();
    }

    let dropped = switch.stats().dropped_pkt_sw_ingress;
    assert!(dropped > 0, "expected ingress drops, got none");
    assert_eq!(handles[2].num_sent() as u64, 200 - dropped);
    // A dropped packet leaves no trace in the counters.
    assert_eq!(
        u64::from(switch.mmu().ingress_port_bytes(1)),
        (200 - dropped) * 1_000
    );
}

#[test]
fn egress_threshold_drops() {
    let mmu_config = MmuConfig {
        active_port_cnt: 2,
        static_max_bytes: 50_000,
        ..MmuConfig::default()
    };
    let (_engine, clock, mut scheduler, mut switch, _handles) =
        setup(Settings::default(), &mmu_config, 3);

    switch
        .receive_from_device(1, data_packet(20_000), &clock, &mut scheduler)
        .unwrap();
    assert_eq!(switch.stats().dropped_pkt_sw_egress, 0);

    // The second packet trips the egress dynamic threshold: it fits every
    // hard limit but not alpha times what is left of the pool.
    switch
        .receive_from_device(1, data_packet(10_000), &clock, &mut scheduler)
        .unwrap();
    assert_eq!(switch.stats().dropped_pkt_sw_egress, 1);
    assert_eq!(switch.stats().dropped_pkt_sw_ingress, 0);
}

#[test]
fn control_queue_bypasses_admission() {
    let mmu_config = MmuConfig {
        active_port_cnt: 2,
        static_max_bytes: 50_000,
        ..MmuConfig::default()
    };
    let settings = Settings {
        ack_high_prio: true,
        ..Settings::default()
    };
    let (_engine, clock, mut scheduler, mut switch, handles) = setup(settings, &mmu_config, 3);

    // An ACK bigger than the whole buffer still goes through on queue 0.
    let ack = Packet::new(l3::ACK, 60_000)
        .set_addresses(node_id_to_ip(10), node_id_to_ip(DST))
        .set_ports(1_000, 2_000);
    switch
        .receive_from_device(1, ack, &clock, &mut scheduler)
        .unwrap();

    assert_eq!(handles[2].num_sent(), 1);
    assert_eq!(handles[2].last_sent().unwrap().0, 0);
    assert_eq!(switch.mmu().used_buffer_total(), 0);
}
