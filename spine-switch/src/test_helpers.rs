// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Test doubles shared by the unit and integration tests.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::device::{Device, PfcOp};
use crate::packet::Packet;

/// A recording link device.
///
/// Captures everything the switch asks of it so that tests can assert on
/// transmissions, PFC frames and rate changes. Queue occupancy and link
/// state are plain cells the test sets up front.
pub struct TestDevice {
    /// Link state reported to the switch.
    pub link_up: Cell<bool>,

    /// Nominal link rate reported to the switch.
    pub link_rate_bps: Cell<u64>,

    /// Egress queue occupancy reported to the switch.
    pub queue_bytes: Cell<u64>,

    /// Pause time returned when the switch emits a pause frame.
    pub pause_time_us: Cell<u32>,

    /// Packets handed over for transmission, with their queue index.
    pub sent: RefCell<Vec<(usize, Packet)>>,

    /// PFC frames emitted, with their priority class.
    pub pfc: RefCell<Vec<(usize, PfcOp)>>,

    /// The last effective rate the switch applied.
    pub effective_rate_bps: Cell<u64>,
}

impl TestDevice {
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            link_up: Cell::new(true),
            link_rate_bps: Cell::new(100_000_000_000),
            queue_bytes: Cell::new(0),
            pause_time_us: Cell::new(65_535),
            sent: RefCell::new(Vec::new()),
            pfc: RefCell::new(Vec::new()),
            effective_rate_bps: Cell::new(0),
        })
    }

    /// Number of packets handed over for transmission.
    #[must_use]
    pub fn num_sent(&self) -> usize {
        self.sent.borrow().len()
    }

    /// The most recent transmission, if any.
    #[must_use]
    pub fn last_sent(&self) -> Option<(usize, Packet)> {
        self.sent.borrow().last().cloned()
    }

    /// PFC frames of one kind seen so far.
    #[must_use]
    pub fn num_pfc(&self, op: PfcOp) -> usize {
        self.pfc.borrow().iter().filter(|(_, seen)| *seen == op).count()
    }
}

impl Device for TestDevice {
    fn is_link_up(&self) -> bool {
        self.link_up.get()
    }

    fn link_rate_bps(&self) -> u64 {
        self.link_rate_bps.get()
    }

    fn queue_bytes(&self) -> u64 {
        self.queue_bytes.get()
    }

    fn switch_send(&self, qindex: usize, packet: Packet) {
        self.sent.borrow_mut().push((qindex, packet));
    }

    fn send_pfc(&self, qindex: usize, op: PfcOp) -> u32 {
        self.pfc.borrow_mut().push((qindex, op));
        self.pause_time_us.get()
    }

    fn set_effective_rate(&self, rate_bps: u64) {
        self.effective_rate_bps.set(rate_bps);
    }
}

/// Build `n` recording devices, returned both type-erased for the switch
/// and concrete for the test's assertions.
#[must_use]
pub fn test_devices(n: usize) -> (Vec<Rc<dyn Device>>, Vec<Rc<TestDevice>>) {
    let concrete: Vec<Rc<TestDevice>> = (0..n).map(|_| TestDevice::new()).collect();
    let erased = concrete
        .iter()
        .map(|device| device.clone() as Rc<dyn Device>)
        .collect();
    (erased, concrete)
}
