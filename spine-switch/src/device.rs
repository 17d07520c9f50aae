// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The seam between the switch and the link layer behind each port.
//!
//! The switch never owns the devices' internals; it asks them to transmit,
//! to emit PFC frames and to change their effective rate, and it reads
//! their queue occupancy for DRILL and in-band telemetry.

use crate::packet::Packet;

/// Direction of a PFC frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PfcOp {
    /// Ask the peer to stop sending on a priority class.
    Pause,
    /// Ask the peer to start sending again.
    Resume,
}

/// One port's link-layer device.
pub trait Device {
    /// True while the link is up.
    fn is_link_up(&self) -> bool;

    /// Nominal link rate in bits per second.
    fn link_rate_bps(&self) -> u64;

    /// Total bytes currently queued for transmission on this port.
    fn queue_bytes(&self) -> u64;

    /// Hand a packet to the device for transmission on the given egress
    /// queue.
    fn switch_send(&self, qindex: usize, packet: Packet);

    /// Emit a PFC frame for one priority class. For [PfcOp::Pause] the
    /// returned value is the pause time in microseconds that was put on
    /// the wire; it is meaningless for [PfcOp::Resume].
    fn send_pfc(&self, qindex: usize, op: PfcOp) -> u32;

    /// Set the effective transmission rate in bits per second.
    fn set_effective_rate(&self, rate_bps: u64);
}
