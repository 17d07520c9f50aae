// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Per-switch statistics counters.
//!
//! Every counter is write-once-per-event and monotonically increasing; the
//! simulator aggregates across switches if it wants totals.

/// Monotonic event counters owned by one switch.
#[derive(Clone, Copy, Debug, Default)]
pub struct SwitchStats {
    /// Packets dropped by ingress admission.
    pub dropped_pkt_sw_ingress: u64,

    /// Packets dropped by egress admission.
    pub dropped_pkt_sw_egress: u64,

    /// Credit-feedback packets emitted by this switch.
    pub cpem_feedback_sent: u64,

    /// Credit-feedback packets consumed by this switch.
    pub cpem_feedback_recv: u64,

    /// Number of times the effective rate of a port actually changed.
    pub cpem_rate_adjustments: u64,
}
