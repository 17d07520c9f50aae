// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The event kinds a switch schedules with the kernel.

/// Deferred work dispatched back into the switch by the scheduler.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SwitchEvent {
    /// A PFC pause placed on (port, queue) has expired.
    PfcResume {
        /// Ingress port the pause was placed on.
        port: usize,
        /// Priority class.
        qindex: usize,
    },

    /// Periodic credit-feedback evaluation for one ingress port.
    CpemTick {
        /// The ingress port to evaluate.
        port: usize,
    },
}
