// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Switch-wide tunables.
//!
//! All tunables are gathered in immutable records built once at switch
//! construction and shared by `Rc`; nothing here changes while the
//! simulation runs.

use serde::{Deserialize, Serialize};

use spine_engine::sim_error;
use spine_engine::types::SimError;

/// Reserved in-device id used by ConWeave control packets that were
/// injected by the routing module rather than received on a real port.
/// Packets carrying it bypass ingress accounting.
pub const CONWEAVE_CTRL_DUMMY_INDEV: u32 = 88_888_888;

/// Load-balancer selection for forwarded data packets.
///
/// Control packets always take flow ECMP regardless of the mode. Conga,
/// Letflow and ConWeave are external routing modules; the switch only
/// implements their handoff contract.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LbMode {
    /// Flow ECMP over the {sip, dip, sport, dport} hash.
    #[default]
    Ecmp,
    /// DRILL: sample two queues plus the remembered best, pick the
    /// shortest.
    Drill,
    /// Conga (external, takes custody of the packet).
    Conga,
    /// Letflow (external).
    Letflow,
    /// ConWeave (external, takes custody of the packet).
    Conweave,
}

impl LbMode {
    /// Map the numeric mode id used by topology files.
    pub fn from_id(id: u32) -> Result<Self, SimError> {
        match id {
            0 => Ok(LbMode::Ecmp),
            2 => Ok(LbMode::Drill),
            3 => Ok(LbMode::Conga),
            6 => Ok(LbMode::Letflow),
            9 => Ok(LbMode::Conweave),
            _ => sim_error!("unknown lb_mode {id}"),
        }
    }

    /// The numeric mode id used by topology files.
    #[must_use]
    pub fn id(&self) -> u32 {
        match self {
            LbMode::Ecmp => 0,
            LbMode::Drill => 2,
            LbMode::Conga => 3,
            LbMode::Letflow => 6,
            LbMode::Conweave => 9,
        }
    }

    /// True for the modes that take custody of data packets and invoke the
    /// forwarding continuation themselves.
    #[must_use]
    pub fn takes_custody(&self) -> bool {
        matches!(self, LbMode::Conga | LbMode::Conweave)
    }
}

/// Congestion-control mode of the attached hosts, as far as the switch
/// cares: only HPCC changes switch behaviour (in-band telemetry on
/// dequeue).
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CcMode {
    /// Any scheme that needs nothing from the switch.
    #[default]
    Passive,
    /// HPCC: push per-hop telemetry into UDP packets on dequeue.
    Hpcc,
}

impl CcMode {
    /// Map the numeric mode id used by topology files (3 selects HPCC, any
    /// other scheme leaves the switch passive).
    #[must_use]
    pub fn from_id(id: u32) -> Self {
        match id {
            3 => CcMode::Hpcc,
            _ => CcMode::Passive,
        }
    }
}

/// Tunables of the credit-based PFC enhancement module.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CpemConfig {
    /// Master switch for the whole module.
    pub enabled: bool,

    /// Period of the per-port feedback timer.
    pub feedback_interval_ns: u64,

    /// EWMA factor applied to the stored credit when feedback arrives.
    pub credit_decay_alpha: f64,

    /// Weight of the in-flight credit estimate in the effective credit.
    pub inflight_discount: f64,

    /// Slope converting effective credit into rate attenuation.
    pub credit_to_rate_gain: f64,

    /// Floor on the rate ratio, to prevent starvation.
    pub min_rate_ratio: f64,

    /// Credit normalisation constant; all credits live in [0, max_credit].
    pub max_credit: u32,

    /// Fixed-mode low queue threshold in bytes (start emitting feedback).
    pub queue_threshold_low: u32,

    /// Fixed-mode high queue threshold in bytes (maximum urgency).
    pub queue_threshold_high: u32,

    /// Derive the thresholds from the PFC dynamic threshold instead of the
    /// fixed values.
    pub use_dynamic_threshold: bool,

    /// Low threshold as a fraction of the PFC threshold.
    pub threshold_low_ratio: f64,

    /// High threshold as a fraction of the PFC threshold.
    pub threshold_high_ratio: f64,
}

impl Default for CpemConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            feedback_interval_ns: 10_000,
            credit_decay_alpha: 0.8,
            inflight_discount: 0.4,
            credit_to_rate_gain: 0.8,
            min_rate_ratio: 0.1,
            max_credit: 1_000,
            queue_threshold_low: 50_000,
            queue_threshold_high: 200_000,
            use_dynamic_threshold: true,
            threshold_low_ratio: 0.5,
            threshold_high_ratio: 0.8,
        }
    }
}

/// The switch-wide settings record.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Settings {
    /// Credit-based PFC enhancement module tunables.
    pub cpem: CpemConfig,

    /// Load-balancer used for data packets.
    pub lb_mode: LbMode,

    /// Enable ECN marking on dequeue.
    pub ecn_enabled: bool,

    /// Host congestion-control mode.
    pub cc_mode: CcMode,

    /// Send ACK/NACK through the highest-priority queue.
    pub ack_high_prio: bool,
}

/// Map a node id onto its IPv4 address.
#[must_use]
pub fn node_id_to_ip(id: u32) -> u32 {
    0x0B00_0001 + ((id / 256) * 0x0001_0000) + ((id % 256) * 0x0000_0100)
}

/// Recover the node id from an IPv4 address built by [node_id_to_ip].
#[must_use]
pub fn ip_to_node_id(ip: u32) -> u32 {
    (ip >> 8) & 0xFFFF
}
