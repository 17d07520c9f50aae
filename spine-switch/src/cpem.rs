// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The credit-based PFC enhancement module.
//!
//! Two halves share the per-port state kept here:
//!
//!  - **Downstream** (the congested switch): a periodic timer per ingress
//!    port evaluates the queue against a low/high threshold pair and
//!    computes a credit value from the fill ratio and the queue gradient.
//!    The thresholds either track the PFC dynamic threshold or are fixed.
//!  - **Upstream** (the switch being asked to slow down): received credit
//!    is folded into an EWMA, combined with a locally maintained
//!    in-flight-bytes estimate, and converted into an effective send rate
//!    for the port the feedback arrived on.
//!
//! All credits live in `[0, max_credit]`; the effective rate never drops
//! below `min_rate_ratio` of the link rate.

use std::rc::Rc;

use spine_engine::scheduler::EventHandle;
use spine_engine::time::simtime::SimTime;
use spine_model_builder::EntityDisplay;
use spine_track::debug;
use spine_track::entity::Entity;

use crate::mmu::{MTU, P_CNT, SwitchMmu};
use crate::settings::CpemConfig;
use crate::stats::SwitchStats;

/// Credit state of one port.
#[derive(Clone, Copy, Debug, Default)]
pub struct PortCreditState {
    /// EWMA of credit received from downstream, in [0, max_credit].
    pub feedback_credit: f64,

    /// Credit derived from the in-flight estimate, in [0, max_credit].
    pub inflight_credit: f64,

    /// Estimated bytes in flight toward the downstream switch.
    pub inflight_bytes: u64,

    /// Last observed queue length, for the gradient.
    pub last_queue_len: u32,

    /// When feedback last arrived.
    pub last_feedback_time: SimTime,

    /// When a packet was last sent through this port.
    pub last_send_time: SimTime,

    /// Current effective sending rate in bits per second.
    pub effective_rate_bps: u64,

    /// Set on link-up; operations on uninitialized ports are no-ops.
    pub initialized: bool,
}

/// Per-switch credit module state.
#[derive(EntityDisplay)]
pub struct Cpem {
    pub entity: Rc<Entity>,
    config: CpemConfig,
    states: Vec<PortCreditState>,
    tick_evt: Vec<Option<EventHandle>>,
}

impl Cpem {
    pub fn new(parent: &Rc<Entity>, config: &CpemConfig) -> Self {
        Self {
            entity: Rc::new(Entity::new(parent, "cpem")),
            config: config.clone(),
            states: vec![PortCreditState::default(); P_CNT],
            tick_evt: vec![None; P_CNT],
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    #[must_use]
    pub fn config(&self) -> &CpemConfig {
        &self.config
    }

    /// Read one port's credit state.
    #[must_use]
    pub fn state(&self, port: usize) -> &PortCreditState {
        &self.states[port]
    }

    /// Initialise a port's credit state on link-up.
    pub fn init_port(&mut self, port: usize, link_rate_bps: u64) {
        if !self.config.enabled || port >= P_CNT {
            return;
        }
        self.states[port] = PortCreditState {
            effective_rate_bps: link_rate_bps,
            initialized: true,
            ..PortCreditState::default()
        };
        debug!(self.entity ; "initialized port {port} at {link_rate_bps} bit/s");
    }

    /// Remember the tick scheduled for a port, superseding any pending one.
    /// Returns the superseded handle so the caller can cancel it.
    pub fn replace_tick_event(
        &mut self,
        port: usize,
        handle: EventHandle,
    ) -> Option<EventHandle> {
        self.tick_evt[port].replace(handle)
    }

    /// The low/high thresholds governing feedback for a port.
    ///
    /// In dynamic mode they are fractions of the PFC shared threshold with
    /// floors of 10 MTU (low) and low + 5 MTU (high); in fixed mode they
    /// are the configured constants.
    #[must_use]
    pub fn thresholds(&self, mmu: &SwitchMmu, port: usize) -> (u32, u32) {
        if self.config.use_dynamic_threshold && mmu.dynamic_threshold() {
            let pfc_threshold = mmu.pfc_shared_threshold(port);
            let low = (pfc_threshold * self.config.threshold_low_ratio) as u32;
            let high = (pfc_threshold * self.config.threshold_high_ratio) as u32;
            let low = low.max(10 * MTU);
            let high = high.max(low + 5 * MTU);
            (low, high)
        } else {
            (
                self.config.queue_threshold_low,
                self.config.queue_threshold_high,
            )
        }
    }

    /// Record a queue observation and return the gradient against the
    /// previous one.
    pub fn observe_queue(&mut self, port: usize, queue_len: u32) -> i16 {
        let gradient = queue_len.wrapping_sub(self.states[port].last_queue_len) as i16;
        self.states[port].last_queue_len = queue_len;
        gradient
    }

    /// The credit value reported for a queue observation.
    ///
    /// The fill ratio between the thresholds scales the credit; a growing
    /// queue raises it by up to 50%, a draining queue lowers it by up to
    /// 30%.
    #[must_use]
    pub fn credit_value(&self, queue_len: u32, gradient: i16, low: u32, high: u32) -> u16 {
        let q_ratio = if queue_len >= high {
            1.0
        } else if queue_len > low {
            f64::from(queue_len - low) / f64::from(high - low)
        } else {
            0.0
        };

        let gradient_factor = if gradient > 0 {
            1.0 + (f64::from(gradient) / f64::from(low)).min(1.0) * 0.5
        } else if gradient < 0 {
            1.0 - (-f64::from(gradient) / f64::from(low)).min(1.0) * 0.3
        } else {
            1.0
        };

        let max_credit = f64::from(self.config.max_credit);
        let credit = (q_ratio * gradient_factor * max_credit).round().min(max_credit);
        credit as u16
    }

    /// Account bytes leaving through a port, decaying the previous
    /// in-flight estimate by the time elapsed since the last send.
    pub fn update_inflight_on_send(
        &mut self,
        port: usize,
        bytes: u64,
        now: SimTime,
        thresholds: (u32, u32),
    ) {
        if !self.config.enabled || port >= P_CNT {
            return;
        }
        let interval = self.config.feedback_interval_ns as f64;
        let max_credit = f64::from(self.config.max_credit);
        let state = &mut self.states[port];
        if !state.initialized {
            return;
        }

        if state.last_send_time > SimTime::ZERO {
            // Model packets arriving downstream over roughly one RTT, with
            // the feedback interval standing in for the RTT.
            let dt = now.since(state.last_send_time).ns() as f64;
            let decay = (-dt / (2.0 * interval)).exp();
            state.inflight_bytes = (decay * state.inflight_bytes as f64) as u64;
        }

        state.inflight_bytes += bytes;
        state.last_send_time = now;

        let max_inflight = 2.0 * f64::from(thresholds.1);
        state.inflight_credit =
            (state.inflight_bytes as f64 / max_inflight * max_credit).min(max_credit);
    }

    /// Fold a received feedback report into the port's credit state.
    pub fn update_credit_on_feedback(
        &mut self,
        port: usize,
        credit_value: u16,
        gradient: i16,
        low_threshold: u32,
        now: SimTime,
    ) {
        if !self.config.enabled || port >= P_CNT {
            return;
        }
        let max_credit = f64::from(self.config.max_credit);
        let alpha = self.config.credit_decay_alpha;
        let state = &mut self.states[port];
        if !state.initialized {
            return;
        }

        // A queue growing at the downstream raises the urgency beyond the
        // reported credit, capped at 30% of the scale.
        let bonus = if gradient > 0 {
            (f64::from(gradient) / f64::from(low_threshold) * 0.2 * max_credit)
                .min(0.3 * max_credit)
        } else {
            0.0
        };
        let new_credit = (f64::from(credit_value) + bonus).min(max_credit);

        state.feedback_credit = alpha * state.feedback_credit + (1.0 - alpha) * new_credit;
        state.last_feedback_time = now;

        // The data the report describes has been observed downstream.
        state.inflight_bytes /= 2;

        debug!(self.entity ; "port {port} feedback credit {credit_value} -> {:.1}",
               state.feedback_credit);
    }

    /// The credit used for rate computation: aged feedback credit plus the
    /// discounted in-flight credit.
    #[must_use]
    pub fn effective_credit(&self, port: usize, now: SimTime) -> f64 {
        if !self.config.enabled || port >= P_CNT {
            return 0.0;
        }
        let state = &self.states[port];
        if !state.initialized {
            return 0.0;
        }

        let interval = self.config.feedback_interval_ns as f64;
        let age = now.since(state.last_feedback_time).ns() as f64;
        let mut weight = (-age / (3.0 * interval)).exp();
        if age > 10.0 * interval {
            // No recent feedback; rely mostly on the in-flight estimate.
            weight = 0.2;
        }

        let effective =
            weight * state.feedback_credit + self.config.inflight_discount * state.inflight_credit;
        effective.min(f64::from(self.config.max_credit))
    }

    /// The rate a port should run at given its credit state. Updates the
    /// stored effective rate and counts the adjustment when it changes.
    pub fn adjusted_rate(
        &mut self,
        port: usize,
        link_rate_bps: u64,
        now: SimTime,
        stats: &mut SwitchStats,
    ) -> u64 {
        if !self.config.enabled || port >= P_CNT || !self.states[port].initialized {
            return link_rate_bps;
        }

        let credit = self.effective_credit(port, now);
        let credit_ratio = credit / f64::from(self.config.max_credit);
        let rate_ratio =
            (1.0 - credit_ratio * self.config.credit_to_rate_gain).max(self.config.min_rate_ratio);
        let adjusted = (link_rate_bps as f64 * rate_ratio) as u64;

        let state = &mut self.states[port];
        if state.effective_rate_bps != adjusted {
            state.effective_rate_bps = adjusted;
            stats.cpem_rate_adjustments += 1;
            debug!(self.entity ; "port {port} rate adjusted to {adjusted} bit/s (credit {credit:.1})");
        }
        adjusted
    }
}
