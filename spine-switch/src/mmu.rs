// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The switch memory-management unit.
//!
//! Tracks buffer occupancy in bytes across four ingress views (priority
//! group, port, service pool, headroom) and four egress views (queue
//! guarantee, queue shared, port, service pool), decides packet admission
//! against static or dynamic shared-pool thresholds, runs the PFC
//! pause/resume state machine and the probabilistic ECN marker.
//!
//! Accounting order on admit is: fill the guarantee first, then the shared
//! pool, then headroom. Removal is symmetric and clamps at zero.

use std::rc::Rc;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use spine_engine::scheduler::{EventHandle, Scheduler};
use spine_engine::time::simtime::SimTime;
use spine_model_builder::EntityDisplay;
use spine_track::entity::Entity;
use spine_track::{debug, warn};

use crate::events::SwitchEvent;

/// Number of queues/priorities used.
pub const Q_CNT: usize = 8;
/// Number of ports used; port 0 is not used by convention.
pub const P_CNT: usize = 128;
/// Buffer accounting unit: payload plus headers.
pub const MTU: u32 = 1_048;

/// Why admission rejected a packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AdmissionError {
    /// No ingress space left (total buffer or headroom exhausted).
    IngressFull,
    /// A hard egress limit (service pool, port or queue) was exceeded.
    EgressFull,
    /// The egress dynamic threshold was exceeded.
    EgressThreshold,
}

impl std::fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AdmissionError::IngressFull => write!(f, "IngressFull"),
            AdmissionError::EgressFull => write!(f, "EgressFull"),
            AdmissionError::EgressThreshold => write!(f, "EgressThreshold"),
        }
    }
}

/// Buffer sizing and threshold configuration of one MMU.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MmuConfig {
    /// Number of active switch ports.
    pub active_port_cnt: usize,

    /// Maximum buffer per active port in bytes; the total buffer is this
    /// times the number of active ports unless `static_max_bytes` is set.
    pub max_bytes_per_port: u32,

    /// Explicit total buffer size in bytes; 0 derives it from the per-port
    /// value.
    pub static_max_bytes: u32,

    /// Headroom limit per priority group, per port.
    pub pg_hdrm_limit: u32,

    /// Ingress dynamic-threshold alpha.
    pub ingress_alpha: f64,

    /// Egress dynamic-threshold alpha.
    pub egress_alpha: f64,

    /// Use dynamic thresholds instead of the static per-pg/per-port caps.
    pub dynamic_threshold: bool,

    /// Seed for the ECN marking draw.
    pub seed: u64,
}

impl Default for MmuConfig {
    fn default() -> Self {
        Self {
            active_port_cnt: 12,
            max_bytes_per_port: 375 * 1_000,
            static_max_bytes: 0,
            // 2 * (link delay * bandwidth + MTU)
            pg_hdrm_limit: 12_500 + 2 * MTU,
            ingress_alpha: 0.0625,
            egress_alpha: 1.0,
            dynamic_threshold: true,
            seed: 0,
        }
    }
}

/// The memory-management unit of one switch.
#[derive(EntityDisplay)]
pub struct SwitchMmu {
    pub entity: Rc<Entity>,

    // Buffer sizing
    active_port_cnt: usize,
    max_bytes_per_port: u32,
    static_max_bytes: u32,
    max_buffer_bytes: u32,

    // Occupancy counters
    used_total_bytes: u32,
    used_ingress_pg_bytes: [[u32; Q_CNT]; P_CNT],
    used_ingress_port_bytes: [u32; P_CNT],
    used_ingress_sp_bytes: [u32; 4],
    used_ingress_pg_headroom_bytes: [[u32; Q_CNT]; P_CNT],
    used_egress_q_min_bytes: [[u32; Q_CNT]; P_CNT],
    used_egress_q_shared_bytes: [[u32; Q_CNT]; P_CNT],
    used_egress_port_bytes: [u32; P_CNT],
    used_egress_sp_bytes: [u32; 4],

    // Ingress params
    buffer_cell_limit_sp: u32,
    pg_min_cell: u32,
    port_min_cell: u32,
    pg_shared_limit_cell: u32,
    port_max_shared_cell: u32,
    pg_hdrm_limit: [u32; P_CNT],
    port_min_cell_off: u32,
    pg_shared_limit_cell_off: u32,

    // Egress params
    q_min_cell: u32,
    op_uc_port_config1_cell: u32,
    op_uc_port_config_cell: u32,
    op_buffer_shared_limit_cell: u32,

    // Dynamic threshold
    pg_shared_alpha_cell: f64,
    pg_shared_alpha_cell_egress: f64,
    pg_shared_alpha_cell_off_diff: f64,
    dynamicth: bool,

    // PFC state
    paused: [[bool; Q_CNT]; P_CNT],
    resume_evt: [[Option<EventHandle>; Q_CNT]; P_CNT],
    pause_remote: [[bool; Q_CNT]; P_CNT],

    // ECN marking
    kmin: [u32; P_CNT],
    kmax: [u32; P_CNT],
    pmax: [f64; P_CNT],
    rng: Xoshiro256PlusPlus,
}

impl SwitchMmu {
    pub fn new(parent: &Rc<Entity>, config: &MmuConfig) -> Self {
        let mut mmu = Self {
            entity: Rc::new(Entity::new(parent, "mmu")),
            active_port_cnt: config.active_port_cnt,
            max_bytes_per_port: config.max_bytes_per_port,
            static_max_bytes: config.static_max_bytes,
            max_buffer_bytes: 0,
            used_total_bytes: 0,
            used_ingress_pg_bytes: [[0; Q_CNT]; P_CNT],
            used_ingress_port_bytes: [0; P_CNT],
            used_ingress_sp_bytes: [0; 4],
            used_ingress_pg_headroom_bytes: [[0; Q_CNT]; P_CNT],
            used_egress_q_min_bytes: [[0; Q_CNT]; P_CNT],
            used_egress_q_shared_bytes: [[0; Q_CNT]; P_CNT],
            used_egress_port_bytes: [0; P_CNT],
            used_egress_sp_bytes: [0; 4],
            buffer_cell_limit_sp: 0,
            pg_min_cell: MTU,
            port_min_cell: MTU,
            pg_shared_limit_cell: 0,
            port_max_shared_cell: 0,
            pg_hdrm_limit: [config.pg_hdrm_limit; P_CNT],
            port_min_cell_off: 0,
            pg_shared_limit_cell_off: 0,
            q_min_cell: 0,
            op_uc_port_config1_cell: 0,
            op_uc_port_config_cell: 0,
            op_buffer_shared_limit_cell: 0,
            pg_shared_alpha_cell: config.ingress_alpha,
            pg_shared_alpha_cell_egress: config.egress_alpha,
            pg_shared_alpha_cell_off_diff: 16.0,
            dynamicth: config.dynamic_threshold,
            paused: [[false; Q_CNT]; P_CNT],
            resume_evt: [[None; Q_CNT]; P_CNT],
            pause_remote: [[false; Q_CNT]; P_CNT],
            kmin: [0; P_CNT],
            kmax: [0; P_CNT],
            pmax: [0.0; P_CNT],
            rng: Xoshiro256PlusPlus::seed_from_u64(config.seed),
        };
        mmu.init_switch();
        mmu
    }

    /// Derive every threshold from the current sizing and reset the
    /// occupancy counters.
    fn init_switch(&mut self) {
        self.max_buffer_bytes = if self.static_max_bytes != 0 {
            self.static_max_bytes
        } else {
            self.max_bytes_per_port * self.active_port_cnt as u32
        };
        self.used_total_bytes = 0;

        if self.dynamicth {
            // Using dynamic thresholds; the static caps no longer apply.
            self.pg_shared_limit_cell = self.max_buffer_bytes;
            self.port_max_shared_cell = self.max_buffer_bytes;
        } else {
            self.pg_shared_limit_cell = 20 * MTU;
            self.port_max_shared_cell = 4_800 * MTU;
        }

        self.used_ingress_pg_bytes = [[0; Q_CNT]; P_CNT];
        self.used_ingress_port_bytes = [0; P_CNT];
        self.used_ingress_sp_bytes = [0; 4];
        self.used_ingress_pg_headroom_bytes = [[0; Q_CNT]; P_CNT];
        self.used_egress_q_min_bytes = [[0; Q_CNT]; P_CNT];
        self.used_egress_q_shared_bytes = [[0; Q_CNT]; P_CNT];
        self.used_egress_port_bytes = [0; P_CNT];
        self.used_egress_sp_bytes = [0; 4];

        self.pg_min_cell = MTU;
        self.port_min_cell = MTU;

        let total_pg_hdrm: u32 = self.pg_hdrm_limit[..self.active_port_cnt].iter().sum();
        let guarantees =
            self.active_port_cnt as u32 * (Q_CNT as u32 * self.pg_min_cell).max(self.port_min_cell);
        self.buffer_cell_limit_sp = self
            .max_buffer_bytes
            .saturating_sub(total_pg_hdrm)
            .saturating_sub(guarantees);

        self.port_min_cell_off = 4_700 * MTU;
        self.pg_shared_limit_cell_off = self.pg_shared_limit_cell.saturating_sub(2 * MTU);

        self.op_buffer_shared_limit_cell = self.max_buffer_bytes.saturating_sub(guarantees);
        self.op_uc_port_config_cell = self.max_buffer_bytes;
        self.q_min_cell = 1 + MTU;
        self.op_uc_port_config1_cell = self.max_buffer_bytes;

        debug!(self.entity ; "init: buffer {} bytes, sp limit {} bytes, dynamic {}",
               self.max_buffer_bytes, self.buffer_cell_limit_sp, self.dynamicth);
    }

    /// Ingress service pool of a priority group.
    #[must_use]
    pub fn ingress_sp(_port: usize, pg_index: usize) -> usize {
        if pg_index == 1 { 1 } else { 0 }
    }

    /// Egress service pool of a queue.
    #[must_use]
    pub fn egress_sp(_port: usize, qindex: usize) -> usize {
        if qindex == 0 { 0 } else { 1 }
    }

    // ---------------- Admission ----------------

    pub fn check_ingress_admission(
        &self,
        port: usize,
        qindex: usize,
        psize: u32,
    ) -> Result<(), AdmissionError> {
        assert!(self.pg_shared_alpha_cell > 0.0);

        if self.used_total_bytes + psize > self.max_buffer_bytes {
            // Buffer full; usually should not be reached.
            warn!(self.entity ; "Drop because ingress buffer full");
            return Err(AdmissionError::IngressFull);
        }
        if self.used_ingress_pg_bytes[port][qindex] + psize > self.pg_min_cell
            && self.used_ingress_port_bytes[port] + psize > self.port_min_cell
        {
            // Beyond the guarantees; use the shared buffer.
            let sp = Self::ingress_sp(port, qindex);
            if self.used_ingress_sp_bytes[sp] > self.buffer_cell_limit_sp {
                // Shared pool exhausted; headroom is in use.
                if self.used_ingress_pg_headroom_bytes[port][qindex] + psize
                    > self.pg_hdrm_limit[port]
                {
                    warn!(self.entity ; "Drop because ingress headroom full: {} of {}",
                          self.used_ingress_pg_headroom_bytes[port][qindex],
                          self.pg_hdrm_limit[port]);
                    return Err(AdmissionError::IngressFull);
                }
            }
        }
        Ok(())
    }

    pub fn check_egress_admission(
        &self,
        port: usize,
        qindex: usize,
        psize: u32,
    ) -> Result<(), AdmissionError> {
        assert!(self.pg_shared_alpha_cell_egress > 0.0);

        let sp = Self::egress_sp(port, qindex);
        if self.used_egress_sp_bytes[sp] + psize > self.op_buffer_shared_limit_cell {
            warn!(self.entity ; "Drop because egress SP buffer full (exceed the sp limit)");
            return Err(AdmissionError::EgressFull);
        }
        if self.used_egress_port_bytes[port] + psize > self.op_uc_port_config_cell {
            warn!(self.entity ; "Drop because egress port buffer full (exceed the port limit)");
            return Err(AdmissionError::EgressFull);
        }
        if self.used_egress_q_shared_bytes[port][qindex] + psize > self.op_uc_port_config1_cell {
            warn!(self.entity ; "Drop because egress queue buffer full (exceed the queue limit)");
            return Err(AdmissionError::EgressFull);
        }

        let shared_left =
            self.op_buffer_shared_limit_cell as f64 - self.used_egress_sp_bytes[sp] as f64;
        if self.used_egress_q_shared_bytes[port][qindex] as f64 + psize as f64
            > self.pg_shared_alpha_cell_egress * shared_left
        {
            // Natural if PFC is not in use.
            return Err(AdmissionError::EgressThreshold);
        }
        Ok(())
    }

    pub fn update_ingress_admission(&mut self, port: usize, qindex: usize, psize: u32) {
        self.used_total_bytes += psize;
        let sp = Self::ingress_sp(port, qindex);
        self.used_ingress_sp_bytes[sp] += psize;
        self.used_ingress_port_bytes[port] += psize;
        self.used_ingress_pg_bytes[port][qindex] += psize;
        if self.used_ingress_sp_bytes[sp] > self.buffer_cell_limit_sp {
            // Shared pool exhausted; this packet occupies headroom.
            self.used_ingress_pg_headroom_bytes[port][qindex] += psize;
        }
    }

    pub fn update_egress_admission(&mut self, port: usize, qindex: usize, psize: u32) {
        let q_min_used = self.used_egress_q_min_bytes[port][qindex];
        if q_min_used + psize < self.q_min_cell {
            // Fits entirely in the guarantee.
            self.used_egress_q_min_bytes[port][qindex] += psize;
            self.used_egress_port_bytes[port] += psize;
        } else if q_min_used != self.q_min_cell {
            // Straddles the guarantee: top it up, overflow into the shared
            // pool.
            let overflow = q_min_used + psize - self.q_min_cell;
            self.used_egress_q_shared_bytes[port][qindex] += overflow;
            self.used_egress_port_bytes[port] += psize;
            self.used_egress_sp_bytes[Self::egress_sp(port, qindex)] += overflow;
            self.used_egress_q_min_bytes[port][qindex] = self.q_min_cell;
        } else {
            self.used_egress_q_shared_bytes[port][qindex] += psize;
            self.used_egress_port_bytes[port] += psize;
            self.used_egress_sp_bytes[Self::egress_sp(port, qindex)] += psize;
        }
    }

    pub fn remove_from_ingress_admission(&mut self, port: usize, qindex: usize, psize: u32) {
        let sp = Self::ingress_sp(port, qindex);
        sub_clamped(
            &self.entity,
            &mut self.used_total_bytes,
            psize,
            "ingress total",
        );
        sub_clamped(
            &self.entity,
            &mut self.used_ingress_sp_bytes[sp],
            psize,
            "ingress sp",
        );
        sub_clamped(
            &self.entity,
            &mut self.used_ingress_port_bytes[port],
            psize,
            "ingress port",
        );
        sub_clamped(
            &self.entity,
            &mut self.used_ingress_pg_bytes[port][qindex],
            psize,
            "ingress pg",
        );
        // Headroom drains silently; most packets never touched it.
        let headroom = &mut self.used_ingress_pg_headroom_bytes[port][qindex];
        *headroom = headroom.saturating_sub(psize);
    }

    pub fn remove_from_egress_admission(&mut self, port: usize, qindex: usize, psize: u32) {
        let sp = Self::egress_sp(port, qindex);
        let q_min_used = self.used_egress_q_min_bytes[port][qindex];
        let q_shared_used = self.used_egress_q_shared_bytes[port][qindex];

        if q_min_used < self.q_min_cell {
            // The whole queue fits in the guarantee.
            sub_clamped(
                &self.entity,
                &mut self.used_egress_q_min_bytes[port][qindex],
                psize,
                "egress q_min",
            );
            sub_clamped(
                &self.entity,
                &mut self.used_egress_port_bytes[port],
                psize,
                "egress port",
            );
        } else if q_shared_used < psize {
            // Removal spans the shared remainder and part of the guarantee.
            sub_clamped(
                &self.entity,
                &mut self.used_egress_sp_bytes[sp],
                q_shared_used,
                "egress sp",
            );
            self.used_egress_q_shared_bytes[port][qindex] = 0;
            let spans = psize - q_shared_used;
            sub_clamped(
                &self.entity,
                &mut self.used_egress_q_min_bytes[port][qindex],
                spans,
                "egress q_min",
            );
            sub_clamped(
                &self.entity,
                &mut self.used_egress_port_bytes[port],
                psize,
                "egress port",
            );
        } else {
            sub_clamped(
                &self.entity,
                &mut self.used_egress_q_shared_bytes[port][qindex],
                psize,
                "egress q_shared",
            );
            sub_clamped(
                &self.entity,
                &mut self.used_egress_port_bytes[port],
                psize,
                "egress port",
            );
            sub_clamped(
                &self.entity,
                &mut self.used_egress_sp_bytes[sp],
                psize,
                "egress sp",
            );
        }
    }

    // ---------------- PFC ----------------

    /// Which priority classes of an ingress port must be paused right now.
    ///
    /// `qindex` is the class whose admission triggered the check; in
    /// static-threshold mode it is the only class that can newly pause
    /// unless the whole port trips its cap.
    #[must_use]
    pub fn pause_classes(&self, port: usize, qindex: usize) -> [bool; Q_CNT] {
        let mut classes = [false; Q_CNT];
        if self.dynamicth {
            for (i, class) in classes.iter_mut().enumerate() {
                let used_pg = self.used_ingress_pg_bytes[port][i];
                if used_pg <= self.pg_min_cell + self.port_min_cell {
                    continue;
                }
                let sp = Self::ingress_sp(port, i);
                let beyond_guarantee =
                    used_pg as f64 - self.pg_min_cell as f64 - self.port_min_cell as f64;
                let threshold = self.pg_shared_alpha_cell
                    * (self.buffer_cell_limit_sp as f64 - self.used_ingress_sp_bytes[sp] as f64);
                if beyond_guarantee > threshold
                    || self.used_ingress_pg_headroom_bytes[port][i] != 0
                {
                    *class = true;
                }
            }
        } else {
            if self.used_ingress_port_bytes[port] > self.port_max_shared_cell {
                // Pause the whole port.
                return [true; Q_CNT];
            }
            if self.used_ingress_pg_bytes[port][qindex] > self.pg_shared_limit_cell {
                classes[qindex] = true;
            }
        }
        classes
    }

    /// True when a paused (port, queue) may resume.
    #[must_use]
    pub fn resume_class(&self, port: usize, qindex: usize) -> bool {
        if !self.paused[port][qindex] {
            return false;
        }
        if self.dynamicth {
            let beyond_guarantee = self.used_ingress_pg_bytes[port][qindex] as f64
                - self.pg_min_cell as f64
                - self.port_min_cell as f64;
            let sp = Self::ingress_sp(port, qindex);
            let threshold = self.pg_shared_alpha_cell
                * (self.buffer_cell_limit_sp as f64
                    - self.used_ingress_sp_bytes[sp] as f64
                    - self.pg_shared_alpha_cell_off_diff);
            beyond_guarantee < threshold
                && self.used_ingress_pg_headroom_bytes[port][qindex] == 0
        } else {
            self.used_ingress_pg_bytes[port][qindex] < self.pg_shared_limit_cell_off
                && self.used_ingress_port_bytes[port] < self.port_min_cell_off
        }
    }

    /// Record a pause on (port, queue) and schedule the timed resume. A new
    /// pause supersedes any pending resume.
    pub fn set_pause(
        &mut self,
        port: usize,
        qindex: usize,
        pause_time_us: u32,
        scheduler: &mut Scheduler<SwitchEvent>,
    ) {
        self.paused[port][qindex] = true;
        if let Some(handle) = self.resume_evt[port][qindex].take() {
            scheduler.cancel(handle);
        }
        self.resume_evt[port][qindex] = Some(scheduler.schedule_in(
            SimTime::from_us(u64::from(pause_time_us)),
            SwitchEvent::PfcResume { port, qindex },
        ));
    }

    /// Clear the pause on (port, queue), cancelling any pending timed
    /// resume.
    pub fn set_resume(
        &mut self,
        port: usize,
        qindex: usize,
        scheduler: &mut Scheduler<SwitchEvent>,
    ) {
        self.paused[port][qindex] = false;
        if let Some(handle) = self.resume_evt[port][qindex].take() {
            scheduler.cancel(handle);
        }
    }

    #[must_use]
    pub fn is_paused(&self, port: usize, qindex: usize) -> bool {
        self.paused[port][qindex]
    }

    /// Did we tell the peer on this (port, queue) to pause?
    #[must_use]
    pub fn pause_remote(&self, port: usize, qindex: usize) -> bool {
        self.pause_remote[port][qindex]
    }

    pub fn set_pause_remote(&mut self, port: usize, qindex: usize, value: bool) {
        self.pause_remote[port][qindex] = value;
    }

    /// The PFC dynamic shared threshold for a port, in bytes beyond the
    /// guarantees. The credit-feedback module derives its own thresholds
    /// from this.
    #[must_use]
    pub fn pfc_shared_threshold(&self, port: usize) -> f64 {
        let sp = Self::ingress_sp(port, 0);
        self.pg_shared_alpha_cell
            * (self.buffer_cell_limit_sp as f64 - self.used_ingress_sp_bytes[sp] as f64)
            + self.pg_min_cell as f64
            + self.port_min_cell as f64
    }

    // ---------------- ECN ----------------

    /// Decide whether the packet leaving (port, queue) should carry a
    /// congestion notification. Queue 0 is control traffic and is never
    /// marked.
    pub fn should_send_cn(&mut self, port: usize, qindex: usize) -> bool {
        if qindex == 0 {
            return false;
        }
        let used = self.used_egress_q_shared_bytes[port][qindex];
        if used > self.kmax[port] {
            return true;
        }
        if used > self.kmin[port] && self.kmin[port] != self.kmax[port] {
            let p = (used - self.kmin[port]) as f64 / (self.kmax[port] - self.kmin[port]) as f64
                * self.pmax[port];
            return self.rng.gen::<f64>() < p;
        }
        false
    }

    // ---------------- Configuration ----------------

    /// Set the ECN profile of a port. Thresholds are given in kilobytes.
    pub fn config_ecn(&mut self, port: usize, kmin_kb: u32, kmax_kb: u32, pmax: f64) {
        self.kmin[port] = kmin_kb * 1_000;
        self.kmax[port] = kmax_kb * 1_000;
        self.pmax[port] = pmax;
    }

    /// Set the headroom limit of one port and re-derive the thresholds.
    pub fn config_hdrm(&mut self, port: usize, size: u32) {
        self.pg_hdrm_limit[port] = size;
        self.init_switch();
    }

    /// Set the active port count and re-derive the thresholds.
    pub fn config_n_port(&mut self, n_port: usize) {
        self.active_port_cnt = n_port;
        self.init_switch();
    }

    /// Set an explicit buffer size (0 derives it from the per-port value)
    /// and re-derive the thresholds.
    pub fn config_buffer_size(&mut self, size: u32) {
        self.static_max_bytes = size;
        self.init_switch();
    }

    /// Switch between dynamic and static thresholds and re-derive.
    pub fn set_dynamic_threshold(&mut self, value: bool) {
        self.dynamicth = value;
        self.init_switch();
    }

    #[must_use]
    pub fn dynamic_threshold(&self) -> bool {
        self.dynamicth
    }

    // ---------------- Occupancy getters ----------------

    #[must_use]
    pub fn used_buffer_total(&self) -> u32 {
        self.used_total_bytes
    }

    /// Ingress port buffer usage.
    #[must_use]
    pub fn ingress_port_bytes(&self, port: usize) -> u32 {
        if port < P_CNT {
            self.used_ingress_port_bytes[port]
        } else {
            0
        }
    }

    /// Egress port buffer usage.
    #[must_use]
    pub fn egress_port_bytes(&self, port: usize) -> u32 {
        if port < P_CNT {
            self.used_egress_port_bytes[port]
        } else {
            0
        }
    }

    /// Ingress priority-group buffer usage.
    #[must_use]
    pub fn ingress_queue_bytes(&self, port: usize, qindex: usize) -> u32 {
        if port < P_CNT && qindex < Q_CNT {
            self.used_ingress_pg_bytes[port][qindex]
        } else {
            0
        }
    }

    /// Egress queue buffer usage (guarantee plus shared).
    #[must_use]
    pub fn egress_queue_bytes(&self, port: usize, qindex: usize) -> u32 {
        if port < P_CNT && qindex < Q_CNT {
            self.used_egress_q_min_bytes[port][qindex]
                + self.used_egress_q_shared_bytes[port][qindex]
        } else {
            0
        }
    }
}

fn sub_clamped(entity: &Rc<Entity>, counter: &mut u32, psize: u32, what: &str) {
    let have = *counter;
    if have < psize {
        warn!(entity ; "illegal remove: {what} {have} < {psize}");
        *counter = 0;
    } else {
        *counter = have - psize;
    }
}
