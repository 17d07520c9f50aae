// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The forwarding path of one switch.
//!
//! Packet arrival runs `receive -> next-hop selection -> admission ->
//! enqueue`, notifying the PFC engine and the credit module on the way;
//! dequeue runs the symmetric removal, may ECN-mark, re-evaluates resume
//! and appends in-band telemetry for HPCC hosts. Credit-feedback packets
//! short-circuit all of this: they are consumed locally by the credit
//! integrator and are never forwarded.
//!
//! Conga and ConWeave take custody of packets through the [CustodyRouter]
//! seam and re-enter the path through [Switch::send_to_dev_continue] or
//! [Switch::do_switch_send] once they have decided a next hop.

use std::collections::HashMap;
use std::rc::Rc;

use spine_engine::scheduler::Scheduler;
use spine_engine::sim_error;
use spine_engine::time::clock::Clock;
use spine_engine::time::simtime::SimTime;
use spine_engine::types::{SimError, SimResult};
use spine_model_builder::EntityDisplay;
use spine_track::entity::Entity;
use spine_track::{trace, warn};

use crate::cpem::Cpem;
use crate::device::{Device, PfcOp};
use crate::events::SwitchEvent;
use crate::feedback::{self, CreditFeedbackHeader};
use crate::lb::{self, DrillState};
use crate::mmu::{MmuConfig, P_CNT, Q_CNT, SwitchMmu};
use crate::packet::{Ecn, IntHop, Packet, PacketHeader, l3};
use crate::settings::{CcMode, LbMode, Settings, node_id_to_ip};
use crate::stats::SwitchStats;

/// A load-balancing module that takes custody of packets and invokes the
/// forwarding continuation itself once it has decided a next hop.
pub trait CustodyRouter {
    /// Take over routing of one packet.
    fn route_input(&mut self, packet: Packet);
}

/// One simulated switch.
#[derive(EntityDisplay)]
pub struct Switch {
    pub entity: Rc<Entity>,
    id: u32,
    ecmp_seed: u32,
    settings: Rc<Settings>,
    mmu: SwitchMmu,
    cpem: Cpem,
    drill: DrillState,
    custody: Option<Box<dyn CustodyRouter>>,

    /// Destination IP to the ECMP candidate egress ports.
    rt_table: HashMap<u32, Vec<usize>>,

    /// Link devices indexed by port; index 0 is unused.
    devices: Vec<Rc<dyn Device>>,

    // Uplink monitoring; cumulative counters plus the value at the last
    // sample point for interval deltas.
    tx_bytes: [u64; P_CNT],
    rx_bytes: [u64; P_CNT],
    tx_bytes_sample: [u64; P_CNT],
    rx_bytes_sample: [u64; P_CNT],

    stats: SwitchStats,
}

impl Switch {
    pub fn new(
        parent: &Rc<Entity>,
        id: u32,
        settings: Rc<Settings>,
        mmu_config: &MmuConfig,
        devices: Vec<Rc<dyn Device>>,
    ) -> Self {
        let entity = Rc::new(Entity::new(parent, &format!("sw_{id}")));
        let mmu = SwitchMmu::new(&entity, mmu_config);
        let cpem = Cpem::new(&entity, &settings.cpem);
        let drill = DrillState::new(mmu_config.seed ^ u64::from(id));
        Self {
            entity,
            id,
            ecmp_seed: id,
            settings,
            mmu,
            cpem,
            drill,
            custody: None,
            rt_table: HashMap::new(),
            devices,
            tx_bytes: [0; P_CNT],
            rx_bytes: [0; P_CNT],
            tx_bytes_sample: [0; P_CNT],
            rx_bytes_sample: [0; P_CNT],
            stats: SwitchStats::default(),
        }
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn set_ecmp_seed(&mut self, seed: u32) {
        self.ecmp_seed = seed;
    }

    /// Attach the external routing module for the custody load balancers.
    pub fn set_custody_router(&mut self, router: Box<dyn CustodyRouter>) {
        self.custody = Some(router);
    }

    /// Append an ECMP candidate for a destination.
    pub fn add_table_entry(&mut self, dst_addr: u32, port: usize) {
        self.rt_table.entry(dst_addr).or_default().push(port);
    }

    pub fn clear_table(&mut self) {
        self.rt_table.clear();
    }

    #[must_use]
    pub fn mmu(&self) -> &SwitchMmu {
        &self.mmu
    }

    pub fn mmu_mut(&mut self) -> &mut SwitchMmu {
        &mut self.mmu
    }

    #[must_use]
    pub fn cpem(&self) -> &Cpem {
        &self.cpem
    }

    #[must_use]
    pub fn stats(&self) -> &SwitchStats {
        &self.stats
    }

    // ---------------- Main logics ----------------

    /// Entry point for a packet handed up by a link device.
    pub fn receive_from_device(
        &mut self,
        in_port: usize,
        mut packet: Packet,
        clock: &Clock,
        scheduler: &mut Scheduler<SwitchEvent>,
    ) -> SimResult {
        if in_port < P_CNT {
            self.rx_bytes[in_port] += u64::from(packet.size_bytes);
        }
        packet.in_port = in_port as u32;
        self.send_to_dev(packet, clock, scheduler)
    }

    fn send_to_dev(
        &mut self,
        packet: Packet,
        clock: &Clock,
        scheduler: &mut Scheduler<SwitchEvent>,
    ) -> SimResult {
        // Credit feedback bypasses the load balancer entirely.
        if self.settings.cpem.enabled && packet.header.l3_prot == l3::FEEDBACK {
            return self.send_to_dev_continue(packet, clock, scheduler);
        }

        // Conga and ConWeave hijack the packet and run the continuation
        // themselves.
        if self.settings.lb_mode.takes_custody() {
            return match self.custody.as_mut() {
                Some(router) => {
                    router.route_input(packet);
                    Ok(())
                }
                None => {
                    sim_error!(
                        "lb mode {:?} requires a custody router",
                        self.settings.lb_mode
                    )
                }
            };
        }

        self.send_to_dev_continue(packet, clock, scheduler)
    }

    /// The forwarding continuation: next-hop selection, queue selection
    /// and the admission-checked enqueue.
    pub fn send_to_dev_continue(
        &mut self,
        packet: Packet,
        clock: &Clock,
        scheduler: &mut Scheduler<SwitchEvent>,
    ) -> SimResult {
        if self.settings.cpem.enabled && packet.header.l3_prot == l3::FEEDBACK {
            // Consumed locally, never forwarded.
            self.cpem_handle_feedback(&packet, clock);
            return Ok(());
        }

        let out_dev = self.get_out_dev(&packet)?;
        if !self.devices[out_dev].is_link_up() {
            return sim_error!("routing table returned port {out_dev} whose link is down");
        }

        let qindex = self.select_queue(&packet.header);
        self.do_switch_send(packet, out_dev, qindex, clock, scheduler)
    }

    /// The egress queue for a packet: control protocols (and ACK/NACK when
    /// configured) go to the highest priority, TCP to queue 1, UDP to its
    /// priority group.
    fn select_queue(&self, header: &PacketHeader) -> usize {
        match header.l3_prot {
            l3::PFC | l3::QCN | l3::FEEDBACK => 0,
            l3::ACK | l3::NACK if self.settings.ack_high_prio => 0,
            l3::TCP => 1,
            _ => usize::from(header.pg),
        }
    }

    fn get_out_dev(&mut self, packet: &Packet) -> Result<usize, SimError> {
        let header = &packet.header;
        let nexthops = match self.rt_table.get(&header.dip) {
            Some(nexthops) => nexthops,
            None => {
                // A missing entry is a misconfigured topology.
                return sim_error!(
                    "switch {}: no matching routing entry for {:#010x} (l3 {:#04x})",
                    self.id,
                    header.dip,
                    header.l3_prot
                );
            }
        };

        // Control packets always take flow ECMP.
        if self.settings.lb_mode == LbMode::Ecmp || l3::is_control(header.l3_prot) {
            return lb::flow_ecmp(header, nexthops, self.ecmp_seed);
        }

        match self.settings.lb_mode {
            LbMode::Drill => {
                let devices = &self.devices;
                Ok(self
                    .drill
                    .choose(header.dip, nexthops, |port| devices[port].queue_bytes()))
            }
            // Conga and ConWeave decide inside their own modules; packets
            // re-entering here take flow ECMP.
            LbMode::Conga | LbMode::Conweave => lb::flow_ecmp(header, nexthops, self.ecmp_seed),
            LbMode::Letflow => {
                sim_error!("letflow routing is an external module and is not attached")
            }
            LbMode::Ecmp => unreachable!(),
        }
    }

    /// Admission-checked hand-off to the egress device. This is also the
    /// continuation the custody load balancers invoke with their chosen
    /// next hop.
    pub fn do_switch_send(
        &mut self,
        packet: Packet,
        out_dev: usize,
        qindex: usize,
        clock: &Clock,
        scheduler: &mut Scheduler<SwitchEvent>,
    ) -> SimResult {
        if packet.from_ctrl_dummy_indev() {
            // ConWeave replies ride the ACK protocol at high priority.
            assert!(
                qindex == 0 && self.settings.ack_high_prio,
                "injected control packets must use queue 0"
            );
        }

        let psize = packet.size_bytes;
        if qindex != 0 {
            let in_dev = packet.in_port as usize;
            if self
                .mmu
                .check_egress_admission(out_dev, qindex, psize)
                .is_err()
            {
                self.stats.dropped_pkt_sw_egress += 1;
                return Ok(());
            }
            if self
                .mmu
                .check_ingress_admission(in_dev, qindex, psize)
                .is_err()
            {
                self.stats.dropped_pkt_sw_ingress += 1;
                return Ok(());
            }
            self.mmu.update_ingress_admission(in_dev, qindex, psize);
            self.mmu.update_egress_admission(out_dev, qindex, psize);

            self.check_and_send_pfc(in_dev, qindex, scheduler);

            if self.settings.cpem.enabled {
                let thresholds = self.cpem.thresholds(&self.mmu, out_dev);
                self.cpem.update_inflight_on_send(
                    out_dev,
                    u64::from(psize),
                    clock.now(),
                    thresholds,
                );
            }
        }

        self.devices[out_dev].switch_send(qindex, packet);
        Ok(())
    }

    /// Counters are updated when the device actually dequeues the packet
    /// for transmission.
    pub fn notify_dequeue(
        &mut self,
        out_port: usize,
        qindex: usize,
        packet: &mut Packet,
        clock: &Clock,
        scheduler: &mut Scheduler<SwitchEvent>,
    ) {
        if qindex != 0 {
            let in_dev = packet.in_port as usize;
            if !packet.from_ctrl_dummy_indev() {
                self.mmu
                    .remove_from_ingress_admission(in_dev, qindex, packet.size_bytes);
            }
            self.mmu
                .remove_from_egress_admission(out_port, qindex, packet.size_bytes);

            if self.settings.ecn_enabled && self.mmu.should_send_cn(out_port, qindex) {
                packet.header.ecn = Ecn::CongestionExperienced;
            }

            if !packet.from_ctrl_dummy_indev() {
                self.check_and_send_resume(in_dev, qindex, scheduler);
            }
        }

        if packet.header.l3_prot == l3::UDP && self.settings.cc_mode == CcMode::Hpcc {
            let device = &self.devices[out_port];
            packet.int.get_or_insert_with(Default::default).push_hop(IntHop {
                time_ns: clock.now_ns(),
                tx_bytes: self.tx_bytes[out_port],
                queue_bytes: device.queue_bytes(),
                link_rate_bps: device.link_rate_bps(),
            });
        }

        self.tx_bytes[out_port] += u64::from(packet.size_bytes);
    }

    // ---------------- PFC ----------------

    fn check_and_send_pfc(
        &mut self,
        in_dev: usize,
        qindex: usize,
        scheduler: &mut Scheduler<SwitchEvent>,
    ) {
        let device = self.devices[in_dev].clone();

        let classes = self.mmu.pause_classes(in_dev, qindex);
        for (class, &pause) in classes.iter().enumerate() {
            if pause {
                let paused_time = device.send_pfc(class, PfcOp::Pause);
                self.mmu.set_pause(in_dev, class, paused_time, scheduler);
                self.mmu.set_pause_remote(in_dev, class, true);
            }
        }

        for class in 0..Q_CNT {
            if !self.mmu.pause_remote(in_dev, class) {
                continue;
            }
            if self.mmu.resume_class(in_dev, class) {
                device.send_pfc(class, PfcOp::Resume);
                self.mmu.set_resume(in_dev, class, scheduler);
                self.mmu.set_pause_remote(in_dev, class, false);
            }
        }
    }

    fn check_and_send_resume(
        &mut self,
        in_dev: usize,
        qindex: usize,
        scheduler: &mut Scheduler<SwitchEvent>,
    ) {
        if self.mmu.pause_remote(in_dev, qindex) && self.mmu.resume_class(in_dev, qindex) {
            self.devices[in_dev].send_pfc(qindex, PfcOp::Resume);
            self.mmu.set_resume(in_dev, qindex, scheduler);
            self.mmu.set_pause_remote(in_dev, qindex, false);
        }
    }

    // ---------------- CPEM ----------------

    /// Bring up the credit module: initialise per-port state and start the
    /// periodic feedback timers, staggered across ports to avoid a burst.
    pub fn cpem_init(&mut self, scheduler: &mut Scheduler<SwitchEvent>) {
        if !self.settings.cpem.enabled {
            return;
        }

        let num_devices = self.devices.len();
        let interval = self.settings.cpem.feedback_interval_ns;
        for port in 1..num_devices {
            if self.devices[port].is_link_up() {
                self.cpem.init_port(port, self.devices[port].link_rate_bps());
                let delay = SimTime::from_ns(interval * port as u64 / num_devices as u64);
                let handle = scheduler.schedule_in(delay, SwitchEvent::CpemTick { port });
                if let Some(old) = self.cpem.replace_tick_event(port, handle) {
                    scheduler.cancel(old);
                }
            }
        }
    }

    /// Dispatch one scheduled event.
    pub fn handle_event(
        &mut self,
        event: SwitchEvent,
        clock: &Clock,
        scheduler: &mut Scheduler<SwitchEvent>,
    ) {
        match event {
            SwitchEvent::PfcResume { port, qindex } => {
                self.mmu.set_resume(port, qindex, scheduler);
            }
            SwitchEvent::CpemTick { port } => self.cpem_tick(port, clock, scheduler),
        }
    }

    fn cpem_reschedule(&mut self, port: usize, scheduler: &mut Scheduler<SwitchEvent>) {
        let interval = SimTime::from_ns(self.settings.cpem.feedback_interval_ns);
        let handle = scheduler.schedule_in(interval, SwitchEvent::CpemTick { port });
        if let Some(old) = self.cpem.replace_tick_event(port, handle) {
            scheduler.cancel(old);
        }
    }

    /// One firing of the per-port feedback timer on the downstream side.
    fn cpem_tick(&mut self, port: usize, clock: &Clock, scheduler: &mut Scheduler<SwitchEvent>) {
        if !self.settings.cpem.enabled || port >= self.devices.len() {
            return;
        }
        let device = self.devices[port].clone();
        if !device.is_link_up() || !self.cpem.state(port).initialized {
            // Silently skipped; the timer dies with the link.
            return;
        }

        let queue_len = self.mmu.ingress_port_bytes(port);
        let (low, high) = self.cpem.thresholds(&self.mmu, port);

        if queue_len < low {
            // Queue is low; nothing to report this interval.
            self.cpem_reschedule(port, scheduler);
            return;
        }

        let gradient = self.cpem.observe_queue(port, queue_len);
        let credit = self.cpem.credit_value(queue_len, gradient, low, high);

        if credit > 0 {
            let header = CreditFeedbackHeader::new(queue_len, gradient, credit, port as u8);
            let packet = feedback::build_feedback_packet(&header, node_id_to_ip(self.id));
            trace!(self.entity ; "port {port} sends feedback: {header}");
            // Back through the same port, highest priority.
            device.switch_send(0, packet);
            self.stats.cpem_feedback_sent += 1;
        }

        self.cpem_reschedule(port, scheduler);
    }

    /// Consume a received feedback packet on the upstream side: fold the
    /// credit into the state of the port it arrived on and derate that
    /// port's device.
    fn cpem_handle_feedback(&mut self, packet: &Packet, clock: &Clock) {
        let header = match feedback::parse_feedback(packet) {
            Ok(header) => header,
            Err(e) => {
                warn!(self.entity ; "discarding malformed credit feedback: {e}");
                return;
            }
        };

        let in_port = packet.in_port as usize;
        if in_port >= self.devices.len() {
            return;
        }

        let (low, _) = self.cpem.thresholds(&self.mmu, in_port);
        self.cpem.update_credit_on_feedback(
            in_port,
            header.credit_value,
            header.gradient,
            low,
            clock.now(),
        );

        let device = self.devices[in_port].clone();
        let adjusted =
            self.cpem
                .adjusted_rate(in_port, device.link_rate_bps(), clock.now(), &mut self.stats);
        device.set_effective_rate(adjusted);

        self.stats.cpem_feedback_recv += 1;
    }

    // ---------------- Uplink monitoring ----------------

    /// Cumulative bytes transmitted out of a port.
    #[must_use]
    pub fn tx_bytes_out_dev(&self, out_dev: usize) -> u64 {
        assert!(out_dev < P_CNT);
        self.tx_bytes[out_dev]
    }

    /// Cumulative bytes received on a port.
    #[must_use]
    pub fn rx_bytes_in_dev(&self, in_dev: usize) -> u64 {
        assert!(in_dev < P_CNT);
        self.rx_bytes[in_dev]
    }

    /// Bytes transmitted since the last sample point.
    #[must_use]
    pub fn tx_bytes_delta(&self, out_dev: usize) -> u64 {
        assert!(out_dev < P_CNT);
        self.tx_bytes[out_dev] - self.tx_bytes_sample[out_dev]
    }

    /// Bytes received since the last sample point.
    #[must_use]
    pub fn rx_bytes_delta(&self, in_dev: usize) -> u64 {
        assert!(in_dev < P_CNT);
        self.rx_bytes[in_dev] - self.rx_bytes_sample[in_dev]
    }

    /// Move the sample point to now.
    pub fn update_sample_counters(&mut self) {
        self.tx_bytes_sample = self.tx_bytes;
        self.rx_bytes_sample = self.rx_bytes;
    }
}
