// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! `SPINE` switch - the data plane of a simulated datacenter switch
//!
//! This library models the packet path through one switch of a simulated
//! datacenter network:
//!
//!  - the memory-management unit ([mmu]) with ingress/egress buffer
//!    accounting, shared-pool dynamic thresholds and admission control,
//!  - the Priority Flow Control pause/resume machinery and the egress ECN
//!    marker (also part of [mmu]),
//!  - ECMP and DRILL next-hop selection ([lb]),
//!  - the credit-based PFC enhancement module ([cpem]) in which a
//!    downstream switch reports queue pressure through periodic
//!    [credit-feedback packets](feedback) and upstream switches derate
//!    their effective send rate in response,
//!  - the [forwarding path](switch) that ties these together.
//!
//! The surrounding simulation kernel lives in
//! [`spine_engine`](../spine_engine/index.html); the physical links behind
//! each port are reached through the [`Device`](device::Device) trait.
//!
//! # Example
//!
//! ```rust
//! use std::rc::Rc;
//!
//! use spine_engine::engine::Engine;
//! use spine_engine::scheduler::Scheduler;
//! use spine_switch::events::SwitchEvent;
//! use spine_switch::mmu::MmuConfig;
//! use spine_switch::packet::{Packet, l3};
//! use spine_switch::settings::{Settings, node_id_to_ip};
//! use spine_switch::switch::Switch;
//! use spine_switch::test_helpers::test_devices;
//!
//! let engine = Engine::default();
//! let clock = engine.clock();
//! let mut scheduler: Scheduler<SwitchEvent> = Scheduler::new(&clock, engine.top());
//!
//! let (devices, _handles) = test_devices(4);
//! let mut switch = Switch::new(
//!     engine.top(),
//!     1,
//!     Rc::new(Settings::default()),
//!     &MmuConfig::default(),
//!     devices,
//! );
//!
//! let dip = node_id_to_ip(20);
//! switch.add_table_entry(dip, 2);
//!
//! let packet = Packet::new(l3::UDP, 1_048)
//!     .set_addresses(node_id_to_ip(10), dip)
//!     .set_ports(1_000, 2_000)
//!     .set_pg(3);
//! switch
//!     .receive_from_device(1, packet, &clock, &mut scheduler)
//!     .unwrap();
//! ```

pub mod cpem;
pub mod device;
pub mod events;
pub mod feedback;
pub mod lb;
pub mod mmu;
pub mod packet;
pub mod settings;
pub mod stats;
pub mod switch;
pub mod test_helpers;
