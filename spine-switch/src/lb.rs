// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Next-hop selection for forwarded packets.
//!
//! Flow ECMP hashes the four-tuple with a Murmur3-style 32-bit hash and
//! picks a candidate modulo the next-hop count, so a flow sticks to one
//! path. DRILL instead samples two random candidates plus the previously
//! remembered best for the destination and picks whichever egress queue is
//! currently shortest.

use std::collections::HashMap;

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_xoshiro::Xoshiro256PlusPlus;

use spine_engine::sim_error;
use spine_engine::types::SimError;

use crate::packet::{PacketHeader, l3};

/// Number of random candidates DRILL samples per decision.
pub const DRILL_CANDIDATE: usize = 2;

/// Murmur3-style 32-bit hash used for ECMP path selection.
#[must_use]
pub fn ecmp_hash(key: &[u8], seed: u32) -> u32 {
    let mut h = seed;

    let mut chunks = key.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes(chunk.try_into().unwrap());
        k = k.wrapping_mul(0xCC9E_2D51);
        k = k.rotate_left(15);
        k = k.wrapping_mul(0x1B87_3593);
        h ^= k;
        h = h.rotate_left(13);
        h = h.wrapping_mul(5).wrapping_add(0xE654_6B64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k = 0u32;
        for &byte in tail.iter().rev() {
            k = (k << 8) | u32::from(byte);
        }
        k = k.wrapping_mul(0xCC9E_2D51);
        k = k.rotate_left(15);
        k = k.wrapping_mul(0x1B87_3593);
        h ^= k;
    }

    h ^= key.len() as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85EB_CA6B);
    h ^= h >> 13;
    h = h.wrapping_mul(0xC2B2_AE35);
    h ^= h >> 16;
    h
}

/// Build the 12-byte ECMP key {sip, dip, sport, dport} for a packet.
///
/// Only TCP, UDP, ACK and NACK carry ports the hash can use; anything else
/// is a misconfiguration.
pub fn flow_ecmp_key(header: &PacketHeader) -> Result<[u8; 12], SimError> {
    match header.l3_prot {
        l3::TCP | l3::UDP | l3::ACK | l3::NACK => {}
        other => {
            return sim_error!("cannot hash protocol 0x{other:02X}, TCP/UDP/ACK/NACK only");
        }
    }

    let mut key = [0u8; 12];
    key[0..4].copy_from_slice(&header.sip.to_le_bytes());
    key[4..8].copy_from_slice(&header.dip.to_le_bytes());
    let ports = u32::from(header.sport) | (u32::from(header.dport) << 16);
    key[8..12].copy_from_slice(&ports.to_le_bytes());
    Ok(key)
}

/// Pick a next hop for a flow with ECMP.
pub fn flow_ecmp(header: &PacketHeader, nexthops: &[usize], seed: u32) -> Result<usize, SimError> {
    let key = flow_ecmp_key(header)?;
    let hash = ecmp_hash(&key, seed);
    Ok(nexthops[hash as usize % nexthops.len()])
}

/// DRILL decision state: the remembered best interface per destination and
/// the sampling RNG.
pub struct DrillState {
    previous_best: HashMap<u32, usize>,
    rng: Xoshiro256PlusPlus,
}

impl DrillState {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            previous_best: HashMap::new(),
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
        }
    }

    /// Choose the egress with the smallest current queue among a random
    /// sample of [DRILL_CANDIDATE] next hops and the previous best for
    /// this destination.
    pub fn choose(
        &mut self,
        dip: u32,
        nexthops: &[usize],
        queue_bytes: impl Fn(usize) -> u64,
    ) -> usize {
        let mut sampled = nexthops.to_vec();
        sampled.shuffle(&mut self.rng);

        let mut least_load = u64::MAX;
        let mut least_loaded = 0;
        if let Some(&previous) = self.previous_best.get(&dip) {
            least_loaded = previous;
            least_load = queue_bytes(previous);
        }

        for &candidate in sampled.iter().take(DRILL_CANDIDATE.min(sampled.len())) {
            let load = queue_bytes(candidate);
            if load < least_load {
                least_load = load;
                least_loaded = candidate;
            }
        }

        self.previous_best.insert(dip, least_loaded);
        least_loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;

    fn udp_header(sip: u32, dip: u32, sport: u16, dport: u16) -> PacketHeader {
        Packet::new(l3::UDP, 1_000)
            .set_addresses(sip, dip)
            .set_ports(sport, dport)
            .header
    }

    #[test]
    fn hash_is_stable() {
        let header = udp_header(0x0B00_0101, 0x0B00_0201, 1_000, 2_000);
        let key = flow_ecmp_key(&header).unwrap();

        let first = ecmp_hash(&key, 0);
        for _ in 0..10 {
            assert_eq!(ecmp_hash(&key, 0), first);
        }

        // The index derived from it is stable too.
        let nexthops = [4, 5, 6, 7];
        let choice = flow_ecmp(&header, &nexthops, 0).unwrap();
        assert_eq!(flow_ecmp(&header, &nexthops, 0).unwrap(), choice);
        assert!(nexthops.contains(&choice));
    }

    #[test]
    fn key_differs_per_flow() {
        let a = flow_ecmp_key(&udp_header(0x0B00_0101, 0x0B00_0201, 1_000, 2_000)).unwrap();
        let b = flow_ecmp_key(&udp_header(0x0B00_0101, 0x0B00_0201, 1_001, 2_000)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn seed_changes_selection() {
        let header = udp_header(0x0B00_0101, 0x0B00_0201, 1_000, 2_000);
        let key = flow_ecmp_key(&header).unwrap();

        // Not universally true for any pair of seeds, but these differ.
        let spread: std::collections::HashSet<u32> =
            (0..32).map(|seed| ecmp_hash(&key, seed)).collect();
        assert!(spread.len() > 1);
    }

    #[test]
    fn hash_handles_short_keys() {
        // Tail handling: lengths that are not a multiple of four.
        for len in 1..12 {
            let key: Vec<u8> = (0..len as u8).collect();
            let h = ecmp_hash(&key, 7);
            assert_eq!(ecmp_hash(&key, 7), h);
        }
    }

    #[test]
    fn control_without_ports_is_rejected() {
        let header = Packet::new(l3::PFC, 64).header;
        assert!(flow_ecmp_key(&header).is_err());
    }

    #[test]
    fn ack_and_nack_are_hashable() {
        for prot in [l3::ACK, l3::NACK, l3::TCP] {
            let mut header = udp_header(1, 2, 3, 4);
            header.l3_prot = prot;
            assert!(flow_ecmp_key(&header).is_ok());
        }
    }

    #[test]
    fn drill_prefers_short_queues() {
        let mut drill = DrillState::new(1);
        let nexthops = [1, 2, 3, 4];

        // Port 3 always has the shortest queue; with two samples plus the
        // remembered best it must win within a few decisions and then
        // stick.
        let loads = |port: usize| if port == 3 { 10 } else { 1_000 + port as u64 };
        let mut choice = 0;
        for _ in 0..64 {
            choice = drill.choose(0x0B00_0201, &nexthops, loads);
        }
        assert_eq!(choice, 3);

        // The remembered best survives a sample that misses port 3.
        for _ in 0..8 {
            assert_eq!(drill.choose(0x0B00_0201, &nexthops, loads), 3);
        }
    }

    #[test]
    fn drill_tracks_destinations_independently() {
        let mut drill = DrillState::new(9);
        let nexthops = [1, 2];

        let a = drill.choose(10, &nexthops, |p| p as u64);
        let b = drill.choose(20, &nexthops, |p| 100 - p as u64);
        // Destination 10 prefers the lower-numbered port, destination 20
        // the higher.
        assert_eq!(a, 1);
        assert_eq!(b, 2);
    }
}
