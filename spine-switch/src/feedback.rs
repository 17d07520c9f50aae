// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The credit-feedback wire format and packet construction.
//!
//! A downstream switch reports the state of one ingress port with a 9-byte
//! header, carried as the payload of an IPv4 datagram with protocol
//! [0xFB](crate::packet::l3::FEEDBACK). Feedback is link-local: the
//! datagram is addressed to broadcast with TTL 1 and sent back through the
//! port whose queue it describes, so it is consumed by the immediate
//! upstream neighbour and never forwarded.
//!
//! Wire format (big-endian):
//!
//! | Offset | Size | Field        |
//! |--------|------|--------------|
//! | 0      | 4    | queue_len    |
//! | 4      | 2    | gradient     |
//! | 6      | 2    | credit_value |
//! | 8      | 1    | port_index   |

use spine_engine::sim_error;
use spine_engine::types::SimError;

use crate::packet::{IPV4_HEADER_BYTES, PPP_HEADER_BYTES, Packet, l3};

/// IPv4 protocol number carrying credit feedback.
pub const PROT_NUMBER: u8 = l3::FEEDBACK;

/// Serialized size of the header in bytes.
pub const SERIALIZED_BYTES: usize = 9;

/// The broadcast address used as the feedback destination.
pub const BROADCAST_IP: u32 = 0xFFFF_FFFF;

/// One credit-feedback report.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CreditFeedbackHeader {
    /// Ingress queue length in bytes at the reporting switch.
    pub queue_len: u32,

    /// Queue length change since the previous observation, bytes per
    /// feedback interval.
    pub gradient: i16,

    /// Credit value in [0, max_credit].
    pub credit_value: u16,

    /// The downstream port that produced the report.
    pub port_index: u8,
}

impl CreditFeedbackHeader {
    /// Create a header from its fields.
    #[must_use]
    pub fn new(queue_len: u32, gradient: i16, credit_value: u16, port_index: u8) -> Self {
        Self {
            queue_len,
            gradient,
            credit_value,
            port_index,
        }
    }

    /// Serialize to the 9-byte wire format.
    #[must_use]
    pub fn serialize(&self) -> [u8; SERIALIZED_BYTES] {
        let mut buf = [0u8; SERIALIZED_BYTES];
        buf[0..4].copy_from_slice(&self.queue_len.to_be_bytes());
        buf[4..6].copy_from_slice(&(self.gradient as u16).to_be_bytes());
        buf[6..8].copy_from_slice(&self.credit_value.to_be_bytes());
        buf[8] = self.port_index;
        buf
    }

    /// Deserialize from the wire format.
    pub fn deserialize(buf: &[u8]) -> Result<Self, SimError> {
        if buf.len() != SERIALIZED_BYTES {
            return sim_error!(
                "credit-feedback payload is {} bytes, expected {SERIALIZED_BYTES}",
                buf.len()
            );
        }
        Ok(Self {
            queue_len: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            gradient: u16::from_be_bytes(buf[4..6].try_into().unwrap()) as i16,
            credit_value: u16::from_be_bytes(buf[6..8].try_into().unwrap()),
            port_index: buf[8],
        })
    }
}

impl std::fmt::Display for CreditFeedbackHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "queue_len={}, gradient={}, credit_value={}, port_index={}",
            self.queue_len, self.gradient, self.credit_value, self.port_index
        )
    }
}

/// Build the link-local feedback packet for one report.
#[must_use]
pub fn build_feedback_packet(header: &CreditFeedbackHeader, sip: u32) -> Packet {
    let mut packet = Packet::new(PROT_NUMBER, 0).set_addresses(sip, BROADCAST_IP);
    packet.header.ttl = 1;
    packet.payload = header.serialize().to_vec();
    packet.size_bytes = PPP_HEADER_BYTES + IPV4_HEADER_BYTES + SERIALIZED_BYTES as u32;
    packet
}

/// Recover the feedback report from a received packet.
pub fn parse_feedback(packet: &Packet) -> Result<CreditFeedbackHeader, SimError> {
    if packet.header.l3_prot != PROT_NUMBER {
        return sim_error!(
            "not a credit-feedback packet (l3_prot 0x{:02X})",
            packet.header.l3_prot
        );
    }
    CreditFeedbackHeader::deserialize(&packet.payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format() {
        let header = CreditFeedbackHeader::new(0x0102_0304, -1, 500, 7);
        assert_eq!(
            header.serialize(),
            [0x01, 0x02, 0x03, 0x04, 0xFF, 0xFF, 0x01, 0xF4, 0x07]
        );
    }

    #[test]
    fn round_trip() {
        for (queue_len, gradient, credit_value, port_index) in [
            (0, 0, 0, 0),
            (u32::MAX, i16::MIN, u16::MAX, u8::MAX),
            (123_456, -5_000, 1_000, 1),
            (50_000, 32_767, 999, 127),
        ] {
            let header = CreditFeedbackHeader::new(queue_len, gradient, credit_value, port_index);
            let bytes = header.serialize();
            assert_eq!(CreditFeedbackHeader::deserialize(&bytes).unwrap(), header);
        }
    }

    #[test]
    fn short_payload_rejected() {
        assert!(CreditFeedbackHeader::deserialize(&[0u8; 8]).is_err());
    }

    #[test]
    fn feedback_packet_is_link_local() {
        let header = CreditFeedbackHeader::new(60_000, 100, 250, 3);
        let packet = build_feedback_packet(&header, 0x0B00_0101);

        assert_eq!(packet.header.l3_prot, PROT_NUMBER);
        assert_eq!(packet.header.ttl, 1);
        assert_eq!(packet.header.dip, BROADCAST_IP);
        assert_eq!(packet.size_bytes, 31);
        assert_eq!(parse_feedback(&packet).unwrap(), header);
    }

    #[test]
    fn parse_rejects_other_protocols() {
        let packet = Packet::new(crate::packet::l3::UDP, 100);
        assert!(parse_feedback(&packet).is_err());
    }
}
