// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Internet one's-complement checksum over a TCP segment.
//!
//! The checksum covers a pseudo-header (source address, destination address,
//! a zero byte, the protocol number, and the segment length) followed by the
//! segment itself. A trailing odd byte is zero-padded. Computation over a
//! segment whose checksum field is in place yields zero exactly when the
//! segment is intact, so one pure function serves both stamping and
//! verification.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::network::IpProtocol;
use ::std::{net::Ipv4Addr, slice::ChunksExact};

//==============================================================================
// Standalone Functions
//==============================================================================

/// Computes the checksum of a TCP segment (header + options + payload as one
/// contiguous byte slice) under the pseudo-header for [src]/[dst].
pub fn tcp_checksum(src: &Ipv4Addr, dst: &Ipv4Addr, segment: &[u8]) -> u16 {
    let mut state: u32 = 0;

    // Pseudo-header: source address (4 bytes).
    let src_octets: [u8; 4] = src.octets();
    state += u16::from_be_bytes([src_octets[0], src_octets[1]]) as u32;
    state += u16::from_be_bytes([src_octets[2], src_octets[3]]) as u32;

    // Destination address (4 bytes).
    let dst_octets: [u8; 4] = dst.octets();
    state += u16::from_be_bytes([dst_octets[0], dst_octets[1]]) as u32;
    state += u16::from_be_bytes([dst_octets[2], dst_octets[3]]) as u32;

    // One byte of zeros and the protocol number.
    state += u16::from_be_bytes([0, IpProtocol::TCP as u8]) as u32;

    // Segment length (2 bytes).
    state += segment.len() as u32;

    // The segment itself, zero-padding a trailing odd byte.
    let mut chunks_iter: ChunksExact<u8> = segment.chunks_exact(2);
    for chunk in chunks_iter.by_ref() {
        state += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let Some(&byte) = chunks_iter.remainder().first() {
        state += u16::from_be_bytes([byte, 0]) as u32;
    }

    // Fold the carries into the low 16 bits, then complement.
    while state > 0xFFFF {
        state = (state & 0xFFFF) + (state >> 16);
    }
    !state as u16
}

/// Verifies a received segment with its checksum field in place.
pub fn is_valid(src: &Ipv4Addr, dst: &Ipv4Addr, segment: &[u8]) -> bool {
    tcp_checksum(src, dst, segment) == 0
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::{is_valid, tcp_checksum};
    use ::std::net::Ipv4Addr;

    const SRC: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);
    const DST: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 5);

    /// Builds a minimal segment with its checksum stamped at bytes 16..18.
    fn stamped_segment(payload: &[u8]) -> Vec<u8> {
        let mut segment: Vec<u8> = vec![0; 20];
        segment[13] = 1 << 4; // ACK
        segment.extend_from_slice(payload);
        let checksum: u16 = tcp_checksum(&SRC, &DST, &segment);
        segment[16..18].copy_from_slice(&checksum.to_be_bytes());
        segment
    }

    /// Tests that computing then re-verifying over the same bytes yields zero.
    #[test]
    fn round_trip() {
        for payload in [&b""[..], b"x", b"hello, world", &[0xFF; 37]] {
            let segment: Vec<u8> = stamped_segment(payload);
            assert!(is_valid(&SRC, &DST, &segment));
        }
    }

    /// Tests that a single flipped bit is caught.
    #[test]
    fn detects_corruption() {
        let mut segment: Vec<u8> = stamped_segment(b"payload bytes");
        segment[24] ^= 0x01;
        assert!(!is_valid(&SRC, &DST, &segment));
    }

    /// Tests that a segment stamped for one destination is caught by the
    /// pseudo-header when checked against another.
    #[test]
    fn detects_misdelivery() {
        let segment: Vec<u8> = stamped_segment(b"payload bytes");
        let other: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 7);
        assert!(!is_valid(&SRC, &other, &segment));
    }
}
