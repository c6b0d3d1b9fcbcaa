// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Segment assembly.
//!
//! A segment is one TCP header + optional options + payload, framed as a
//! single contiguous buffer ready to hand to the IP layer. Assembly never
//! mutates connection state: callers advance their sequence counters
//! explicitly, so the same routine serves fresh sends and retransmissions.

//==============================================================================
// Imports
//==============================================================================

use crate::{
    protocols::tcp::{checksum, header::TcpHeader, SeqNumber},
    runtime::fail::Fail,
};
use ::libc::ENOMEM;
use ::std::net::Ipv4Addr;

//==============================================================================
// Standalone Functions
//==============================================================================

/// Assembles [header] plus [payload] into one framed segment, stamping the
/// checksum under the pseudo-header for [src]/[dst]. Allocation failure
/// propagates as `ENOMEM` before any state is touched; there is no retry.
pub fn build(header: &TcpHeader, payload: Option<&[u8]>, src: &Ipv4Addr, dst: &Ipv4Addr) -> Result<Vec<u8>, Fail> {
    let header_size: usize = header.compute_size();
    let payload_len: usize = payload.map_or(0, <[u8]>::len);

    let mut frame: Vec<u8> = Vec::new();
    frame
        .try_reserve_exact(header_size + payload_len)
        .map_err(|_| Fail::new(ENOMEM, "cannot allocate segment"))?;

    header.serialize_into(&mut frame);
    if let Some(payload) = payload {
        frame.extend_from_slice(payload);
    }

    let checksum: u16 = checksum::tcp_checksum(src, dst, &frame);
    frame[16..18].copy_from_slice(&checksum.to_be_bytes());

    Ok(frame)
}

/// Builds the reset reply for a segment addressed to no live endpoint.
/// Returns `None` for segments that themselves carry RST: a reset is never
/// answered with a reset.
pub fn build_rst_for(
    offender: &TcpHeader,
    local: &Ipv4Addr,
    remote: &Ipv4Addr,
) -> Result<Option<Vec<u8>>, Fail> {
    if offender.rst {
        return Ok(None);
    }

    let mut header: TcpHeader = TcpHeader::new(offender.dst_port, offender.src_port);
    header.rst = true;
    header.ack = true;
    header.seq_num = SeqNumber::from(0);
    header.ack_num = offender.seq_num + SeqNumber::from(1);
    header.window_size = 0;

    build(&header, None, local, remote).map(Some)
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::{build, build_rst_for};
    use crate::protocols::tcp::{checksum, header::TcpHeader, SeqNumber};
    use ::anyhow::Result;
    use ::std::net::Ipv4Addr;

    const SRC: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);
    const DST: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 5);

    /// Tests that a built segment carries a checksum that verifies to zero.
    #[test]
    fn build_stamps_valid_checksum() -> Result<()> {
        let mut header: TcpHeader = TcpHeader::new(49152, 80);
        header.ack = true;
        header.psh = true;
        header.seq_num = SeqNumber::from(1000);
        let frame: Vec<u8> = match build(&header, Some(b"some payload"), &SRC, &DST) {
            Ok(frame) => frame,
            Err(e) => anyhow::bail!("build failed: {:?}", e),
        };
        anyhow::ensure!(checksum::is_valid(&SRC, &DST, &frame));
        anyhow::ensure!(frame.len() == 20 + 12);
        Ok(())
    }

    /// Tests that the reset reply mirrors the offender's ports and
    /// acknowledges its sequence number.
    #[test]
    fn rst_reply_shape() -> Result<()> {
        let mut offender: TcpHeader = TcpHeader::new(49152, 80);
        offender.syn = true;
        offender.seq_num = SeqNumber::from(7777);

        let frame: Vec<u8> = match build_rst_for(&offender, &DST, &SRC) {
            Ok(Some(frame)) => frame,
            other => anyhow::bail!("expected a reset reply, got {:?}", other.map(|f| f.map(|v| v.len()))),
        };
        let (reply, _): (TcpHeader, &[u8]) = match TcpHeader::parse(&SRC, &DST, &frame) {
            Ok(result) => result,
            Err(e) => anyhow::bail!("parse failed: {:?}", e),
        };
        anyhow::ensure!(reply.src_port == 80 && reply.dst_port == 49152);
        anyhow::ensure!(reply.rst && reply.ack);
        anyhow::ensure!(reply.ack_num == SeqNumber::from(7778));
        anyhow::ensure!(reply.window_size == 0);
        Ok(())
    }

    /// Tests that a reset is never answered with a reset.
    #[test]
    fn no_rst_for_rst() -> Result<()> {
        let mut offender: TcpHeader = TcpHeader::new(49152, 80);
        offender.rst = true;
        anyhow::ensure!(matches!(build_rst_for(&offender, &DST, &SRC), Ok(None)));
        Ok(())
    }
}
