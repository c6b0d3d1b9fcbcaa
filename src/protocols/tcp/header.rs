// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::{
    protocols::tcp::{checksum, SeqNumber},
    runtime::fail::Fail,
};
use ::arrayvec::ArrayVec;
use ::libc::EBADMSG;
use ::std::net::Ipv4Addr;

//==============================================================================
// Constants
//==============================================================================

pub const MIN_TCP_HEADER_SIZE: usize = 20;
pub const MAX_TCP_HEADER_SIZE: usize = 60;
pub const MAX_TCP_OPTIONS: usize = 5;

//==============================================================================
// Structures
//==============================================================================

/// TCP options this engine understands. Unknown options are skipped over on
/// parse using their length byte.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TcpOption {
    EndOfOptionsList,
    NoOperation,
    MaximumSegmentSize(u16),
}

/// A parsed or to-be-serialized TCP header.
///
/// Wire layout (all multi-byte fields big-endian): source port, destination
/// port, sequence number, acknowledgement number, data offset packed with
/// reserved bits, flags byte, window size, checksum, urgent pointer, then
/// options padded to a 4-byte boundary. The data offset is computed on the
/// fly on serialization based on options; the checksum is checked when
/// parsing and stamped by the segment builder.
#[derive(Debug, Clone)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_num: SeqNumber,
    pub ack_num: SeqNumber,

    // Flags byte: [ CWR ] [ ECE ] [ URG ] [ ACK ] [ PSH ] [ RST ] [ SYN ] [ FIN ]
    pub urg: bool,
    pub ack: bool,
    pub psh: bool,
    pub rst: bool,
    pub syn: bool,
    pub fin: bool,

    pub window_size: u16,
    pub urgent_pointer: u16,

    pub options: ArrayVec<TcpOption, MAX_TCP_OPTIONS>,
}

//==============================================================================
// Associated Functions
//==============================================================================

impl TcpOption {
    fn compute_size(&self) -> usize {
        match self {
            TcpOption::EndOfOptionsList => 1,
            TcpOption::NoOperation => 1,
            TcpOption::MaximumSegmentSize(..) => 4,
        }
    }
}

impl TcpHeader {
    pub fn new(src_port: u16, dst_port: u16) -> Self {
        Self {
            src_port,
            dst_port,
            seq_num: SeqNumber::from(0),
            ack_num: SeqNumber::from(0),
            urg: false,
            ack: false,
            psh: false,
            rst: false,
            syn: false,
            fin: false,
            window_size: 0,
            urgent_pointer: 0,
            options: ArrayVec::new(),
        }
    }

    /// Parses the TCP header at the front of [segment], verifying the
    /// checksum under the pseudo-header for [remote]/[local]. Returns the
    /// header and the payload region computed from the data offset.
    pub fn parse<'a>(local: &Ipv4Addr, remote: &Ipv4Addr, segment: &'a [u8]) -> Result<(Self, &'a [u8]), Fail> {
        if segment.len() < MIN_TCP_HEADER_SIZE {
            return Err(Fail::new(EBADMSG, "TCP segment too small"));
        }
        let data_offset: usize = (segment[12] >> 4) as usize * 4;
        if data_offset < MIN_TCP_HEADER_SIZE {
            return Err(Fail::new(EBADMSG, "TCP data offset too small"));
        }
        if data_offset > MAX_TCP_HEADER_SIZE {
            return Err(Fail::new(EBADMSG, "TCP data offset too large"));
        }
        if segment.len() < data_offset {
            return Err(Fail::new(EBADMSG, "TCP segment smaller than data offset"));
        }

        // Checksum mismatch is indistinguishable from line noise, so the
        // caller drops the segment silently.
        if !checksum::is_valid(remote, local, segment) {
            return Err(Fail::new(EBADMSG, "TCP checksum mismatch"));
        }

        let (hdr_buf, data_buf): (&[u8], &[u8]) = segment.split_at(data_offset);

        let src_port: u16 = u16::from_be_bytes([hdr_buf[0], hdr_buf[1]]);
        let dst_port: u16 = u16::from_be_bytes([hdr_buf[2], hdr_buf[3]]);
        let seq_num: SeqNumber = SeqNumber::from(u32::from_be_bytes([hdr_buf[4], hdr_buf[5], hdr_buf[6], hdr_buf[7]]));
        let ack_num: SeqNumber =
            SeqNumber::from(u32::from_be_bytes([hdr_buf[8], hdr_buf[9], hdr_buf[10], hdr_buf[11]]));

        let urg: bool = (hdr_buf[13] & (1 << 5)) != 0;
        let ack: bool = (hdr_buf[13] & (1 << 4)) != 0;
        let psh: bool = (hdr_buf[13] & (1 << 3)) != 0;
        let rst: bool = (hdr_buf[13] & (1 << 2)) != 0;
        let syn: bool = (hdr_buf[13] & (1 << 1)) != 0;
        let fin: bool = (hdr_buf[13] & (1 << 0)) != 0;

        let window_size: u16 = u16::from_be_bytes([hdr_buf[14], hdr_buf[15]]);
        let urgent_pointer: u16 = u16::from_be_bytes([hdr_buf[18], hdr_buf[19]]);

        let mut options: ArrayVec<TcpOption, MAX_TCP_OPTIONS> = ArrayVec::new();
        let mut option_buf: &[u8] = &hdr_buf[MIN_TCP_HEADER_SIZE..];
        while let Some(&kind) = option_buf.first() {
            match kind {
                0 => break,
                1 => {
                    option_buf = &option_buf[1..];
                    continue;
                },
                _ => {},
            }
            let length: usize = match option_buf.get(1) {
                Some(&length) if (2..=option_buf.len()).contains(&(length as usize)) => length as usize,
                _ => return Err(Fail::new(EBADMSG, "malformed TCP option length")),
            };
            let option: Option<TcpOption> = match kind {
                2 => {
                    if length != 4 {
                        return Err(Fail::new(EBADMSG, "MSS option size was not 4"));
                    }
                    let mss: u16 = u16::from_be_bytes([option_buf[2], option_buf[3]]);
                    Some(TcpOption::MaximumSegmentSize(mss))
                },
                _ => {
                    trace!("ignoring TCP option kind {}", kind);
                    None
                },
            };
            if let Some(option) = option {
                if options.try_push(option).is_err() {
                    return Err(Fail::new(EBADMSG, "too many TCP options provided"));
                }
            }
            option_buf = &option_buf[length..];
        }

        Ok((
            Self {
                src_port,
                dst_port,
                seq_num,
                ack_num,
                urg,
                ack,
                psh,
                rst,
                syn,
                fin,
                window_size,
                urgent_pointer,
                options,
            },
            data_buf,
        ))
    }

    /// Size of this header on the wire: the fixed part plus options, padded
    /// to a 4-byte boundary so the payload stays 32-bit aligned.
    pub fn compute_size(&self) -> usize {
        let mut size: usize = MIN_TCP_HEADER_SIZE;
        for option in &self.options {
            size += option.compute_size();
        }
        // Terminate a non-empty option list.
        if !self.options.is_empty() {
            size += 1;
        }
        (size + 3) & !0x3
    }

    /// Appends this header to [out], leaving the checksum field zeroed. The
    /// segment builder stamps the checksum once the payload is in place.
    pub fn serialize_into(&self, out: &mut Vec<u8>) {
        let header_size: usize = self.compute_size();
        let base: usize = out.len();
        out.resize(base + header_size, 0);
        let hdr_buf: &mut [u8] = &mut out[base..];

        hdr_buf[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        hdr_buf[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        hdr_buf[4..8].copy_from_slice(&u32::from(self.seq_num).to_be_bytes());
        hdr_buf[8..12].copy_from_slice(&u32::from(self.ack_num).to_be_bytes());
        hdr_buf[12] = ((header_size / 4) as u8) << 4;
        hdr_buf[13] = 0;
        if self.urg {
            hdr_buf[13] |= 1 << 5;
        }
        if self.ack {
            hdr_buf[13] |= 1 << 4;
        }
        if self.psh {
            hdr_buf[13] |= 1 << 3;
        }
        if self.rst {
            hdr_buf[13] |= 1 << 2;
        }
        if self.syn {
            hdr_buf[13] |= 1 << 1;
        }
        if self.fin {
            hdr_buf[13] |= 1 << 0;
        }
        hdr_buf[14..16].copy_from_slice(&self.window_size.to_be_bytes());
        // Bytes 16..18 hold the checksum, stamped later.
        hdr_buf[18..20].copy_from_slice(&self.urgent_pointer.to_be_bytes());

        let mut cur_pos: usize = MIN_TCP_HEADER_SIZE;
        for option in &self.options {
            match option {
                TcpOption::EndOfOptionsList => {
                    hdr_buf[cur_pos] = 0;
                },
                TcpOption::NoOperation => {
                    hdr_buf[cur_pos] = 1;
                },
                TcpOption::MaximumSegmentSize(mss) => {
                    hdr_buf[cur_pos] = 2;
                    hdr_buf[cur_pos + 1] = 4;
                    hdr_buf[cur_pos + 2..cur_pos + 4].copy_from_slice(&mss.to_be_bytes());
                },
            }
            cur_pos += option.compute_size();
        }
        // The remainder of the padded region was zeroed by the resize above,
        // which doubles as the "End of options list" terminator.
    }

    /// Returns the MSS option carried by this header, if any.
    pub fn mss(&self) -> Option<u16> {
        self.options.iter().find_map(|option| match option {
            TcpOption::MaximumSegmentSize(mss) => Some(*mss),
            _ => None,
        })
    }

    pub fn push_option(&mut self, option: TcpOption) {
        self.options.push(option);
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::{TcpHeader, TcpOption, MIN_TCP_HEADER_SIZE};
    use crate::protocols::tcp::{checksum, SeqNumber};
    use ::anyhow::Result;
    use ::std::net::Ipv4Addr;

    const LOCAL: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);
    const REMOTE: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 5);

    /// Serializes [header] plus [payload] into a checksummed segment, as the
    /// remote peer would put it on the wire towards LOCAL.
    fn frame(header: &TcpHeader, payload: &[u8]) -> Vec<u8> {
        let mut segment: Vec<u8> = Vec::new();
        header.serialize_into(&mut segment);
        segment.extend_from_slice(payload);
        let checksum: u16 = checksum::tcp_checksum(&REMOTE, &LOCAL, &segment);
        segment[16..18].copy_from_slice(&checksum.to_be_bytes());
        segment
    }

    /// Tests that a serialized header parses back to the same field values
    /// and payload region.
    #[test]
    fn parse_serialized_header() -> Result<()> {
        let mut header: TcpHeader = TcpHeader::new(80, 49152);
        header.seq_num = SeqNumber::from(0x01020304);
        header.ack_num = SeqNumber::from(0x0a0b0c0d);
        header.syn = true;
        header.ack = true;
        header.window_size = 4096;
        header.push_option(TcpOption::MaximumSegmentSize(1450));

        let segment: Vec<u8> = frame(&header, b"payload");
        let (parsed, payload): (TcpHeader, &[u8]) = match TcpHeader::parse(&LOCAL, &REMOTE, &segment) {
            Ok(result) => result,
            Err(e) => anyhow::bail!("parse failed: {:?}", e),
        };

        anyhow::ensure!(parsed.src_port == 80 && parsed.dst_port == 49152);
        anyhow::ensure!(parsed.seq_num == SeqNumber::from(0x01020304));
        anyhow::ensure!(parsed.ack_num == SeqNumber::from(0x0a0b0c0d));
        anyhow::ensure!(parsed.syn && parsed.ack && !parsed.rst && !parsed.fin);
        anyhow::ensure!(parsed.window_size == 4096);
        anyhow::ensure!(parsed.mss() == Some(1450));
        anyhow::ensure!(payload == b"payload");
        Ok(())
    }

    /// Tests that the options region is padded to a 4-byte boundary.
    #[test]
    fn header_size_is_padded() {
        let mut header: TcpHeader = TcpHeader::new(1, 2);
        assert_eq!(header.compute_size(), MIN_TCP_HEADER_SIZE);
        header.push_option(TcpOption::MaximumSegmentSize(536));
        // 20 fixed + 4 MSS + 1 terminator, rounded up to 28.
        assert_eq!(header.compute_size(), 28);
    }

    /// Tests that malformed headers are rejected rather than panicking.
    #[test]
    fn rejects_malformed_segments() {
        // Too short for a header.
        assert!(TcpHeader::parse(&LOCAL, &REMOTE, &[0u8; 12]).is_err());

        // Data offset pointing past the end of the segment.
        let header: TcpHeader = TcpHeader::new(80, 49152);
        let mut segment: Vec<u8> = frame(&header, b"");
        segment[12] = 15 << 4;
        assert!(TcpHeader::parse(&LOCAL, &REMOTE, &segment).is_err());
    }

    /// Tests that a corrupted segment fails checksum verification on parse.
    #[test]
    fn rejects_bad_checksum() {
        let header: TcpHeader = TcpHeader::new(80, 49152);
        let mut segment: Vec<u8> = frame(&header, b"data");
        let last: usize = segment.len() - 1;
        segment[last] ^= 0xFF;
        assert!(TcpHeader::parse(&LOCAL, &REMOTE, &segment).is_err());
    }

    /// Tests that unknown options are skipped and MSS is still found.
    #[test]
    fn skips_unknown_options() -> Result<()> {
        let mut header: TcpHeader = TcpHeader::new(80, 49152);
        header.push_option(TcpOption::MaximumSegmentSize(1400));
        let mut segment: Vec<u8> = frame(&header, b"");

        // Rewrite the options region by hand: NOP, an unknown kind-3 option
        // of length 3, then MSS, then end-of-list.
        segment[12] = 8 << 4; // 32-byte header
        segment.resize(32, 0);
        segment[20] = 1;
        segment[21..24].copy_from_slice(&[3, 3, 7]);
        segment[24] = 2;
        segment[25] = 4;
        segment[26..28].copy_from_slice(&1400u16.to_be_bytes());
        segment[28] = 0;
        segment[16..18].copy_from_slice(&[0, 0]);
        let checksum: u16 = checksum::tcp_checksum(&REMOTE, &LOCAL, &segment);
        segment[16..18].copy_from_slice(&checksum.to_be_bytes());

        let (parsed, _): (TcpHeader, &[u8]) = match TcpHeader::parse(&LOCAL, &REMOTE, &segment) {
            Ok(result) => result,
            Err(e) => anyhow::bail!("parse failed: {:?}", e),
        };
        anyhow::ensure!(parsed.mss() == Some(1400));
        Ok(())
    }
}
