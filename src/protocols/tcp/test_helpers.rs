// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Test infrastructure: an in-memory IP layer that records every transmitted
//! frame, plus helpers for playing the remote peer's side of a connection.

//==============================================================================
// Imports
//==============================================================================

use crate::{
    protocols::tcp::{
        header::{TcpHeader, TcpOption},
        segment, SeqNumber, TcpPeer, TcpSocket,
    },
    runtime::{
        fail::Fail,
        network::{config::TcpConfig, NetworkRuntime, Route},
    },
};
use ::libc::EINPROGRESS;
use ::std::{
    collections::VecDeque,
    net::{Ipv4Addr, SocketAddrV4},
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

//==============================================================================
// Constants
//==============================================================================

pub const LOCAL_IP: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);
pub const REMOTE_IP: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 5);
pub const REMOTE_PORT: u16 = 80;
pub const TEST_MTU: usize = 1500;

/// The remote peer's initial sequence number in scripted exchanges. (Our own
/// ISN generator always yields zero under test.)
pub const REMOTE_ISN: u32 = 9999;

/// How long helpers wait for the background driver to produce a frame.
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(2);

//==============================================================================
// Structures
//==============================================================================

/// An IP layer that delivers nothing and records everything.
#[derive(Clone)]
pub struct TestRuntime {
    inner: Arc<TestRuntimeInner>,
}

struct TestRuntimeInner {
    local_addr: Ipv4Addr,
    mtu: usize,
    frames: Mutex<VecDeque<(Ipv4Addr, Vec<u8>)>>,
}

//==============================================================================
// Associated Functions
//==============================================================================

impl TestRuntime {
    pub fn new(local_addr: Ipv4Addr, mtu: usize) -> Self {
        Self {
            inner: Arc::new(TestRuntimeInner {
                local_addr,
                mtu,
                frames: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Takes the oldest recorded frame, if any.
    pub fn pop_frame(&self) -> Option<(Ipv4Addr, Vec<u8>)> {
        self.inner.frames.lock().unwrap().pop_front()
    }

    /// Waits for the engine (typically its background driver) to transmit a
    /// frame, polling until [timeout] elapses.
    pub fn wait_frame(&self, timeout: Duration) -> Option<(Ipv4Addr, Vec<u8>)> {
        let deadline: Instant = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.pop_frame() {
                return Some(frame);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl NetworkRuntime for TestRuntime {
    fn transmit(&self, remote: Ipv4Addr, frame: Vec<u8>) -> Result<(), Fail> {
        self.inner.frames.lock().unwrap().push_back((remote, frame));
        Ok(())
    }

    fn route(&self, _remote: Ipv4Addr) -> Result<Route, Fail> {
        Ok(Route {
            local_addr: self.inner.local_addr,
            mtu: self.inner.mtu,
        })
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

/// Builds an engine instance on a fresh recording runtime.
pub fn test_engine(config: TcpConfig) -> (TcpPeer<TestRuntime>, TestRuntime) {
    crate::runtime::logging::initialize();
    let runtime: TestRuntime = TestRuntime::new(LOCAL_IP, TEST_MTU);
    let peer: TcpPeer<TestRuntime> = TcpPeer::new(runtime.clone(), config).unwrap();
    (peer, runtime)
}

/// Parses a frame our stack transmitted, as the remote peer would see it.
pub fn parse_ours(frame: &[u8]) -> (TcpHeader, Vec<u8>) {
    let (header, payload): (TcpHeader, &[u8]) = TcpHeader::parse(&REMOTE_IP, &LOCAL_IP, frame).unwrap();
    (header, payload.to_vec())
}

/// Frames a segment from the remote peer towards our stack, checksummed for
/// that direction.
pub fn peer_frame(header: &TcpHeader, payload: Option<&[u8]>) -> Vec<u8> {
    segment::build(header, payload, &REMOTE_IP, &LOCAL_IP).unwrap()
}

/// A bare header for a segment from the remote peer to our [local_port].
pub fn peer_header(local_port: u16) -> TcpHeader {
    TcpHeader::new(REMOTE_PORT, local_port)
}

/// A fully populated header for an in-sequence segment from the remote peer:
/// sequence/acknowledgement numbers as given, a wide-open window.
pub fn peer_segment_header(local_port: u16, seq_num: u32, ack_num: u32) -> TcpHeader {
    let mut header: TcpHeader = peer_header(local_port);
    header.ack = true;
    header.seq_num = SeqNumber::from(seq_num);
    header.ack_num = SeqNumber::from(ack_num);
    header.window_size = u16::MAX;
    header
}

/// Runs a non-blocking active open through the handshake: connect, harvest
/// our SYN, answer with the peer's SYN+ACK, and swallow our final ACK.
/// Returns the connected socket and its local port.
pub fn established_socket(peer: &TcpPeer<TestRuntime>, runtime: &TestRuntime) -> (TcpSocket<TestRuntime>, u16) {
    established_socket_with_window(peer, runtime, u16::MAX)
}

/// Like [established_socket], with the peer advertising [window] in its
/// SYN+ACK.
pub fn established_socket_with_window(
    peer: &TcpPeer<TestRuntime>,
    runtime: &TestRuntime,
    window: u16,
) -> (TcpSocket<TestRuntime>, u16) {
    let mut socket: TcpSocket<TestRuntime> = peer.socket();
    socket.set_nonblocking(true);
    let remote: SocketAddrV4 = SocketAddrV4::new(REMOTE_IP, REMOTE_PORT);
    match socket.connect(remote) {
        Err(Fail { errno: EINPROGRESS, .. }) => {},
        other => panic!("expected EINPROGRESS, got {:?}", other),
    }
    let local_port: u16 = socket.local_addr().unwrap().port();

    let (_, syn_frame): (Ipv4Addr, Vec<u8>) = runtime.wait_frame(FRAME_TIMEOUT).expect("no SYN transmitted");
    let (syn, _): (TcpHeader, Vec<u8>) = parse_ours(&syn_frame);
    assert!(syn.syn && !syn.ack);

    let mut syn_ack: TcpHeader = peer_header(local_port);
    syn_ack.syn = true;
    syn_ack.ack = true;
    syn_ack.seq_num = SeqNumber::from(REMOTE_ISN);
    syn_ack.ack_num = syn.seq_num + SeqNumber::from(1);
    syn_ack.window_size = window;
    // Advertise an MSS matching ours so segments are not clipped to the
    // 536-byte RFC 1122 fallback.
    syn_ack.push_option(TcpOption::MaximumSegmentSize(TEST_MTU as u16 - 40));
    peer.receive(REMOTE_IP, LOCAL_IP, &peer_frame(&syn_ack, None)).unwrap();

    // The handshake-completing ACK.
    let (_, ack_frame): (Ipv4Addr, Vec<u8>) = runtime.wait_frame(FRAME_TIMEOUT).expect("no handshake ACK");
    let (ack, _): (TcpHeader, Vec<u8>) = parse_ours(&ack_frame);
    assert!(ack.ack && !ack.syn);
    assert_eq!(ack.ack_num, SeqNumber::from(REMOTE_ISN + 1));

    (socket, local_port)
}
