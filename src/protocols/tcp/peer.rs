// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The TCP engine instance.
//!
//! A [`TcpPeer`] owns everything one stack instance needs: the connection
//! table, the configuration, the ISN generator, and the channel that wakes
//! the background driver. All state hangs off one reference-counted inner
//! object; nothing is process-global, so independent instances coexist in
//! one process (and in tests).
//!
//! The background driver holds only a weak reference to the inner object and
//! exits once every peer and socket handle is gone.

//==============================================================================
// Imports
//==============================================================================

use crate::{
    protocols::tcp::{
        background,
        endpoint::Disposition,
        header::TcpHeader,
        isn_generator::IsnGenerator,
        segment,
        socket::TcpSocket,
        table::EndpointTable,
    },
    runtime::{
        fail::Fail,
        network::{config::TcpConfig, consts::EPHEMERAL_PORT_RANGE, NetworkRuntime},
    },
};
use ::crossbeam_channel::{Receiver, Sender};
use ::libc::EADDRINUSE;
use ::rand::{rngs::SmallRng, Rng, SeedableRng};
use ::std::{
    net::{Ipv4Addr, SocketAddrV4},
    sync::{Arc, Mutex, Weak},
    thread,
    time::Instant,
};

//==============================================================================
// Constants
//==============================================================================

/// Attempts at drawing an unused ephemeral port before giving up.
const EPHEMERAL_PORT_ATTEMPTS: usize = 64;

//==============================================================================
// Structures
//==============================================================================

/// A handle to a TCP engine instance. Cheap to clone; every clone refers to
/// the same connection table and driver.
pub struct TcpPeer<N: NetworkRuntime> {
    inner: Arc<PeerInner<N>>,
}

/// The shared state behind a [TcpPeer] and its sockets.
pub(crate) struct PeerInner<N: NetworkRuntime> {
    pub transport: N,
    pub config: TcpConfig,
    pub table: EndpointTable,
    pub isn_generator: Mutex<IsnGenerator>,
    pub rng: Mutex<SmallRng>,
    /// Kicks the background driver out of its tick sleep, e.g. when new data
    /// is queued or a zero window reopens. A single slot is enough: a wake
    /// already pending covers every wake that arrives before the next pass,
    /// so senders never block and never pile up messages.
    pub driver_wake: Sender<()>,
}

//==============================================================================
// Associated Functions
//==============================================================================

impl<N: NetworkRuntime> TcpPeer<N> {
    /// Instantiates an engine on top of [transport] and spawns its background
    /// driver thread.
    pub fn new(transport: N, config: TcpConfig) -> Result<Self, Fail> {
        let mut rng: SmallRng = SmallRng::from_entropy();
        let nonce: u32 = rng.gen();
        let (driver_wake, wake_rx): (Sender<()>, Receiver<()>) = crossbeam_channel::bounded(1);

        let inner: Arc<PeerInner<N>> = Arc::new(PeerInner {
            transport,
            config,
            table: EndpointTable::default(),
            isn_generator: Mutex::new(IsnGenerator::new(nonce)),
            rng: Mutex::new(rng),
            driver_wake,
        });

        let weak: Weak<PeerInner<N>> = Arc::downgrade(&inner);
        thread::Builder::new()
            .name("tcpstack-driver".to_string())
            .spawn(move || background::driver_loop(weak, wake_rx))?;

        Ok(Self { inner })
    }

    /// Creates an unconnected socket on this engine.
    pub fn socket(&self) -> TcpSocket<N> {
        TcpSocket::new(self.inner.clone())
    }

    /// Entry point for inbound TCP segments, called by the IP layer with the
    /// addresses from the IP header and the raw TCP segment.
    ///
    /// Malformed segments and checksum failures are dropped silently, like
    /// line noise. Segments addressed to no live endpoint draw a reset.
    pub fn receive(&self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr, segment: &[u8]) -> Result<(), Fail> {
        let (header, payload): (TcpHeader, &[u8]) = match TcpHeader::parse(&dst_ip, &src_ip, segment) {
            Ok(result) => result,
            Err(e) => {
                warn!("dropping malformed segment from {}: {:?}", src_ip, e);
                return Ok(());
            },
        };

        let local: SocketAddrV4 = SocketAddrV4::new(dst_ip, header.dst_port);
        let remote: SocketAddrV4 = SocketAddrV4::new(src_ip, header.src_port);

        let endpoint = match self.inner.table.lookup(local, remote) {
            Some(endpoint) => endpoint,
            None => {
                debug!("no endpoint for {}->{}, resetting", remote, local);
                if let Some(frame) = segment::build_rst_for(&header, &dst_ip, &src_ip)? {
                    self.inner.transport.transmit(src_ip, frame)?;
                }
                return Ok(());
            },
        };

        match endpoint.process(
            &header,
            payload,
            &self.inner.transport,
            &self.inner.driver_wake,
            Instant::now(),
        ) {
            Ok(Disposition::Keep) => {},
            Ok(Disposition::Remove) => {
                self.inner.table.remove(local, remote);
            },
            Err(e) => {
                // Protocol violations from the peer drop the offending
                // segment, never the connection.
                warn!("dropping segment from {}: {:?}", remote, e);
            },
        }
        Ok(())
    }
}

impl<N: NetworkRuntime> PeerInner<N> {
    /// Draws an unused ephemeral port for a connection from [local_ip] to
    /// [remote].
    pub fn allocate_ephemeral_port(&self, local_ip: Ipv4Addr, remote: SocketAddrV4) -> Result<u16, Fail> {
        let mut rng = self.rng.lock().unwrap();
        for _ in 0..EPHEMERAL_PORT_ATTEMPTS {
            let port: u16 = rng.gen_range(EPHEMERAL_PORT_RANGE);
            if !self.table.contains(SocketAddrV4::new(local_ip, port), remote) {
                return Ok(port);
            }
        }
        Err(Fail::new(EADDRINUSE, "could not allocate an ephemeral port"))
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl<N: NetworkRuntime> Clone for TcpPeer<N> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}
