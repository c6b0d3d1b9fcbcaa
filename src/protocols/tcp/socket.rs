// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Application-facing socket operations.
//!
//! A [`TcpSocket`] is one application's handle to at most one connection:
//! active open, byte-stream send/receive, readiness polling, and orderly
//! close. Blocking calls suspend on the endpoint's condition variables and
//! are released by the inbound path or the background driver; in
//! non-blocking mode they return `EWOULDBLOCK` (or `EINPROGRESS` for
//! connect) instead of suspending.

//==============================================================================
// Imports
//==============================================================================

use crate::{
    protocols::tcp::{
        endpoint::{Endpoint, EndpointInner, State},
        peer::PeerInner,
        waiter::{Demand, SelectWaiter},
    },
    runtime::{
        fail::Fail,
        network::{consts::IPV4_TCP_OVERHEAD, NetworkRuntime, Route},
    },
};
use ::libc::{EALREADY, EINPROGRESS, EISCONN, ENOTCONN, EWOULDBLOCK};
use ::std::{
    cmp,
    net::SocketAddrV4,
    sync::{Arc, MutexGuard},
    time::Instant,
};

//==============================================================================
// Structures
//==============================================================================

/// One application's handle to a TCP connection.
pub struct TcpSocket<N: NetworkRuntime> {
    peer: Arc<PeerInner<N>>,
    endpoint: Option<Arc<Endpoint>>,
    nonblocking: bool,
}

//==============================================================================
// Associated Functions
//==============================================================================

impl<N: NetworkRuntime> TcpSocket<N> {
    pub(crate) fn new(peer: Arc<PeerInner<N>>) -> Self {
        Self {
            peer,
            endpoint: None,
            nonblocking: false,
        }
    }

    /// Switches this socket between blocking and non-blocking operation.
    pub fn set_nonblocking(&mut self, nonblocking: bool) {
        self.nonblocking = nonblocking;
        if let Some(endpoint) = &self.endpoint {
            endpoint.lock().nonblocking = nonblocking;
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddrV4> {
        self.endpoint.as_ref().map(|endpoint| endpoint.local())
    }

    pub fn remote_addr(&self) -> Option<SocketAddrV4> {
        self.endpoint.as_ref().map(|endpoint| endpoint.remote())
    }

    /// Takes the pending connection error, if any. Mirrors `SO_ERROR`: the
    /// error is consumed.
    pub fn take_error(&self) -> Option<Fail> {
        self.endpoint.as_ref().and_then(|endpoint| endpoint.lock().error.take())
    }

    /// Actively opens a connection to [remote].
    ///
    /// Blocking sockets suspend until the handshake completes or fails.
    /// Non-blocking sockets return `EINPROGRESS` immediately; completion is
    /// observed via [Self::poll] with [Demand::Write] and [Self::take_error].
    pub fn connect(&mut self, remote: SocketAddrV4) -> Result<(), Fail> {
        if let Some(endpoint) = &self.endpoint {
            let state: State = endpoint.lock().state;
            match state {
                State::SynSent => return Err(Fail::new(EALREADY, "connection establishment in progress")),
                State::Closed => {
                    // A previous attempt failed; start over.
                    self.endpoint = None;
                },
                _ => return Err(Fail::new(EISCONN, "socket is already connected")),
            }
        }

        // The route decides our source address and, via its MTU, the largest
        // MSS this path supports.
        let route: Route = self.peer.transport.route(*remote.ip())?;
        let route_mss: usize = route.mtu.saturating_sub(IPV4_TCP_OVERHEAD);
        let mss: usize = cmp::min(self.peer.config.get_advertised_mss(), route_mss);

        let port: u16 = self.peer.allocate_ephemeral_port(route.local_addr, remote)?;
        let local: SocketAddrV4 = SocketAddrV4::new(route.local_addr, port);
        let isn = self.peer.isn_generator.lock().unwrap().generate(&local, &remote);

        let endpoint: Arc<Endpoint> = Arc::new(Endpoint::new(
            local,
            remote,
            isn,
            mss,
            self.nonblocking,
            &self.peer.config,
            Instant::now(),
        )?);
        self.peer.table.insert(endpoint.clone())?;
        info!("connecting {}->{}", local, remote);

        {
            let inner: MutexGuard<EndpointInner> = endpoint.lock();
            endpoint.emit_syn(&inner, &self.peer.transport)?;
        }
        self.endpoint = Some(endpoint.clone());

        if self.nonblocking {
            return Err(Fail::new(EINPROGRESS, "connection establishment in progress"));
        }

        let mut inner: MutexGuard<EndpointInner> = endpoint.lock();
        while inner.state == State::SynSent {
            inner = endpoint.connect_cond.wait(inner).unwrap();
        }
        if let Some(e) = inner.error.take() {
            return Err(e);
        }
        Ok(())
    }

    /// Queues bytes for transmission, returning how many were accepted.
    ///
    /// Blocking sockets suspend until at least one byte of send-buffer space
    /// frees up; a short count is normal. Transmission itself happens on the
    /// background driver.
    pub fn send(&self, buf: &[u8]) -> Result<usize, Fail> {
        let endpoint: &Arc<Endpoint> = match &self.endpoint {
            Some(endpoint) => endpoint,
            None => return Err(Fail::new(ENOTCONN, "socket is not connected")),
        };
        if buf.is_empty() {
            return Ok(0);
        }

        let mut inner: MutexGuard<EndpointInner> = endpoint.lock();
        loop {
            if !inner.can_send_data() {
                return match inner.error.take() {
                    Some(e) => Err(e),
                    None => Err(Fail::new(ENOTCONN, "connection is not open for sending")),
                };
            }
            let free: usize = inner.tx_free();
            if free > 0 {
                let count: usize = cmp::min(free, buf.len());
                let cursor = inner.tx_tail;
                inner.tx_ring.write(cursor, &buf[..count]);
                inner.tx_tail.advance(count);
                drop(inner);
                // Make the new data eligible without waiting out the tick.
                let _ = self.peer.driver_wake.try_send(());
                return Ok(count);
            }
            if inner.nonblocking {
                return Err(Fail::new(EWOULDBLOCK, "send buffer is full"));
            }
            inner = endpoint.tx_writable.wait(inner).unwrap();
        }
    }

    /// Receives bytes from the connection, returning how many were copied.
    /// Returns zero at end-of-stream, after the peer's FIN and all data
    /// before it have been consumed.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize, Fail> {
        let endpoint: &Arc<Endpoint> = match &self.endpoint {
            Some(endpoint) => endpoint,
            None => return Err(Fail::new(ENOTCONN, "socket is not connected")),
        };
        if buf.is_empty() {
            return Ok(0);
        }

        let mut inner: MutexGuard<EndpointInner> = endpoint.lock();
        loop {
            let unread: usize = inner.rx_unread();
            if unread > 0 {
                let count: usize = cmp::min(unread, buf.len());
                inner.rx_ring.read(inner.rx_read, &mut buf[..count]);
                inner.rx_read.advance(count);
                return Ok(count);
            }
            // Buffered data always drains before end-of-stream is reported.
            if inner.rx_fin {
                return Ok(0);
            }
            if let Some(e) = inner.error.take() {
                return Err(e);
            }
            if inner.state == State::Closed {
                return Err(Fail::new(ENOTCONN, "connection is closed"));
            }
            if inner.nonblocking {
                return Err(Fail::new(EWOULDBLOCK, "no received data available"));
            }
            inner = endpoint.rx_readable.wait(inner).unwrap();
        }
    }

    /// Checks readiness for [demand] without blocking.
    pub fn poll(&self, demand: Demand) -> bool {
        let endpoint: &Arc<Endpoint> = match &self.endpoint {
            Some(endpoint) => endpoint,
            None => return false,
        };
        let inner: MutexGuard<EndpointInner> = endpoint.lock();
        Self::ready(&inner, demand)
    }

    /// Registers [waiter] to be woken when [demand] becomes ready. If the
    /// socket is ready right now the waiter is woken immediately and not
    /// queued; otherwise the returned key deregisters it.
    pub fn register_waiter(&self, demand: Demand, waiter: Arc<SelectWaiter>) -> Result<Option<usize>, Fail> {
        let endpoint: &Arc<Endpoint> = match &self.endpoint {
            Some(endpoint) => endpoint,
            None => return Err(Fail::new(ENOTCONN, "socket is not connected")),
        };
        let mut inner: MutexGuard<EndpointInner> = endpoint.lock();
        if Self::ready(&inner, demand) {
            waiter.wake();
            return Ok(None);
        }
        let key: usize = match demand {
            Demand::Read => inner.read_waiters.register(waiter),
            Demand::Write => inner.write_waiters.register(waiter),
        };
        Ok(Some(key))
    }

    /// Removes a previously registered wait request. A waiter that was
    /// already woken (and thereby released) is gone; that is not an error.
    pub fn deregister_waiter(&self, demand: Demand, key: usize) {
        if let Some(endpoint) = &self.endpoint {
            let mut inner: MutexGuard<EndpointInner> = endpoint.lock();
            match demand {
                Demand::Read => inner.read_waiters.deregister(key),
                Demand::Write => inner.write_waiters.deregister(key),
            };
        }
    }

    /// Initiates an orderly close. Queued data still drains, followed by our
    /// FIN; the endpoint finishes the close handshake in the background.
    pub fn close(&mut self) -> Result<(), Fail> {
        let endpoint: Arc<Endpoint> = match self.endpoint.take() {
            Some(endpoint) => endpoint,
            None => return Ok(()),
        };

        let mut inner: MutexGuard<EndpointInner> = endpoint.lock();
        match inner.state {
            State::SynSent | State::Closed => {
                // Nothing established to shut down; drop the table entry.
                inner.state = State::Closed;
                drop(inner);
                self.peer.table.remove(endpoint.local(), endpoint.remote());
            },
            State::Established => {
                inner.state = State::FinWait1;
                inner.fin_pending = true;
                drop(inner);
                let _ = self.peer.driver_wake.try_send(());
            },
            State::CloseWait => {
                inner.state = State::LastAck;
                inner.fin_pending = true;
                drop(inner);
                let _ = self.peer.driver_wake.try_send(());
            },
            // Already closing; the background machinery finishes the job.
            _ => {},
        }
        Ok(())
    }

    /// Readiness predicate shared by [Self::poll] and waiter registration.
    /// An error or teardown counts as ready in both directions, so blocked
    /// select calls observe the failure.
    fn ready(inner: &EndpointInner, demand: Demand) -> bool {
        if inner.error.is_some() || inner.state == State::Closed {
            return true;
        }
        match demand {
            Demand::Read => inner.rx_unread() > 0 || inner.rx_fin,
            Demand::Write => inner.can_send_data() && inner.tx_free() > 0,
        }
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl<N: NetworkRuntime> Drop for TcpSocket<N> {
    /// An abandoned handle behaves like an orderly close.
    fn drop(&mut self) {
        if self.endpoint.is_some() {
            let _ = self.close();
        }
    }
}
