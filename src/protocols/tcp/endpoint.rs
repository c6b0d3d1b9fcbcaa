// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! One TCP connection's state and buffers.
//!
//! An endpoint is uniquely keyed by its 4-tuple and owns the full connection
//! state: the state machine position, the sequence-space counters, the TX and
//! RX rings with their cursors, the per-purpose timer slots, and the RTO
//! estimator. All of it lives behind one mutex; the condition variables next
//! to it are the suspension points for blocking connect/send/receive.
//!
//! The inbound dispatcher, the background driver, and application threads all
//! converge here. Methods that emit segments do so while holding the
//! endpoint's lock, which is permitted by the locking discipline (the table
//! lock, by contrast, is never held across segment I/O).

//==============================================================================
// Imports
//==============================================================================

use crate::{
    collections::ring::{Cursor, RingBuffer},
    protocols::tcp::{
        header::{TcpHeader, TcpOption},
        rto::RtoCalculator,
        segment,
        waiter::WaiterQueue,
        SeqNumber,
    },
    runtime::{
        fail::Fail,
        network::{config::TcpConfig, NetworkRuntime},
        timer::{TimerKind, TimerSet},
    },
};
use ::crossbeam_channel::Sender;
use ::libc::{EBADMSG, ECONNREFUSED, ECONNRESET, EPROTO, ETIMEDOUT};
use ::std::{
    cmp,
    fmt,
    net::SocketAddrV4,
    sync::{Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

//==============================================================================
// Structures
//==============================================================================

/// Connection state machine states.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum State {
    Closed,
    SynSent,
    Established,
    FinWait1,
    FinWait2,
    Closing,
    TimeWait,
    CloseWait,
    LastAck,
}

/// What the caller should do with the endpoint's table entry afterwards.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Disposition {
    Keep,
    Remove,
}

/// The lock-protected portion of an endpoint.
pub(crate) struct EndpointInner {
    pub state: State,
    pub nonblocking: bool,
    /// Connection-error slot: timeout/refusal/reset stored here and surfaced
    /// on the next blocking call or wakeup.
    pub error: Option<Fail>,

    /// Effective maximum segment size for data we send.
    pub mss: usize,
    /// MSS we advertise in our SYN (what our receive path accepts).
    pub local_mss: usize,

    //
    // Send sequence space. `send_unacked` is SND.UNA, `send_next` is SND.NXT,
    // and `send_window` is SND.WND. The TX ring between `tx_unacked` and
    // `tx_next` is the retransmission queue; between `tx_next` and `tx_tail`
    // lies data queued but not yet on the wire. SYN and FIN occupy sequence
    // numbers but no ring bytes.
    //
    pub send_unacked: SeqNumber,
    pub send_next: SeqNumber,
    pub send_window: u32,
    pub tx_ring: RingBuffer,
    pub tx_unacked: Cursor,
    pub tx_next: Cursor,
    pub tx_tail: Cursor,
    /// `close()` was called; the driver emits our FIN once the ring drains.
    pub fin_pending: bool,
    /// Our FIN is on the wire and occupies `send_next - 1`.
    pub fin_sent: bool,

    //
    // Receive sequence space. Only the in-order prefix is accepted; what does
    // not fit in free ring space is left for the peer to resend.
    //
    pub recv_next: SeqNumber,
    pub rx_ring: RingBuffer,
    pub rx_read: Cursor,
    pub rx_write: Cursor,
    /// The peer's FIN was consumed: `recv` reports end-of-stream once the
    /// ring drains.
    pub rx_fin: bool,

    pub timers: TimerSet,
    pub rto: RtoCalculator,
    /// In-flight RTT measurement: the ack that completes it, and when the
    /// sampled segment went out. Cleared on retransmission (Karn's rule).
    pub rtt_sample: Option<(SeqNumber, Instant)>,
    /// Remaining SYN retransmissions and the current (backed-off) timeout.
    pub handshake_retries_left: usize,
    pub handshake_timeout: Duration,
    /// How long a closed connection lingers in TIME_WAIT (2*MSL).
    pub time_wait_hold: Duration,

    pub read_waiters: WaiterQueue,
    pub write_waiters: WaiterQueue,
}

/// One TCP connection. Shared between the endpoint table (the canonical
/// owner), socket handles, and the inbound/driver paths via `Arc`.
pub(crate) struct Endpoint {
    local: SocketAddrV4,
    remote: SocketAddrV4,
    inner: Mutex<EndpointInner>,
    /// Signalled when unread received data appears (or the stream ends).
    pub rx_readable: Condvar,
    /// Signalled when TX ring space frees up (or the connection fails).
    pub tx_writable: Condvar,
    /// Signalled when the handshake completes or fails; blocking `connect`
    /// suspends here.
    pub connect_cond: Condvar,
}

//==============================================================================
// Associated Functions
//==============================================================================

impl EndpointInner {
    /// Bytes queued but not yet transmitted.
    pub fn tx_unsent(&self) -> usize {
        self.tx_ring.distance(self.tx_next, self.tx_tail)
    }

    /// Bytes transmitted but not yet acknowledged (ring bytes only).
    pub fn tx_inflight(&self) -> usize {
        self.tx_ring.distance(self.tx_unacked, self.tx_next)
    }

    /// Free TX ring space. Unacknowledged bytes still occupy the ring, since
    /// they may need to be retransmitted.
    pub fn tx_free(&self) -> usize {
        self.tx_ring.capacity() - self.tx_ring.distance(self.tx_unacked, self.tx_tail)
    }

    /// Received bytes not yet consumed by the application.
    pub fn rx_unread(&self) -> usize {
        self.rx_ring.distance(self.rx_read, self.rx_write)
    }

    /// The receive window to advertise: free RX space, clamped to 16 bits.
    pub fn advertised_window(&self) -> u16 {
        let free: usize = self.rx_ring.capacity() - self.rx_unread();
        cmp::min(free, u16::MAX as usize) as u16
    }

    /// May new application data be queued/transmitted in this state?
    pub fn can_send_data(&self) -> bool {
        matches!(self.state, State::Established | State::CloseWait)
    }

    /// May inbound data still be accepted in this state?
    fn can_recv_data(&self) -> bool {
        matches!(self.state, State::Established | State::FinWait1 | State::FinWait2)
    }
}

impl Endpoint {
    /// Creates an endpoint in SYN_SENT, with the SYN occupying the first
    /// sequence number and the handshake timer armed.
    pub fn new(
        local: SocketAddrV4,
        remote: SocketAddrV4,
        isn: SeqNumber,
        mss: usize,
        nonblocking: bool,
        config: &TcpConfig,
        now: Instant,
    ) -> Result<Self, Fail> {
        let mut timers: TimerSet = TimerSet::new(now);
        timers.arm(TimerKind::Handshake, now + config.get_handshake_timeout());

        Ok(Self {
            local,
            remote,
            inner: Mutex::new(EndpointInner {
                state: State::SynSent,
                nonblocking,
                error: None,
                mss,
                local_mss: mss,
                send_unacked: isn,
                send_next: isn + SeqNumber::from(1),
                send_window: 0,
                tx_ring: RingBuffer::new(config.get_send_ring_size())?,
                tx_unacked: Cursor::default(),
                tx_next: Cursor::default(),
                tx_tail: Cursor::default(),
                fin_pending: false,
                fin_sent: false,
                recv_next: SeqNumber::from(0),
                rx_ring: RingBuffer::new(config.get_recv_ring_size())?,
                rx_read: Cursor::default(),
                rx_write: Cursor::default(),
                rx_fin: false,
                timers,
                rto: RtoCalculator::new(),
                rtt_sample: None,
                handshake_retries_left: config.get_handshake_retries().saturating_sub(1),
                handshake_timeout: config.get_handshake_timeout(),
                time_wait_hold: 2 * config.get_msl(),
                read_waiters: WaiterQueue::default(),
                write_waiters: WaiterQueue::default(),
            }),
            rx_readable: Condvar::new(),
            tx_writable: Condvar::new(),
            connect_cond: Condvar::new(),
        })
    }

    pub fn local(&self) -> SocketAddrV4 {
        self.local
    }

    pub fn remote(&self) -> SocketAddrV4 {
        self.remote
    }

    pub fn lock(&self) -> MutexGuard<'_, EndpointInner> {
        self.inner.lock().unwrap()
    }

    /// Header template for segments derived from current state: cumulative
    /// ack and the advertised receive window are always carried.
    fn header_template(&self, inner: &EndpointInner) -> TcpHeader {
        let mut header: TcpHeader = TcpHeader::new(self.local.port(), self.remote.port());
        header.seq_num = inner.send_next;
        header.ack = true;
        header.ack_num = inner.recv_next;
        header.window_size = inner.advertised_window();
        header
    }

    /// Builds and hands one segment to the IP layer.
    fn emit<N: NetworkRuntime>(&self, transport: &N, header: &TcpHeader, payload: Option<&[u8]>) -> Result<(), Fail> {
        debug!(
            "emit: {}->{} seq={} ack={} len={}",
            self.local,
            self.remote,
            header.seq_num,
            header.ack_num,
            payload.map_or(0, <[u8]>::len)
        );
        let frame: Vec<u8> = segment::build(header, payload, self.local.ip(), self.remote.ip())?;
        transport.transmit(*self.remote.ip(), frame)
    }

    /// (Re)transmits our SYN, carrying the MSS option.
    pub fn emit_syn<N: NetworkRuntime>(&self, inner: &EndpointInner, transport: &N) -> Result<(), Fail> {
        let mut header: TcpHeader = TcpHeader::new(self.local.port(), self.remote.port());
        header.syn = true;
        header.seq_num = inner.send_unacked;
        header.window_size = inner.advertised_window();
        header.push_option(TcpOption::MaximumSegmentSize(cmp::min(inner.local_mss, u16::MAX as usize) as u16));
        self.emit(transport, &header, None)
    }

    /// Fails the connection: stores [error] in the connection's error slot,
    /// moves to CLOSED, and releases everyone blocked on this endpoint.
    fn abort(&self, inner: &mut EndpointInner, error: Fail) -> Disposition {
        inner.error = Some(error);
        inner.state = State::Closed;
        inner.timers.disarm(TimerKind::Handshake);
        inner.timers.disarm(TimerKind::Retransmit);
        inner.read_waiters.wake_all();
        inner.write_waiters.wake_all();
        self.rx_readable.notify_all();
        self.tx_writable.notify_all();
        self.connect_cond.notify_all();
        Disposition::Remove
    }

    /// Dispatches one validated inbound segment to the state handler. The
    /// caller holds no locks; the endpoint's own lock is taken here.
    pub fn process<N: NetworkRuntime>(
        &self,
        header: &TcpHeader,
        payload: &[u8],
        transport: &N,
        driver_wake: &Sender<()>,
        now: Instant,
    ) -> Result<Disposition, Fail> {
        let mut inner: MutexGuard<EndpointInner> = self.lock();
        match inner.state {
            State::SynSent => self.process_syn_sent(&mut inner, header, transport),
            State::Closed => {
                // Lost the race against teardown; the table entry is gone or
                // going. Nothing to do.
                trace!("segment for closed endpoint {}->{}", self.remote, self.local);
                Ok(Disposition::Keep)
            },
            _ => self.process_connected(&mut inner, header, payload, transport, driver_wake, now),
        }
    }

    /// SYN_SENT: waiting for the peer's SYN+ACK.
    fn process_syn_sent<N: NetworkRuntime>(
        &self,
        inner: &mut EndpointInner,
        header: &TcpHeader,
        transport: &N,
    ) -> Result<Disposition, Fail> {
        // The peer refused us.
        if header.rst {
            info!("connection refused by {}", self.remote);
            return Ok(self.abort(inner, Fail::new(ECONNREFUSED, "connection refused")));
        }

        // Anything but a SYN+ACK for our ISN is a protocol violation: answer
        // with a reset and give up on the attempt.
        if !(header.syn && header.ack && header.ack_num == inner.send_next) {
            warn!(
                "unexpected segment while SYN_SENT: syn={} ack={} ack_num={} expected={}",
                header.syn, header.ack, header.ack_num, inner.send_next
            );
            if let Some(frame) = segment::build_rst_for(header, self.local.ip(), self.remote.ip())? {
                transport.transmit(*self.remote.ip(), frame)?;
            }
            return Ok(self.abort(inner, Fail::new(EPROTO, "unexpected segment during handshake")));
        }

        // Negotiate the effective send MSS: the peer's advertised MSS when
        // present, the protocol fallback otherwise, never above what the
        // route supports.
        let peer_mss: usize = header.mss().map_or(crate::runtime::network::consts::FALLBACK_MSS, usize::from);
        inner.mss = cmp::min(inner.mss, peer_mss);

        inner.send_unacked = header.ack_num;
        inner.send_window = header.window_size as u32;
        inner.recv_next = header.seq_num + SeqNumber::from(1);
        inner.state = State::Established;
        inner.error = None;
        inner.timers.disarm(TimerKind::Handshake);
        debug!(
            "established {}->{}: mss={} window={}",
            self.local, self.remote, inner.mss, inner.send_window
        );

        // Complete the handshake with an ACK.
        let ack: TcpHeader = self.header_template(inner);
        self.emit(transport, &ack, None)?;

        // Release the blocked connector, or the write-waiters of a
        // non-blocking connect.
        self.connect_cond.notify_all();
        inner.write_waiters.wake_all();
        self.tx_writable.notify_all();
        Ok(Disposition::Keep)
    }

    /// Post-handshake states: acknowledgement, data, and FIN processing.
    fn process_connected<N: NetworkRuntime>(
        &self,
        inner: &mut EndpointInner,
        header: &TcpHeader,
        payload: &[u8],
        transport: &N,
        driver_wake: &Sender<()>,
        now: Instant,
    ) -> Result<Disposition, Fail> {
        if header.rst {
            info!("connection reset by {}", self.remote);
            return Ok(self.abort(inner, Fail::new(ECONNRESET, "connection reset by peer")));
        }
        if header.syn {
            // No passive or simultaneous open here.
            warn!("stray SYN on connected endpoint {}->{}", self.remote, self.local);
            return Ok(Disposition::Keep);
        }

        let mut disposition: Disposition = Disposition::Keep;

        if header.ack && inner.state != State::TimeWait {
            disposition = self.process_ack(inner, header, driver_wake, now)?;
        }

        // Accept the in-order prefix of the payload, no more than free RX
        // space allows; the remainder is left for the peer to resend.
        let mut should_ack: bool = !payload.is_empty();
        if !payload.is_empty() && inner.can_recv_data() && header.seq_num == inner.recv_next {
            let free: usize = inner.rx_ring.capacity() - inner.rx_unread();
            let accepted: usize = cmp::min(free, payload.len());
            if accepted > 0 {
                let cursor: Cursor = inner.rx_write;
                inner.rx_ring.write(cursor, &payload[..accepted]);
                inner.rx_write.advance(accepted);
                inner.recv_next = inner.recv_next + SeqNumber::from(accepted as u32);
                inner.read_waiters.wake_all();
                self.rx_readable.notify_all();
            }
            if accepted < payload.len() {
                debug!("RX ring full: accepted {} of {} bytes", accepted, payload.len());
            }
        }

        // A FIN is consumed only when it is next in sequence, i.e. every
        // payload byte before it was accepted.
        if header.fin && header.seq_num + SeqNumber::from(payload.len() as u32) == inner.recv_next {
            should_ack = true;
            if !inner.rx_fin {
                inner.rx_fin = true;
                inner.recv_next = inner.recv_next + SeqNumber::from(1);
                match inner.state {
                    State::Established => inner.state = State::CloseWait,
                    State::FinWait1 => inner.state = State::Closing,
                    State::FinWait2 => {
                        inner.state = State::TimeWait;
                        let hold: Duration = inner.time_wait_hold;
                        inner.timers.arm(TimerKind::TimeWait, now + hold);
                    },
                    _ => {},
                }
                debug!("peer FIN consumed, state={:?}", inner.state);
                // End-of-stream counts as readable.
                inner.read_waiters.wake_all();
                self.rx_readable.notify_all();
            }
        } else if header.fin {
            // Out-of-order FIN: ack what we do have.
            should_ack = true;
        }

        // Acknowledge exactly the bytes accepted.
        if should_ack {
            let ack: TcpHeader = self.header_template(inner);
            self.emit(transport, &ack, None)?;
        }

        Ok(disposition)
    }

    /// Applies an acknowledgement to the send sequence space.
    fn process_ack(
        &self,
        inner: &mut EndpointInner,
        header: &TcpHeader,
        driver_wake: &Sender<()>,
        now: Instant,
    ) -> Result<Disposition, Fail> {
        // Acknowledging data we never sent: a malicious or buggy peer can
        // produce this deliberately, so it is an explicit error, not an
        // assertion.
        if header.ack_num > inner.send_next {
            return Err(Fail::new(EBADMSG, "acknowledged more data than is outstanding"));
        }

        if header.ack_num > inner.send_unacked {
            let acked: u32 = (header.ack_num - inner.send_unacked).into();
            // SYN and FIN occupy sequence numbers but no ring bytes.
            let ring_acked: usize = cmp::min(acked as usize, inner.tx_inflight());
            inner.tx_unacked.advance(ring_acked);
            inner.send_unacked = header.ack_num;

            // Complete the RTT measurement if this ack covers it.
            if let Some((sample_seq, sent_at)) = inner.rtt_sample {
                if header.ack_num >= sample_seq {
                    inner.rto.add_sample(now - sent_at);
                    inner.rtt_sample = None;
                }
            }

            if ring_acked > 0 {
                // TX space freed: release blocked writers.
                inner.write_waiters.wake_all();
                self.tx_writable.notify_all();
            }

            if inner.send_unacked == inner.send_next {
                // Everything in flight is acknowledged.
                inner.timers.disarm(TimerKind::Retransmit);
            } else {
                // Forward progress: restart the retransmission timer.
                let rto: Duration = inner.rto.rto();
                inner.timers.arm(TimerKind::Retransmit, now + rto);
            }
        }

        // Track the peer's advertised window, net of what is still in
        // flight; a reopened window makes queued data eligible, so kick the
        // driver.
        let inflight: u32 = (inner.send_next - inner.send_unacked).into();
        let old_window: u32 = inner.send_window;
        inner.send_window = (header.window_size as u32).saturating_sub(inflight);
        if old_window == 0 && inner.send_window > 0 {
            let _ = driver_wake.try_send(());
        }

        // Has our FIN been acknowledged?
        if inner.fin_sent && header.ack_num == inner.send_next {
            match inner.state {
                State::FinWait1 => inner.state = State::FinWait2,
                State::Closing => {
                    inner.state = State::TimeWait;
                    let hold: Duration = inner.time_wait_hold;
                    inner.timers.arm(TimerKind::TimeWait, now + hold);
                },
                State::LastAck => {
                    inner.state = State::Closed;
                    debug!("close handshake complete {}->{}", self.local, self.remote);
                    return Ok(Disposition::Remove);
                },
                _ => {},
            }
        }

        Ok(Disposition::Keep)
    }

    /// Transmits queued data while unsent bytes and window remain, then our
    /// FIN if one is pending and the ring has drained. Called by the
    /// background driver; also directly after a send on an uncontended
    /// window.
    pub fn drive_transmit<N: NetworkRuntime>(&self, transport: &N, now: Instant) -> Result<(), Fail> {
        let mut inner: MutexGuard<EndpointInner> = self.lock();
        if !matches!(
            inner.state,
            State::Established | State::CloseWait | State::FinWait1 | State::LastAck
        ) {
            return Ok(());
        }

        // Transmission only occurs while window remains and unsent data
        // exists; each pass moves at most one MSS.
        loop {
            let unsent: usize = inner.tx_unsent();
            let window_room: usize = inner.send_window as usize;
            let len: usize = cmp::min(cmp::min(unsent, window_room), inner.mss);
            if len == 0 {
                break;
            }

            let mut chunk: Vec<u8> = vec![0u8; len];
            inner.tx_ring.read(inner.tx_next, &mut chunk);

            let mut header: TcpHeader = self.header_template(&inner);
            header.psh = true;
            self.emit(transport, &header, Some(&chunk))?;

            inner.tx_next.advance(len);
            inner.send_next = inner.send_next + SeqNumber::from(len as u32);
            inner.send_window -= len as u32;

            // One RTT measurement in flight at a time.
            if inner.rtt_sample.is_none() {
                inner.rtt_sample = Some((inner.send_next, now));
            }
            if !inner.timers.is_armed(TimerKind::Retransmit) {
                let rto: Duration = inner.rto.rto();
                inner.timers.arm(TimerKind::Retransmit, now + rto);
            }
        }

        // The FIN goes out only after every queued byte has.
        if inner.fin_pending && !inner.fin_sent && inner.tx_unsent() == 0 {
            let mut header: TcpHeader = self.header_template(&inner);
            header.fin = true;
            self.emit(transport, &header, None)?;
            inner.fin_sent = true;
            inner.send_next = inner.send_next + SeqNumber::from(1);
            let rto: Duration = inner.rto.rto();
            inner.timers.arm(TimerKind::Retransmit, now + rto);
            debug!("FIN sent {}->{}, state={:?}", self.local, self.remote, inner.state);
        }

        Ok(())
    }

    /// Dispatches expired timers. Timer identity is a tagged kind, matched
    /// exhaustively.
    pub fn dispatch_timers<N: NetworkRuntime>(&self, transport: &N, now: Instant) -> Result<Disposition, Fail> {
        let mut inner: MutexGuard<EndpointInner> = self.lock();
        let expired: Vec<TimerKind> = inner.timers.take_expired(now).collect();
        for kind in expired {
            match kind {
                TimerKind::Handshake => {
                    if inner.state != State::SynSent {
                        continue;
                    }
                    if inner.handshake_retries_left == 0 {
                        info!("handshake timed out towards {}", self.remote);
                        return Ok(self.abort(&mut inner, Fail::new(ETIMEDOUT, "connection handshake timed out")));
                    }
                    inner.handshake_retries_left -= 1;
                    inner.handshake_timeout *= 2;
                    let timeout: Duration = inner.handshake_timeout;
                    inner.timers.arm(TimerKind::Handshake, now + timeout);
                    debug!("retransmitting SYN towards {}", self.remote);
                    self.emit_syn(&inner, transport)?;
                },
                TimerKind::Retransmit => {
                    let inflight: usize = inner.tx_inflight();
                    if inflight > 0 {
                        // RFC 6298: retransmit the earliest unacknowledged
                        // segment and back the timer off.
                        let len: usize = cmp::min(inflight, inner.mss);
                        let mut chunk: Vec<u8> = vec![0u8; len];
                        inner.tx_ring.read(inner.tx_unacked, &mut chunk);
                        let mut header: TcpHeader = self.header_template(&inner);
                        header.seq_num = inner.send_unacked;
                        header.psh = true;
                        debug!("retransmitting {} bytes at seq {}", len, header.seq_num);
                        self.emit(transport, &header, Some(&chunk))?;
                    } else if inner.fin_sent
                        && matches!(inner.state, State::FinWait1 | State::Closing | State::LastAck)
                    {
                        let mut header: TcpHeader = self.header_template(&inner);
                        header.fin = true;
                        header.seq_num = inner.send_next - SeqNumber::from(1);
                        debug!("retransmitting FIN at seq {}", header.seq_num);
                        self.emit(transport, &header, None)?;
                    } else {
                        continue;
                    }
                    // A retransmitted segment must not produce an RTT sample.
                    inner.rtt_sample = None;
                    inner.rto.back_off();
                    let rto: Duration = inner.rto.rto();
                    inner.timers.arm(TimerKind::Retransmit, now + rto);
                },
                TimerKind::TimeWait => {
                    if inner.state == State::TimeWait {
                        inner.state = State::Closed;
                        debug!("TIME_WAIT expired {}->{}", self.local, self.remote);
                        return Ok(Disposition::Remove);
                    }
                },
            }
        }
        Ok(Disposition::Keep)
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner: MutexGuard<EndpointInner> = self.lock();
        f.debug_struct("Endpoint")
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("state", &inner.state)
            .field("send_unacked", &inner.send_unacked)
            .field("send_next", &inner.send_next)
            .field("send_window", &inner.send_window)
            .field("recv_next", &inner.recv_next)
            .finish()
    }
}
