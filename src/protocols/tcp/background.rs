// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The background driver.
//!
//! One thread per engine instance. Each pass snapshots the connection table,
//! then per endpoint transmits eligible queued data and dispatches expired
//! timers. Between passes it sleeps for the configured tick, unless a sender
//! wakes it early because new data or a reopened window made transmission
//! eligible right now.
//!
//! The driver holds only a weak reference to the engine: it never keeps the
//! stack alive on its own, and it exits as soon as every peer and socket
//! handle is gone.

//==============================================================================
// Imports
//==============================================================================

use crate::protocols::tcp::{endpoint::Disposition, peer::PeerInner};
use crate::runtime::network::NetworkRuntime;
use ::crossbeam_channel::{Receiver, RecvTimeoutError};
use ::std::{
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

//==============================================================================
// Standalone Functions
//==============================================================================

/// Body of the driver thread.
pub(crate) fn driver_loop<N: NetworkRuntime>(peer: Weak<PeerInner<N>>, wake_rx: Receiver<()>) {
    debug!("background driver started");
    loop {
        let tick: Duration = {
            // Hold a strong reference only for the duration of one pass.
            let inner: Arc<PeerInner<N>> = match peer.upgrade() {
                Some(inner) => inner,
                None => break,
            };
            run_pass(&inner, Instant::now());
            inner.config.get_driver_tick()
        };

        match wake_rx.recv_timeout(tick) {
            // Woken early or tick elapsed: run another pass.
            Ok(()) | Err(RecvTimeoutError::Timeout) => continue,
            // Every sender is gone; so is the engine.
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("background driver exiting");
}

/// One pass over all live endpoints: transmit queued data, fire timers.
fn run_pass<N: NetworkRuntime>(inner: &Arc<PeerInner<N>>, now: Instant) {
    for endpoint in inner.table.snapshot() {
        if let Err(e) = endpoint.drive_transmit(&inner.transport, now) {
            warn!("transmit failed for {:?}: {:?}", endpoint, e);
        }
        match endpoint.dispatch_timers(&inner.transport, now) {
            Ok(Disposition::Keep) => {},
            Ok(Disposition::Remove) => {
                inner.table.remove(endpoint.local(), endpoint.remote());
            },
            Err(e) => {
                warn!("timer dispatch failed for {:?}: {:?}", endpoint, e);
            },
        }
    }
}
