// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Select/poll wait requests.
//!
//! A [`SelectWaiter`] is one pending wait request, shareable between the
//! waiting thread and the endpoints it is registered with. Endpoints keep a
//! slab-backed queue of registered waiters per direction; whenever a state
//! change makes that direction ready, every queued waiter is marked ready,
//! notified, and released from the queue.

//==============================================================================
// Imports
//==============================================================================

use ::slab::Slab;
use ::std::{
    sync::{Arc, Condvar, Mutex},
    time::Duration,
};

//==============================================================================
// Structures
//==============================================================================

/// Direction a wait request is interested in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Demand {
    /// Readable: unread received data exists (or the stream has ended).
    Read,
    /// Writable: free send-buffer space exists (or the connection failed).
    Write,
}

/// One pending select/poll wait request.
pub struct SelectWaiter {
    ready: Mutex<bool>,
    cond: Condvar,
}

/// The per-direction queue of registered waiters attached to an endpoint.
/// Protected by the endpoint's mutex, like the rest of its state.
#[derive(Default)]
pub(crate) struct WaiterQueue {
    waiters: Slab<Arc<SelectWaiter>>,
}

//==============================================================================
// Associated Functions
//==============================================================================

impl SelectWaiter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ready: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    /// Marks this waiter ready and releases any thread blocked in [wait].
    pub fn wake(&self) {
        let mut ready = self.ready.lock().unwrap();
        *ready = true;
        self.cond.notify_all();
    }

    /// Checks readiness without blocking.
    pub fn is_ready(&self) -> bool {
        *self.ready.lock().unwrap()
    }

    /// Blocks until this waiter is woken or [timeout] elapses. Returns
    /// whether the waiter was marked ready.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let guard = self.ready.lock().unwrap();
        match timeout {
            Some(timeout) => {
                let (guard, _) = self.cond.wait_timeout_while(guard, timeout, |ready| !*ready).unwrap();
                *guard
            },
            None => *self.cond.wait_while(guard, |ready| !*ready).unwrap(),
        }
    }

    /// Clears readiness so the waiter can be registered again.
    pub fn reset(&self) {
        *self.ready.lock().unwrap() = false;
    }
}

impl WaiterQueue {
    /// Registers a wait request, returning the key for deregistration.
    pub fn register(&mut self, waiter: Arc<SelectWaiter>) -> usize {
        self.waiters.insert(waiter)
    }

    /// Removes a wait request that no longer cares (e.g. its select call
    /// timed out or was satisfied by another endpoint).
    pub fn deregister(&mut self, key: usize) -> Option<Arc<SelectWaiter>> {
        self.waiters.try_remove(key)
    }

    /// Marks every queued waiter ready and releases it from the queue.
    pub fn wake_all(&mut self) {
        for waiter in self.waiters.drain() {
            waiter.wake();
        }
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
