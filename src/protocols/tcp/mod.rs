// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! TCP transport protocol engine.
//!
//! Module map, roughly bottom-up:
//!
//! - [`sequence_number`]: modulo-2^32 sequence arithmetic.
//! - [`checksum`] / [`header`] / [`segment`]: the wire codec.
//! - [`isn_generator`]: unpredictable initial sequence numbers.
//! - [`rto`]: the RFC 6298 retransmission-timeout estimator.
//! - [`waiter`]: select/poll wait requests.
//! - `endpoint` / `table`: per-connection state and the 4-tuple map.
//! - `peer` / `socket` / `background`: the engine instance, the
//!   application-facing handle, and the transmit/timer driver thread.

//==============================================================================
// Exports
//==============================================================================

pub mod checksum;
pub mod header;
pub mod rto;
pub mod sequence_number;
pub mod waiter;

mod background;
mod endpoint;
mod isn_generator;
mod peer;
mod segment;
mod socket;
mod table;

#[cfg(test)]
mod test_helpers;
#[cfg(test)]
mod tests;

pub use self::{
    peer::TcpPeer,
    sequence_number::SeqNumber,
    socket::TcpSocket,
    waiter::{Demand, SelectWaiter},
};
