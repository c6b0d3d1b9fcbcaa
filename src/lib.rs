// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! An embeddable TCP transport-protocol engine.
//!
//! This crate turns an unreliable best-effort IP datagram service into a
//! reliable, ordered, flow-controlled byte stream. It implements the TCP
//! connection state machine, segment construction and checksumming, endpoint
//! demultiplexing, and a background transmit/timer driver, all safe under
//! concurrent access from application threads and the inbound delivery path.
//!
//! The IP layer underneath is a collaborator: embedders supply a
//! [`NetworkRuntime`](crate::runtime::network::NetworkRuntime) that can
//! resolve routes and transmit framed segments, and feed received TCP
//! segments into [`TcpPeer::receive`](crate::protocols::tcp::TcpPeer::receive).

#![deny(clippy::all)]

#[macro_use]
extern crate log;

pub mod collections;
pub mod protocols;
pub mod runtime;

pub use crate::{
    protocols::tcp::{Demand, SelectWaiter, TcpPeer, TcpSocket},
    runtime::{
        fail::Fail,
        network::{config::TcpConfig, NetworkRuntime, Route},
    },
};
