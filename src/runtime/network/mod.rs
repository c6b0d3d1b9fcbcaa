// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Exports
//==============================================================================

pub mod config;
pub mod consts;

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::fail::Fail;
use ::std::net::Ipv4Addr;

//==============================================================================
// Structures
//==============================================================================

/// IPv4 protocol numbers used by this engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum IpProtocol {
    TCP = 0x06,
}

/// Result of a route lookup: the local address to source segments from and
/// the path MTU towards the remote, from which the advertised MSS derives.
#[derive(Clone, Copy, Debug)]
pub struct Route {
    /// Local interface address.
    pub local_addr: Ipv4Addr,
    /// Path MTU in bytes.
    pub mtu: usize,
}

//==============================================================================
// Traits
//==============================================================================

/// The IP-layer collaborator underneath the TCP engine.
///
/// Implementations are expected to be cheaply shareable across threads: the
/// background driver, application threads, and the inbound dispatch path all
/// transmit through the same instance.
pub trait NetworkRuntime: Send + Sync + 'static {
    /// Hands one framed TCP segment to the IP layer for delivery to [remote].
    fn transmit(&self, remote: Ipv4Addr, frame: Vec<u8>) -> Result<(), Fail>;

    /// Resolves a route towards [remote].
    fn route(&self, remote: Ipv4Addr) -> Result<Route, Fail>;
}
