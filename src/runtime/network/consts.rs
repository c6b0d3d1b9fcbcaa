// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::std::time::Duration;

//==============================================================================
// Constants
//==============================================================================

/// Fallback MSS Parameter for TCP.
pub const FALLBACK_MSS: usize = 536;

/// Minimum MSS Parameter for TCP.
pub const MIN_MSS: usize = FALLBACK_MSS;

/// Maximum MSS Parameter for TCP.
pub const MAX_MSS: usize = u16::MAX as usize;

/// Default MSS Parameter for TCP.
pub const DEFAULT_MSS: usize = 1450;

/// Size of an IPv4 header plus a minimum TCP header, subtracted from the path
/// MTU to derive the MSS for a route.
pub const IPV4_TCP_OVERHEAD: usize = 40;

/// Delay between passes of the background transmit/timer driver when it is
/// not woken early.
pub const DEFAULT_DRIVER_TICK: Duration = Duration::from_millis(20);

/// Timeout for one SYN (re)transmission during the handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// Number of SYN retries before an active open gives up.
pub const DEFAULT_HANDSHAKE_RETRIES: usize = 5;

/// Maximum Segment Lifetime. A closed endpoint lingers in TIME_WAIT for twice
/// this long.
pub const DEFAULT_MSL: Duration = Duration::from_secs(15);

/// Default capacity of the per-endpoint receive ring.
pub const DEFAULT_RECV_RING_SIZE: usize = 32768;

/// Default capacity of the per-endpoint send ring.
pub const DEFAULT_SEND_RING_SIZE: usize = 32768;

/// Ephemeral port range for active opens (RFC 6335).
pub const EPHEMERAL_PORT_RANGE: std::ops::RangeInclusive<u16> = 49152..=65535;
