// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Retransmission timeout estimation.
//!
//! The RFC 6298 estimator, carried in integer microseconds: a smoothed
//! round-trip time (SRTT) and its variation (RTTVAR) are folded together
//! per sample with the standard 1/8 and 1/4 gains, and the timeout is
//! `SRTT + max(G, 4 * RTTVAR)` clamped to fixed bounds. Until the first
//! sample arrives the timeout sits at the recommended one second. Backing
//! off doubles the current timeout without disturbing the estimate.

//==============================================================================
// Imports
//==============================================================================

use ::std::time::Duration;

//==============================================================================
// Constants
//==============================================================================

/// Clock granularity `G`, in microseconds.
const GRANULARITY_USECS: u64 = 1_000;

/// Timeout before any sample has arrived (RFC 6298 Section 2.1).
const INITIAL_RTO_USECS: u64 = 1_000_000;

/// Lower clamp on the timeout. RFC 6298 suggests one second; a tenth of
/// that keeps retransmission responsive on low-latency paths.
const MIN_RTO_USECS: u64 = 100_000;

/// Upper clamp on the timeout (RFC 6298 Section 2.4).
const MAX_RTO_USECS: u64 = 60_000_000;

//==============================================================================
// Structures
//==============================================================================

/// Running retransmission-timeout estimate for one connection.
#[derive(Debug)]
pub struct RtoCalculator {
    /// Smoothed round-trip time, in microseconds.
    srtt: u64,
    /// Round-trip time variation, in microseconds.
    rttvar: u64,
    /// Current timeout, in microseconds, kept within the clamp bounds.
    rto: u64,
    /// Still false before the first sample, which seeds SRTT and RTTVAR
    /// directly instead of being averaged in.
    seeded: bool,
}

//==============================================================================
// Associated Functions
//==============================================================================

impl RtoCalculator {
    pub fn new() -> Self {
        Self {
            srtt: INITIAL_RTO_USECS,
            rttvar: 0,
            rto: INITIAL_RTO_USECS,
            seeded: false,
        }
    }

    /// Folds one measured round-trip time into the estimate (RFC 6298
    /// Sections 2.2 and 2.3).
    pub fn add_sample(&mut self, rtt: Duration) {
        let rtt: u64 = rtt.as_micros() as u64;
        if !self.seeded {
            self.srtt = rtt;
            self.rttvar = rtt / 2;
            self.seeded = true;
        } else {
            // RTTVAR <- 3/4 RTTVAR + 1/4 |SRTT - R'|, then
            // SRTT <- 7/8 SRTT + 1/8 R'.
            self.rttvar = self.rttvar - self.rttvar / 4 + self.srtt.abs_diff(rtt) / 4;
            self.srtt = self.srtt - self.srtt / 8 + rtt / 8;
        }
        self.set_rto(self.srtt + GRANULARITY_USECS.max(4 * self.rttvar));
    }

    /// Doubles the current timeout after a retransmission (RFC 6298
    /// Section 5.5).
    pub fn back_off(&mut self) {
        self.set_rto(self.rto.saturating_mul(2));
    }

    /// The current timeout.
    pub fn rto(&self) -> Duration {
        Duration::from_micros(self.rto)
    }

    fn set_rto(&mut self, usecs: u64) {
        self.rto = usecs.clamp(MIN_RTO_USECS, MAX_RTO_USECS);
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl Default for RtoCalculator {
    fn default() -> Self {
        Self::new()
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
