// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Per-endpoint timer slots.
//!
//! Each endpoint carries a small fixed array of timers, one slot per purpose.
//! Expired slots are dispatched by the background driver through an
//! exhaustive `match` on [`TimerKind`], so there are no callable-pointer
//! lifetime hazards and at most one active timer per purpose per endpoint.

//==============================================================================
// Imports
//==============================================================================

use ::std::time::Instant;

//==============================================================================
// Structures
//==============================================================================

/// Identifies the purpose of a per-endpoint timer slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimerKind {
    /// SYN (re)transmission while the connection handshake is in flight.
    Handshake = 0,
    /// Retransmission of the oldest unacknowledged data segment.
    Retransmit = 1,
    /// 2*MSL hold before a closed endpoint leaves the table.
    TimeWait = 2,
}

/// Number of timer slots per endpoint.
pub const TIMER_COUNT: usize = 3;

/// All timer kinds, in slot order.
pub const TIMER_KINDS: [TimerKind; TIMER_COUNT] = [TimerKind::Handshake, TimerKind::Retransmit, TimerKind::TimeWait];

/// One timer slot.
#[derive(Clone, Copy, Debug)]
struct TimerSlot {
    /// Is this slot armed?
    running: bool,
    /// Absolute expiry.
    expiry: Instant,
}

/// The fixed timer slot array owned by one endpoint. Mutations require the
/// endpoint's lock, like the rest of its state.
#[derive(Debug)]
pub struct TimerSet {
    slots: [TimerSlot; TIMER_COUNT],
}

//==============================================================================
// Associated Functions
//==============================================================================

impl TimerSet {
    /// Creates a timer set with all slots disarmed.
    pub fn new(now: Instant) -> Self {
        Self {
            slots: [TimerSlot {
                running: false,
                expiry: now,
            }; TIMER_COUNT],
        }
    }

    /// Arms the slot for [kind], replacing any previous expiry.
    pub fn arm(&mut self, kind: TimerKind, expiry: Instant) {
        let slot: &mut TimerSlot = &mut self.slots[kind as usize];
        slot.running = true;
        slot.expiry = expiry;
    }

    /// Disarms the slot for [kind].
    pub fn disarm(&mut self, kind: TimerKind) {
        self.slots[kind as usize].running = false;
    }

    /// Checks whether the slot for [kind] is armed.
    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.slots[kind as usize].running
    }

    /// Returns the kinds whose slots have expired at [now]. Expired slots are
    /// disarmed; handlers re-arm them as needed.
    pub fn take_expired(&mut self, now: Instant) -> impl Iterator<Item = TimerKind> + '_ {
        TIMER_KINDS.into_iter().filter(move |kind| {
            let slot: &mut TimerSlot = &mut self.slots[*kind as usize];
            if slot.running && now >= slot.expiry {
                slot.running = false;
                true
            } else {
                false
            }
        })
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::{TimerKind, TimerSet};
    use ::std::time::{Duration, Instant};

    #[test]
    fn arm_and_expire() {
        let now: Instant = Instant::now();
        let mut timers: TimerSet = TimerSet::new(now);

        timers.arm(TimerKind::Handshake, now + Duration::from_millis(10));
        timers.arm(TimerKind::Retransmit, now + Duration::from_millis(30));
        assert!(timers.is_armed(TimerKind::Handshake));

        // Nothing fires before its expiry.
        let fired: Vec<TimerKind> = timers.take_expired(now).collect();
        assert!(fired.is_empty());

        // Only the handshake slot fires at +20ms, and firing disarms it.
        let fired: Vec<TimerKind> = timers.take_expired(now + Duration::from_millis(20)).collect();
        assert_eq!(fired, vec![TimerKind::Handshake]);
        assert!(!timers.is_armed(TimerKind::Handshake));
        assert!(timers.is_armed(TimerKind::Retransmit));
    }

    #[test]
    fn disarm_suppresses_expiry() {
        let now: Instant = Instant::now();
        let mut timers: TimerSet = TimerSet::new(now);

        timers.arm(TimerKind::TimeWait, now + Duration::from_millis(5));
        timers.disarm(TimerKind::TimeWait);

        let fired: Vec<TimerKind> = timers.take_expired(now + Duration::from_secs(1)).collect();
        assert!(fired.is_empty());
    }
}
