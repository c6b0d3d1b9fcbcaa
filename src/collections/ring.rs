// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! A fixed-capacity byte ring with independently movable cursors.
//!
//! One ring backs each direction of an endpoint: pending-send bytes on the TX
//! side and received-unread bytes on the RX side. Cursors are monotonically
//! increasing positions reduced modulo the capacity on access, so the byte
//! count between two cursors is a plain subtraction and never ambiguous at
//! full occupancy.
//!
//! The ring performs no locking and no overflow checking of its own: the
//! owning endpoint's mutex is the sole synchronization boundary, and callers
//! confirm availability (via [`RingBuffer::distance`]) before copying,
//! blocking rather than growing the buffer when space is short.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::fail::Fail;
use ::libc::EINVAL;

//==============================================================================
// Structures
//==============================================================================

/// A position into a [RingBuffer]. Advancing wraps modulo the ring capacity;
/// the position itself increases without bound.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Cursor {
    pos: u64,
}

/// A bounded byte buffer with contiguous storage.
pub struct RingBuffer {
    /// Underlying storage. Capacity never changes after creation.
    storage: Box<[u8]>,
}

//==============================================================================
// Associated Functions
//==============================================================================

impl Cursor {
    /// Moves this cursor forward by [n] bytes. The caller must not advance a
    /// cursor past the availability computed from its partner cursor.
    pub fn advance(&mut self, n: usize) {
        self.pos += n as u64;
    }
}

impl RingBuffer {
    /// Creates a ring buffer with the given capacity.
    pub fn new(capacity: usize) -> Result<Self, Fail> {
        if capacity == 0 {
            return Err(Fail::new(EINVAL, "cannot create a ring buffer with zero capacity"));
        }
        Ok(Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
        })
    }

    /// Returns the capacity of the target ring buffer.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Returns the number of bytes between two cursors. With [from] as the
    /// consumer and [to] as the producer this is the unread byte count; it is
    /// never greater than the capacity when callers uphold the availability
    /// contract.
    pub fn distance(&self, from: Cursor, to: Cursor) -> usize {
        debug_assert!(to.pos >= from.pos);
        let distance: u64 = to.pos - from.pos;
        debug_assert!(distance <= self.storage.len() as u64);
        distance as usize
    }

    /// Copies [bytes] into the ring at the cursor's offset, wrapping as
    /// needed. The caller must have already confirmed that free space exists;
    /// this operation neither blocks nor fails on overflow.
    pub fn write(&mut self, cursor: Cursor, bytes: &[u8]) {
        debug_assert!(bytes.len() <= self.storage.len());
        let capacity: usize = self.storage.len();
        let offset: usize = (cursor.pos % capacity as u64) as usize;
        let first: usize = std::cmp::min(bytes.len(), capacity - offset);
        self.storage[offset..offset + first].copy_from_slice(&bytes[..first]);
        let rest: usize = bytes.len() - first;
        self.storage[..rest].copy_from_slice(&bytes[first..]);
    }

    /// Copies `out.len()` bytes out of the ring starting at the cursor's
    /// offset, wrapping as needed. Symmetric to [write]: availability is the
    /// caller's responsibility.
    pub fn read(&self, cursor: Cursor, out: &mut [u8]) {
        debug_assert!(out.len() <= self.storage.len());
        let capacity: usize = self.storage.len();
        let offset: usize = (cursor.pos % capacity as u64) as usize;
        let first: usize = std::cmp::min(out.len(), capacity - offset);
        out[..first].copy_from_slice(&self.storage[offset..offset + first]);
        let rest: usize = out.len() - first;
        out[first..].copy_from_slice(&self.storage[..rest]);
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::{Cursor, RingBuffer};

    /// Capacity for ring buffer.
    const RING_CAPACITY: usize = 64;

    /// Tests that we fail to create a ring buffer with zero capacity.
    #[test]
    fn bad_new() {
        assert!(RingBuffer::new(0).is_err());
    }

    /// Tests that a write followed by a read returns exactly the written
    /// bytes, in order, and that distance returns to zero after a full cycle.
    #[test]
    fn write_read_cycle() {
        let mut ring: RingBuffer = RingBuffer::new(RING_CAPACITY).unwrap();
        let mut producer: Cursor = Cursor::default();
        let mut consumer: Cursor = Cursor::default();

        let payload: Vec<u8> = (0..RING_CAPACITY as u8).collect();
        ring.write(producer, &payload);
        producer.advance(payload.len());
        assert_eq!(ring.distance(consumer, producer), RING_CAPACITY);

        let mut out: Vec<u8> = vec![0; RING_CAPACITY];
        ring.read(consumer, &mut out);
        consumer.advance(out.len());
        assert_eq!(out, payload);
        assert_eq!(ring.distance(consumer, producer), 0);
    }

    /// Tests that writes and reads wrap correctly around the end of storage.
    #[test]
    fn wrap_around() {
        let mut ring: RingBuffer = RingBuffer::new(RING_CAPACITY).unwrap();
        let mut producer: Cursor = Cursor::default();
        let mut consumer: Cursor = Cursor::default();

        // Push the cursors near the end of the storage region.
        let filler: Vec<u8> = vec![0xAA; RING_CAPACITY - 3];
        ring.write(producer, &filler);
        producer.advance(filler.len());
        consumer.advance(filler.len());

        // This write straddles the wrap point.
        let payload: &[u8] = &[1, 2, 3, 4, 5, 6];
        ring.write(producer, payload);
        producer.advance(payload.len());

        let mut out: [u8; 6] = [0; 6];
        ring.read(consumer, &mut out);
        consumer.advance(out.len());
        assert_eq!(&out, payload);
        assert_eq!(ring.distance(consumer, producer), 0);
    }

    /// Tests interleaved partial writes and reads over several laps.
    #[test]
    fn interleaved_laps() {
        let mut ring: RingBuffer = RingBuffer::new(RING_CAPACITY).unwrap();
        let mut producer: Cursor = Cursor::default();
        let mut consumer: Cursor = Cursor::default();

        let mut next_write: u8 = 0;
        let mut next_read: u8 = 0;
        for _ in 0..10 {
            let chunk: Vec<u8> = (0..23).map(|i| next_write.wrapping_add(i)).collect();
            next_write = next_write.wrapping_add(23);
            ring.write(producer, &chunk);
            producer.advance(chunk.len());

            let unread: usize = ring.distance(consumer, producer);
            let mut out: Vec<u8> = vec![0; unread];
            ring.read(consumer, &mut out);
            consumer.advance(unread);
            for byte in out {
                assert_eq!(byte, next_read);
                next_read = next_read.wrapping_add(1);
            }
        }
    }
}
