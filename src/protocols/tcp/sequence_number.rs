// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! TCP sequence numbers.
//!
//! Sequence numbers occupy a 32-bit space that wraps, so "before" and
//! "after" are only meaningful between numbers less than half the space
//! apart: `a < b` holds when the wrapped distance from `a` to `b` is
//! positive as a signed 32-bit value. Three numbers can satisfy
//! `a < b < c < a`, so the type offers no total order and refuses to hand
//! out an `Ordering` at all; only the operator forms below are defined.
//! Addition and subtraction wrap modulo 2^32.

//==============================================================================
// Imports
//==============================================================================

use ::std::{cmp::Ordering, fmt, ops};

//==============================================================================
// Structures
//==============================================================================

/// A position in the TCP sequence space.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SeqNumber(u32);

//==============================================================================
// Trait Implementations
//==============================================================================

impl From<u32> for SeqNumber {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<SeqNumber> for u32 {
    fn from(value: SeqNumber) -> u32 {
        value.0
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl ops::Add for SeqNumber {
    type Output = SeqNumber;

    fn add(self, rhs: SeqNumber) -> SeqNumber {
        Self(self.0.wrapping_add(rhs.0))
    }
}

impl ops::Sub for SeqNumber {
    type Output = SeqNumber;

    fn sub(self, rhs: SeqNumber) -> SeqNumber {
        Self(self.0.wrapping_sub(rhs.0))
    }
}

/// Window-relative comparisons: each operator looks at the sign of the
/// wrapped difference. `partial_cmp` itself is unanswerable here (the same
/// pair of numbers would order both ways depending on which is taken as the
/// window base), so calling it is a bug in the caller.
impl PartialOrd for SeqNumber {
    fn partial_cmp(&self, _other: &Self) -> Option<Ordering> {
        unreachable!("sequence numbers admit no Ordering; use the comparison operators");
    }

    fn lt(&self, other: &Self) -> bool {
        (self.0.wrapping_sub(other.0) as i32) < 0
    }

    fn le(&self, other: &Self) -> bool {
        (self.0.wrapping_sub(other.0) as i32) <= 0
    }

    fn gt(&self, other: &Self) -> bool {
        (self.0.wrapping_sub(other.0) as i32) > 0
    }

    fn ge(&self, other: &Self) -> bool {
        (self.0.wrapping_sub(other.0) as i32) >= 0
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
