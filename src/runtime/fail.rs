// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The crate-wide error type.
//!
//! Every fallible operation surfaces a [`Fail`]: an errno drawn from the
//! POSIX set, plus a human-readable cause. Callers discriminate on the
//! errno (`EWOULDBLOCK`, `ECONNRESET`, `ETIMEDOUT`, ...); the cause exists
//! for logs and error messages.

//==============================================================================
// Imports
//==============================================================================

use ::libc::{c_int, EIO};
use ::std::{error, fmt, io};

//==============================================================================
// Structures
//==============================================================================

/// An engine error: what class of failure, and what went wrong.
#[derive(Clone, Debug)]
pub struct Fail {
    /// POSIX error number naming the failure class.
    pub errno: c_int,
    /// What failed, for humans.
    pub cause: String,
}

//==============================================================================
// Associated Functions
//==============================================================================

impl Fail {
    pub fn new(errno: c_int, cause: &str) -> Self {
        Self {
            errno,
            cause: cause.to_string(),
        }
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl fmt::Display for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (errno {})", self.cause, self.errno)
    }
}

impl error::Error for Fail {}

/// I/O errors keep their OS errno when they carry one.
impl From<io::Error> for Fail {
    fn from(err: io::Error) -> Self {
        Self {
            errno: err.raw_os_error().unwrap_or(EIO),
            cause: err.to_string(),
        }
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
