// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Caller-visible error taxonomy.
//!
//! Parse and classifier failures never reach this type (see
//! [`crate::wire::ParseError`]) — they are folded into counters and retried.
//! This enum is only what `recvmsgv` and its convenience variants can
//! actually return to a caller.

use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Low-level syscall failure in the wait stage; carries the source error.
    Fault(io::Error),
    /// Caller argument failed validation (e.g. a zero-length vector).
    Inval(&'static str),
    /// Unrecoverable loss reported by a receive window while the transport
    /// was configured with `abort_on_reset`: the latch stays set and every
    /// subsequent call keeps returning this error rather than recovering.
    ConnReset,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Fault(e) => write!(f, "wait stage syscall failure: {e}"),
            Error::Inval(msg) => write!(f, "invalid argument: {msg}"),
            Error::ConnReset => write!(f, "unrecoverable loss (connection reset)"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Fault(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Fault(e)
    }
}
