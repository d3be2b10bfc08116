/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The crate-wide error taxonomy.
//!
//! Faults fall into two broad groups:
//! - **Connection-fatal**: [`BadFormat`](Fault::BadFormat) and
//!   [`InvalidData`](Fault::InvalidData). A peer that sends a non-canonical or
//!   invariant-violating encoding gets its connection closed.
//! - **Recoverable**: [`Missing`](Fault::Missing) carries the hash of a cell that is
//!   not locally available, and is resolved by the missing-data pull protocol.
//!   [`BadSignature`](Fault::BadSignature) discards the offending message.
//!   [`Timeout`](Fault::Timeout) is retried by the periodic connector.
//!
//! [`Internal`](Fault::Internal) is reserved for unexpected failures inside a worker;
//! it is logged and terminates that worker, never the whole process.

use std::fmt::{self, Display, Formatter};

use crate::types::basic::CellHash;

/// Error raised by the core subsystems: encoding, store access, belief merge, and
/// message dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fault {
    /// An encoding deviated from canonical form.
    BadFormat(&'static str),

    /// A signature did not verify against the claimed signer key.
    BadSignature,

    /// A structurally parseable value violated a data invariant.
    InvalidData(&'static str),

    /// A referenced cell with the given hash is not locally available.
    Missing(CellHash),

    /// A handshake or request did not complete in time.
    Timeout,

    /// Unexpected internal failure.
    Internal(String),
}

impl Fault {
    /// Whether the fault should close the connection it arrived on.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Fault::BadFormat(_) | Fault::InvalidData(_))
    }

    /// The missing hash, if this fault is recoverable via the pull protocol.
    pub fn missing_hash(&self) -> Option<CellHash> {
        match self {
            Fault::Missing(hash) => Some(*hash),
            _ => None,
        }
    }
}

impl Display for Fault {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Fault::BadFormat(reason) => write!(f, "bad format: {}", reason),
            Fault::BadSignature => write!(f, "bad signature"),
            Fault::InvalidData(reason) => write!(f, "invalid data: {}", reason),
            Fault::Missing(hash) => write!(f, "missing data: {}", hash),
            Fault::Timeout => write!(f, "timed out"),
            Fault::Internal(reason) => write!(f, "internal error: {}", reason),
        }
    }
}
