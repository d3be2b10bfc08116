/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Log helpers.
//!
//! The crate logs through the [log](https://docs.rs/log) facade; embedders install
//! whatever implementation they prefer. Event lines lead with a PascalCase event
//! name so they stay grep-able, and hashes are shortened to their first seven
//! base64 characters.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

use crate::types::basic::CellHash;

// Event names used in server log lines:
pub const BELIEF_RECEIVED: &str = "BeliefReceived";
pub const BELIEF_MERGED: &str = "BeliefMerged";
pub const BLOCK_PROPOSED: &str = "BlockProposed";
pub const CONSENSUS_ADVANCE: &str = "ConsensusAdvance";
pub const PARTIAL_PARKED: &str = "PartialParked";
pub const PARTIAL_REQUEUED: &str = "PartialRequeued";
pub const CHALLENGE_SENT: &str = "ChallengeSent";
pub const CONNECTION_TRUSTED: &str = "ConnectionTrusted";
pub const RESULT_RETURNED: &str = "ResultReturned";
pub const SERVER_STARTED: &str = "ServerStarted";
pub const SERVER_CLOSED: &str = "ServerClosed";

/// A readable short form of a byte sequence: the first seven characters of its
/// base64 encoding.
pub fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

/// Short display form of a cell hash for log lines.
pub fn short_hash(hash: &CellHash) -> String {
    first_seven_base64_chars(&hash.bytes())
}
