/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes or numbers, and do not have any major "active"
//! behavior.

use std::fmt::{self, Debug, Display, Formatter};
use std::ops::AddAssign;

/// 32-byte cryptographic identity hash of a cell's canonical encoding.
///
/// Within this crate, `CellHash`-es are always SHA-256 digests. Two cells with equal
/// hashes are treated as equal without structural comparison.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellHash([u8; 32]);

impl CellHash {
    /// Create a new `CellHash` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 32]` value of this `CellHash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Display for CellHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl Debug for CellHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// Ed25519 public key identifying a peer or client account.
///
/// The key is kept in byte form so it can be ordered, hashed and encoded without
/// checking curve validity; conversion to a usable verifying key happens at
/// signature-verification time.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountKey([u8; 32]);

impl AccountKey {
    /// Create a new `AccountKey` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 32]` value of this `AccountKey`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Display for AccountKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl Debug for AccountKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// Ed25519 digital signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    /// Create a new `SignatureBytes` wrapping `bytes`.
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 64]` value of this `SignatureBytes`.
    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

/// Milliseconds since the Unix epoch.
///
/// Timestamps order blocks and orders during belief merge, so they only ever move
/// forward on a given peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a new `Timestamp` with an `int` value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the `u64` value of this `Timestamp`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Address of an account in the replicated state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u64);

impl Address {
    /// Create a new `Address` with an `int` value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the `u64` value of this `Address`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Weight of a specific peer in consensus decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Stake(u64);

impl Stake {
    /// Create a new `Stake` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `Stake`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

/// Sum of the [`Stake`]s of all peers in a [`State`](crate::consensus::state::State).
///
/// The inner type is `u128` so that summing up large `Stake`s does not overflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct TotalStake(u128);

impl TotalStake {
    /// Create a new `TotalStake` wrapping `int`.
    pub const fn new(int: u128) -> Self {
        Self(int)
    }

    /// Get the inner `u128` value of this `TotalStake`.
    pub const fn int(&self) -> u128 {
        self.0
    }

    /// Compute the minimum stake that a set of orders must carry in order for their
    /// common block prefix to count as agreed.
    ///
    /// The quorum of a peer set with total stake `s` is `s * 2/3 + 1`. This exact
    /// threshold guarantees that at most one block prefix of a given length can reach
    /// quorum, given that at most 1/3 of the total stake is Byzantine.
    pub fn quorum(&self) -> TotalStake {
        const TOTAL_STAKE_OVERFLOW: &str = "Total stake exceeds u128::MAX/2.";
        TotalStake::new((self.0.checked_mul(2).expect(TOTAL_STAKE_OVERFLOW) / 3) + 1)
    }
}

impl AddAssign<Stake> for TotalStake {
    fn add_assign(&mut self, rhs: Stake) {
        self.0.add_assign(rhs.0 as u128)
    }
}
