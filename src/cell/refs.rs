/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Lazy references between cells.
//!
//! A [`Ref`] is a handle to a cell that may or may not be in memory:
//! - `Embedded`: the cell is small enough to be inlined in its parent's encoding. It
//!   is never written to a store as a standalone entry.
//! - `Resolved`: the cell is held in memory (and is not embedded).
//! - `Stored`: only the hash is known; the value must be fetched from a store.
//!
//! Forcing a `Stored` ref whose hash is absent from the store raises
//! [`Fault::Missing`], a recoverable condition that the protocol layer turns into a
//! `MISSING_DATA` request over the wire.

use crate::error::Fault;
use crate::types::basic::CellHash;

use super::encoding::{Reader, MAX_EMBEDDED_LENGTH, TAG_REF};
use super::Cell;

/// Sources that can produce a cell for a hash. Implemented by
/// [`Context`](crate::store::context::Context); traversal code depends only on this
/// seam.
pub trait Resolver {
    /// Produce the cell with the given hash, or fail with [`Fault::Missing`].
    fn resolve_hash(&self, hash: &CellHash) -> Result<Cell, Fault>;
}

/// A reference to a cell carrying the cell's hash and optionally its in-memory value.
#[derive(Clone)]
pub enum Ref {
    /// A small cell inlined in its parent's encoding.
    Embedded(Cell),

    /// A non-embedded cell held in memory.
    Resolved(Cell),

    /// A cell known only by hash.
    Stored(CellHash),
}

impl Ref {
    /// Create the appropriate ref for `cell`: `Embedded` if its encoding is at most
    /// [`MAX_EMBEDDED_LENGTH`] bytes, `Resolved` otherwise.
    pub fn of(cell: Cell) -> Ref {
        if cell.is_embedded() {
            Ref::Embedded(cell)
        } else {
            Ref::Resolved(cell)
        }
    }

    /// The hash of the referenced cell. Never does I/O.
    pub fn hash(&self) -> CellHash {
        match self {
            Ref::Embedded(cell) | Ref::Resolved(cell) => cell.hash(),
            Ref::Stored(hash) => *hash,
        }
    }

    /// The referenced cell, if it is in memory.
    pub fn cell(&self) -> Option<&Cell> {
        match self {
            Ref::Embedded(cell) | Ref::Resolved(cell) => Some(cell),
            Ref::Stored(_) => None,
        }
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self, Ref::Embedded(_))
    }

    /// Force this ref to a cell, consulting `resolver` if only the hash is known.
    pub fn resolve(&self, resolver: &dyn Resolver) -> Result<Cell, Fault> {
        match self {
            Ref::Embedded(cell) | Ref::Resolved(cell) => Ok(cell.clone()),
            Ref::Stored(hash) => resolver.resolve_hash(hash),
        }
    }

    /// Write this ref into a parent encoding: the full cell encoding for embedded
    /// refs, `TAG_REF` plus the 32-byte hash otherwise.
    pub(crate) fn write(&self, w: &mut Vec<u8>) {
        match self {
            Ref::Embedded(cell) => w.extend_from_slice(cell.encoding()),
            Ref::Resolved(cell) => {
                w.push(TAG_REF);
                w.extend_from_slice(&cell.hash().bytes());
            }
            Ref::Stored(hash) => {
                w.push(TAG_REF);
                w.extend_from_slice(&hash.bytes());
            }
        }
    }

    /// Read a ref slot: either an inlined embedded cell or a by-hash reference.
    pub(crate) fn read(r: &mut Reader) -> Result<Ref, Fault> {
        if r.peek()? == TAG_REF {
            r.u8()?;
            Ok(Ref::Stored(CellHash::new(r.array32()?)))
        } else {
            let cell = super::read_cell(r)?;
            if cell.encoding().len() > MAX_EMBEDDED_LENGTH {
                return Err(Fault::BadFormat("non-embedded cell inlined in parent"));
            }
            Ok(Ref::Embedded(cell))
        }
    }
}

impl PartialEq for Ref {
    fn eq(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }
}

impl Eq for Ref {}
