/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The explicit store context.
//!
//! The original design bound the "current store" to a thread-local slot so that
//! deeply nested persist operations target the right backend. Here the store is
//! carried explicitly: every operation that may persist or resolve takes a
//! [`Context`]. Workers clone the server's context once at spawn; nothing consults
//! ambient state.

use std::collections::HashSet;
use std::sync::Arc;

use crate::cell::refs::{Ref, Resolver};
use crate::cell::{decode_cell, Cell};
use crate::error::Fault;
use crate::types::basic::CellHash;

use super::{PersistMode, Store};

/// A handle to the store that all persist and resolve operations of one server (or
/// one embedder task) target.
#[derive(Clone)]
pub struct Context {
    store: Arc<dyn Store>,
}

impl Context {
    pub fn new(store: Arc<dyn Store>) -> Context {
        Context { store }
    }

    /// A context over the process-wide default store.
    pub fn global() -> Context {
        Context {
            store: super::global(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Fetch and decode the cell stored under `hash`, if present.
    ///
    /// A present-but-undecodable entry is store corruption and surfaces as
    /// [`Fault::InvalidData`] rather than being silently treated as absent.
    pub fn lookup(&self, hash: &CellHash) -> Result<Option<Cell>, Fault> {
        match self.store.get(hash) {
            None => Ok(None),
            Some(bytes) => {
                let cell =
                    decode_cell(&bytes).map_err(|_| Fault::InvalidData("corrupt store entry"))?;
                Ok(Some(cell))
            }
        }
    }

    /// Persist `cell` into the store, returning a ref to it.
    ///
    /// With [`PersistMode::Deep`], every reachable non-embedded descendant is written
    /// first; a `Stored` child whose hash is absent fails with [`Fault::Missing`].
    /// Deep persistence is idempotent: cells already present by hash are not
    /// rewritten.
    pub fn persist(&self, cell: &Cell, mode: PersistMode) -> Result<Ref, Fault> {
        self.persist_with(cell, mode, &mut |_| {})
    }

    /// Deep-persist `cell`, reporting every newly written cell (the "novelty") to
    /// `novelty`. Cells already present are not reported.
    pub fn announce(
        &self,
        cell: &Cell,
        novelty: &mut dyn FnMut(&Cell),
    ) -> Result<Ref, Fault> {
        self.persist_with(cell, PersistMode::Deep, novelty)
    }

    fn persist_with(
        &self,
        cell: &Cell,
        mode: PersistMode,
        novelty: &mut dyn FnMut(&Cell),
    ) -> Result<Ref, Fault> {
        let mut visited = HashSet::new();
        self.persist_inner(cell, mode == PersistMode::Deep, novelty, &mut visited)?;
        Ok(Ref::of(cell.clone()))
    }

    fn persist_inner(
        &self,
        cell: &Cell,
        deep: bool,
        novelty: &mut dyn FnMut(&Cell),
        visited: &mut HashSet<CellHash>,
    ) -> Result<(), Fault> {
        if !visited.insert(cell.hash()) {
            return Ok(());
        }
        if deep {
            for child in cell.child_refs() {
                match child {
                    // Embedded cells are not stored standalone, but their own
                    // children still need to reach the store.
                    Ref::Embedded(child) | Ref::Resolved(child) => {
                        self.persist_inner(&child, deep, novelty, visited)?;
                    }
                    // A present stored child may have entered the store shallowly
                    // (via a DATA message), so its descendants are checked too.
                    Ref::Stored(hash) => match self.lookup(&hash)? {
                        Some(child) => self.persist_inner(&child, deep, novelty, visited)?,
                        None => return Err(Fault::Missing(hash)),
                    },
                }
            }
        }
        if !cell.is_embedded() && self.store.put(cell.hash(), cell.encoding().to_vec()) {
            novelty(cell);
        }
        Ok(())
    }
}

impl Resolver for Context {
    fn resolve_hash(&self, hash: &CellHash) -> Result<Cell, Fault> {
        match self.lookup(hash)? {
            Some(cell) => Ok(cell),
            None => Err(Fault::Missing(*hash)),
        }
    }
}
