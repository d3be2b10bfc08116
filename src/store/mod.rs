/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The content-addressed store: a hash → encoding repository with a single root
//! anchor for restart.
//!
//! The [`Store`] trait is the seam to the embedder's storage backend; the on-disk
//! byte layout is its concern, not ours. [`MemoryStore`] is the volatile reference
//! implementation. The [`Context`](context::Context) carries the store explicitly
//! through every operation that may persist or resolve cells; a process-wide default
//! store exists only as a fallback for contexts constructed without one.

pub mod context;

pub mod memory;

use std::sync::{Arc, OnceLock};

use crate::types::basic::CellHash;

use self::memory::MemoryStore;

/// Whether a persist operation writes only the top cell or the whole reachable
/// graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersistMode {
    /// Write only the top cell; child refs are left as-is.
    Shallow,

    /// Recursively write every reachable non-embedded descendant.
    Deep,
}

/// A thread-safe repository of cell encodings keyed by identity hash.
///
/// Contract: after a deep persist of a cell, every reachable non-embedded cell is
/// retrievable by hash from this store until the store is closed.
pub trait Store: Send + Sync {
    /// Insert an encoding under its hash. Returns `true` if the hash was newly
    /// written, `false` if it was already present (the encoding is not rewritten).
    fn put(&self, hash: CellHash, encoding: Vec<u8>) -> bool;

    /// Fetch the encoding stored under `hash`.
    fn get(&self, hash: &CellHash) -> Option<Vec<u8>>;

    /// Whether `hash` is present.
    fn contains(&self, hash: &CellHash) -> bool {
        self.get(hash).is_some()
    }

    /// Set the root anchor used for restart.
    fn set_root(&self, hash: CellHash);

    /// Get the root anchor, if one was ever set.
    fn root(&self) -> Option<CellHash>;

    /// Flush and release resources. Further access is undefined.
    fn close(&self) {}
}

static GLOBAL_STORE: OnceLock<Arc<MemoryStore>> = OnceLock::new();

/// The process-wide default store, created on first use.
///
/// Servers pin their own configured store into a [`Context`](context::Context); this
/// default exists so that ambient operations performed without a server still have
/// somewhere to go.
pub fn global() -> Arc<dyn Store> {
    let store = GLOBAL_STORE
        .get_or_init(|| Arc::new(MemoryStore::new()))
        .clone();
    store
}
