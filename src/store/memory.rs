/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A simple, volatile, in-memory implementation of [`Store`].

use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::basic::CellHash;

use super::Store;

/// An in-memory [`Store`]. Cloning the `Arc` that owns it shares the contents, which
/// is how restart recovery is exercised without a disk backend.
pub struct MemoryStore {
    cells: Mutex<HashMap<CellHash, Vec<u8>>>,
    root: Mutex<Option<CellHash>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore {
            cells: Mutex::new(HashMap::new()),
            root: Mutex::new(None),
        }
    }

    /// The number of stored cells.
    pub fn len(&self) -> usize {
        self.cells.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new()
    }
}

impl Store for MemoryStore {
    fn put(&self, hash: CellHash, encoding: Vec<u8>) -> bool {
        let mut cells = self.cells.lock().unwrap();
        if cells.contains_key(&hash) {
            false
        } else {
            cells.insert(hash, encoding);
            true
        }
    }

    fn get(&self, hash: &CellHash) -> Option<Vec<u8>> {
        self.cells.lock().unwrap().get(hash).cloned()
    }

    fn contains(&self, hash: &CellHash) -> bool {
        self.cells.lock().unwrap().contains_key(hash)
    }

    fn set_root(&self, hash: CellHash) {
        *self.root.lock().unwrap() = Some(hash);
    }

    fn root(&self) -> Option<CellHash> {
        *self.root.lock().unwrap()
    }
}
