/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A chunked, prefix-tailed persistent vector.
//!
//! Design goals: O(1) amortised append, O(log₁₆ n) random access, and fast common
//! -prefix computation, because equal sub-vectors compare by ref hash.
//!
//! Two variants exist:
//! - A [`Leaf`] holds 0–16 element refs plus an optional *prefix* reference to
//!   another vector holding everything before them.
//! - A [`Tree`] holds 2–16 child vectors, all of the same power-of-16 size except
//!   possibly the last.
//!
//! Canonical form is a function of the element count alone:
//! - count ≤ 16: a plain leaf.
//! - count > 16, count mod 16 ≠ 0: a leaf with `count mod 16` head elements (1–15)
//!   and a prefix holding the packed remainder.
//! - count > 16, count mod 16 = 0: a tree of packed chunks.
//!
//! Appending therefore always grows the head of a leaf, with a full head of 16
//! rolling into the packed prefix.

use crate::error::Fault;

use super::encoding::{write_vlc_u64, Reader};
use super::refs::{Ref, Resolver};
use super::{Cell, Value};

/// Number of elements in a packed chunk.
pub const CHUNK_SIZE: u64 = 16;

#[derive(Clone)]
pub enum Vector {
    Leaf(Leaf),
    Tree(Tree),
}

/// 0–16 element refs, plus an optional prefix vector holding all earlier elements.
#[derive(Clone)]
pub struct Leaf {
    head: Vec<Ref>,
    prefix: Option<Ref>,
    count: u64,
}

impl Leaf {
    /// The number of elements held by the prefix.
    fn prefix_length(&self) -> u64 {
        self.count - self.head.len() as u64
    }

    fn prefix_vector(&self, resolver: &dyn Resolver) -> Result<Vector, Fault> {
        match &self.prefix {
            Some(prefix) => Ok(prefix.resolve(resolver)?.as_vector()?.clone()),
            None => Err(Fault::InvalidData("leaf prefix missing")),
        }
    }
}

/// 2–16 child vectors of power-of-16 size, representing larger sequences.
#[derive(Clone)]
pub struct Tree {
    children: Vec<Ref>,
    count: u64,
}

/// The size of every full child of a tree holding `count` elements: the smallest
/// power of 16 whose sixteenfold covers `count`.
fn child_size(count: u64) -> u64 {
    let mut size = CHUNK_SIZE;
    while size * CHUNK_SIZE < count {
        size *= CHUNK_SIZE;
    }
    size
}

impl Vector {
    pub fn empty() -> Vector {
        Vector::Leaf(Leaf {
            head: Vec::new(),
            prefix: None,
            count: 0,
        })
    }

    /// Build a vector of the given cells by repeated append.
    pub fn of(
        resolver: &dyn Resolver,
        cells: impl IntoIterator<Item = Cell>,
    ) -> Result<Vector, Fault> {
        let mut vector = Vector::empty();
        for cell in cells {
            vector = vector.append(resolver, cell)?;
        }
        Ok(vector)
    }

    pub fn count(&self) -> u64 {
        match self {
            Vector::Leaf(leaf) => leaf.count,
            Vector::Tree(tree) => tree.count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Wrap this vector into a cell.
    pub fn to_cell(&self) -> Cell {
        Cell::new(Value::Vector(self.clone()))
    }

    /// Append one element, returning the extended vector.
    pub fn append(&self, resolver: &dyn Resolver, value: Cell) -> Result<Vector, Fault> {
        match self {
            Vector::Leaf(leaf) if leaf.head.len() < CHUNK_SIZE as usize => {
                let mut head = leaf.head.clone();
                head.push(Ref::of(value));
                if head.len() == CHUNK_SIZE as usize {
                    let chunk = Leaf {
                        head,
                        prefix: None,
                        count: CHUNK_SIZE,
                    };
                    match &leaf.prefix {
                        None => Ok(Vector::Leaf(chunk)),
                        Some(_) => leaf.prefix_vector(resolver)?.append_chunk(resolver, chunk),
                    }
                } else {
                    Ok(Vector::Leaf(Leaf {
                        head,
                        prefix: leaf.prefix.clone(),
                        count: leaf.count + 1,
                    }))
                }
            }
            // A packed leaf or a tree becomes the prefix of a fresh leaf.
            _ => Ok(Vector::Leaf(Leaf {
                head: vec![Ref::of(value)],
                prefix: Some(Ref::of(self.to_cell())),
                count: self.count() + 1,
            })),
        }
    }

    /// Append a packed chunk of exactly [`CHUNK_SIZE`] elements to a fully packed
    /// vector.
    fn append_chunk(&self, resolver: &dyn Resolver, chunk: Leaf) -> Result<Vector, Fault> {
        if chunk.count != CHUNK_SIZE || chunk.prefix.is_some() {
            return Err(Fault::InvalidData("appended chunk must be packed"));
        }
        match self {
            Vector::Leaf(leaf) => {
                if leaf.count == 0 {
                    return Ok(Vector::Leaf(chunk));
                }
                if leaf.prefix.is_some() || leaf.count != CHUNK_SIZE {
                    return Err(Fault::InvalidData("cannot append chunk to unpacked vector"));
                }
                Ok(Vector::Tree(Tree {
                    children: vec![
                        Ref::of(self.to_cell()),
                        Ref::of(Vector::Leaf(chunk).to_cell()),
                    ],
                    count: 2 * CHUNK_SIZE,
                }))
            }
            Vector::Tree(tree) => {
                let size = child_size(tree.count);
                if tree.count == size * CHUNK_SIZE {
                    // Sixteen full children at this level: deepen.
                    return Ok(Vector::Tree(Tree {
                        children: vec![
                            Ref::of(self.to_cell()),
                            Ref::of(Vector::Leaf(chunk).to_cell()),
                        ],
                        count: tree.count + CHUNK_SIZE,
                    }));
                }
                let mut children = tree.children.clone();
                let last = children
                    .last()
                    .ok_or(Fault::InvalidData("tree without children"))?
                    .resolve(resolver)?
                    .as_vector()?
                    .clone();
                if last.count() < size {
                    let new_last = last.append_chunk(resolver, chunk)?;
                    *children.last_mut().unwrap() = Ref::of(new_last.to_cell());
                } else {
                    children.push(Ref::of(Vector::Leaf(chunk).to_cell()));
                }
                Ok(Vector::Tree(Tree {
                    children,
                    count: tree.count + CHUNK_SIZE,
                }))
            }
        }
    }

    /// The ref of the element at `index`.
    pub fn element_ref(&self, resolver: &dyn Resolver, index: u64) -> Result<Ref, Fault> {
        if index >= self.count() {
            return Err(Fault::InvalidData("vector index out of range"));
        }
        match self {
            Vector::Leaf(leaf) => {
                let prefix_length = leaf.prefix_length();
                if index >= prefix_length {
                    Ok(leaf.head[(index - prefix_length) as usize].clone())
                } else {
                    leaf.prefix_vector(resolver)?.element_ref(resolver, index)
                }
            }
            Vector::Tree(tree) => {
                let size = child_size(tree.count);
                let child_index = (index / size) as usize;
                let child = tree
                    .children
                    .get(child_index)
                    .ok_or(Fault::InvalidData("vector tree shape mismatch"))?
                    .resolve(resolver)?
                    .as_vector()?
                    .clone();
                child.element_ref(resolver, index - child_index as u64 * size)
            }
        }
    }

    /// The element at `index`, resolved.
    pub fn get(&self, resolver: &dyn Resolver, index: u64) -> Result<Cell, Fault> {
        self.element_ref(resolver, index)?.resolve(resolver)
    }

    /// The last element, if any.
    pub fn last(&self, resolver: &dyn Resolver) -> Result<Option<Cell>, Fault> {
        if self.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.get(resolver, self.count() - 1)?))
        }
    }

    /// The sub-vector covering `start..start + length`.
    pub fn sub_vector(
        &self,
        resolver: &dyn Resolver,
        start: u64,
        length: u64,
    ) -> Result<Vector, Fault> {
        let end = start
            .checked_add(length)
            .ok_or(Fault::InvalidData("vector range overflow"))?;
        if end > self.count() {
            return Err(Fault::InvalidData("vector range out of bounds"));
        }
        if start == 0 && length == self.count() {
            return Ok(self.clone());
        }
        let mut out = Vector::empty();
        for index in start..end {
            out = out.append(resolver, self.get(resolver, index)?)?;
        }
        Ok(out)
    }

    /// The concatenation of `self` and `other`.
    pub fn concat(&self, resolver: &dyn Resolver, other: &Vector) -> Result<Vector, Fault> {
        let mut out = self.clone();
        for index in 0..other.count() {
            out = out.append(resolver, other.get(resolver, index)?)?;
        }
        Ok(out)
    }

    /// All elements as a `Vec`, in order.
    pub fn to_vec(&self, resolver: &dyn Resolver) -> Result<Vec<Cell>, Fault> {
        let mut out = Vec::with_capacity(self.count() as usize);
        for index in 0..self.count() {
            out.push(self.get(resolver, index)?);
        }
        Ok(out)
    }

    /// The length of the longest common prefix of `self` and `other`.
    ///
    /// Equal sub-vectors are compared by ref hash, so two vectors sharing a long
    /// packed prefix are compared without traversing it.
    pub fn common_prefix_length(
        &self,
        resolver: &dyn Resolver,
        other: &Vector,
    ) -> Result<u64, Fault> {
        let bound = self.count().min(other.count());
        if bound == 0 {
            return Ok(0);
        }
        if self.count() == other.count() && self.to_cell().hash() == other.to_cell().hash() {
            return Ok(bound);
        }
        if let Vector::Leaf(leaf) = self {
            let prefix_length = leaf.prefix_length();
            if prefix_length > 0 {
                let matched = leaf
                    .prefix_vector(resolver)?
                    .common_prefix_length(resolver, other)?;
                if matched < prefix_length {
                    return Ok(matched);
                }
            }
            // The whole prefix matched; compare head elements.
            let extra = bound.saturating_sub(prefix_length);
            for i in 0..extra {
                let ours = leaf.head[i as usize].hash();
                if ours != other.element_ref(resolver, prefix_length + i)?.hash() {
                    return Ok(prefix_length + i);
                }
            }
            return Ok(prefix_length + extra);
        }
        if matches!(other, Vector::Leaf(_)) {
            return other.common_prefix_length(resolver, self);
        }
        // Both are trees: skip over equal chunks, then locate the differing element.
        let mut index = 0;
        while index < bound {
            if index + CHUNK_SIZE <= bound {
                let ours = self.chunk_ref(resolver, index)?;
                let theirs = other.chunk_ref(resolver, index)?;
                if ours.hash() == theirs.hash() {
                    index += CHUNK_SIZE;
                    continue;
                }
            }
            let end = bound.min(index + CHUNK_SIZE);
            for i in index..end {
                let ours = self.element_ref(resolver, i)?.hash();
                if ours != other.element_ref(resolver, i)?.hash() {
                    return Ok(i);
                }
            }
            index = end;
        }
        Ok(bound)
    }

    /// The ref of the packed chunk starting at `offset`, which must be 16-aligned
    /// with a full chunk available.
    fn chunk_ref(&self, resolver: &dyn Resolver, offset: u64) -> Result<Ref, Fault> {
        debug_assert!(offset % CHUNK_SIZE == 0 && offset + CHUNK_SIZE <= self.count());
        match self {
            Vector::Leaf(leaf) => {
                if leaf.prefix.is_none() {
                    Ok(Ref::of(self.to_cell()))
                } else {
                    leaf.prefix_vector(resolver)?.chunk_ref(resolver, offset)
                }
            }
            Vector::Tree(tree) => {
                let size = child_size(tree.count);
                let child_index = (offset / size) as usize;
                let child = tree
                    .children
                    .get(child_index)
                    .ok_or(Fault::InvalidData("vector tree shape mismatch"))?;
                if size == CHUNK_SIZE {
                    Ok(child.clone())
                } else {
                    let child = child.resolve(resolver)?.as_vector()?.clone();
                    child.chunk_ref(resolver, offset - child_index as u64 * size)
                }
            }
        }
    }

    pub(crate) fn child_refs(&self) -> Vec<Ref> {
        match self {
            Vector::Leaf(leaf) => {
                let mut refs = leaf.head.clone();
                if let Some(prefix) = &leaf.prefix {
                    refs.push(prefix.clone());
                }
                refs
            }
            Vector::Tree(tree) => tree.children.clone(),
        }
    }

    pub(crate) fn write(&self, w: &mut Vec<u8>) {
        write_vlc_u64(w, self.count());
        match self {
            Vector::Leaf(leaf) => {
                for item in &leaf.head {
                    item.write(w);
                }
                if let Some(prefix) = &leaf.prefix {
                    prefix.write(w);
                }
            }
            Vector::Tree(tree) => {
                for child in &tree.children {
                    child.write(w);
                }
            }
        }
    }

    pub(crate) fn read(r: &mut Reader) -> Result<Vector, Fault> {
        let count = r.vlc_u64()?;
        if count <= CHUNK_SIZE {
            let mut head = Vec::with_capacity(count as usize);
            for _ in 0..count {
                head.push(Ref::read(r)?);
            }
            Ok(Vector::Leaf(Leaf {
                head,
                prefix: None,
                count,
            }))
        } else if count % CHUNK_SIZE != 0 {
            let n = (count % CHUNK_SIZE) as usize;
            let mut head = Vec::with_capacity(n);
            for _ in 0..n {
                head.push(Ref::read(r)?);
            }
            let prefix = Ref::read(r)?;
            Ok(Vector::Leaf(Leaf {
                head,
                prefix: Some(prefix),
                count,
            }))
        } else {
            let size = child_size(count);
            let n = ((count + size - 1) / size) as usize;
            let mut children = Vec::with_capacity(n);
            for _ in 0..n {
                children.push(Ref::read(r)?);
            }
            Ok(Vector::Tree(Tree { children, count }))
        }
    }
}

impl PartialEq for Vector {
    fn eq(&self, other: &Self) -> bool {
        self.count() == other.count() && self.to_cell().hash() == other.to_cell().hash()
    }
}

impl Eq for Vector {}

impl std::fmt::Debug for Vector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Vector(count: {}, hash: {})", self.count(), self.to_cell().hash())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::basic::CellHash;

    /// Resolver for fully in-memory vectors; any store lookup is a test failure.
    struct NoStore;

    impl Resolver for NoStore {
        fn resolve_hash(&self, hash: &CellHash) -> Result<Cell, Fault> {
            Err(Fault::Missing(*hash))
        }
    }

    fn longs(range: std::ops::Range<i64>) -> Vec<Cell> {
        range.map(Cell::long).collect()
    }

    fn build(range: std::ops::Range<i64>) -> Vector {
        Vector::of(&NoStore, longs(range)).unwrap()
    }

    #[test]
    fn append_and_get() {
        for n in [0u64, 1, 15, 16, 17, 31, 32, 100, 256, 257, 300, 1000] {
            let vector = build(0..n as i64);
            assert_eq!(vector.count(), n);
            for i in 0..n {
                assert_eq!(
                    vector.get(&NoStore, i).unwrap().as_long().unwrap(),
                    i as i64
                );
            }
            assert!(vector.get(&NoStore, n).is_err());
        }
    }

    #[test]
    fn append_extends_length_and_keeps_last() {
        let mut vector = Vector::empty();
        for i in 0..200i64 {
            let next = vector.append(&NoStore, Cell::long(i)).unwrap();
            assert_eq!(next.count(), vector.count() + 1);
            assert_eq!(
                next.get(&NoStore, vector.count()).unwrap().as_long().unwrap(),
                i
            );
            vector = next;
        }
    }

    #[test]
    fn encoding_roundtrip_preserves_hash() {
        for n in [0, 5, 16, 20, 32, 256, 300] {
            let vector = build(0..n);
            let cell = vector.to_cell();
            let decoded = crate::cell::decode_cell(cell.encoding()).unwrap();
            assert_eq!(decoded.hash(), cell.hash());
        }
    }

    #[test]
    fn canonical_form_is_unique_per_sequence() {
        // The same element sequence reached by different operation orders encodes
        // identically.
        let direct = build(0..40);
        let first = build(0..25);
        let second = build(25..40);
        let concatenated = first.concat(&NoStore, &second).unwrap();
        assert_eq!(direct.to_cell().hash(), concatenated.to_cell().hash());
    }

    #[test]
    fn sub_vector_identity_and_parts() {
        let vector = build(0..50);
        let whole = vector.sub_vector(&NoStore, 0, 50).unwrap();
        assert_eq!(whole, vector);

        let middle = vector.sub_vector(&NoStore, 10, 20).unwrap();
        assert_eq!(middle.count(), 20);
        for i in 0..20 {
            assert_eq!(
                middle.get(&NoStore, i).unwrap().as_long().unwrap(),
                (10 + i) as i64
            );
        }

        assert!(vector.sub_vector(&NoStore, 40, 20).is_err());
    }

    #[test]
    fn concat_lengths_add_up() {
        let a = build(0..37);
        let b = build(100..130);
        let joined = a.concat(&NoStore, &b).unwrap();
        assert_eq!(joined.count(), a.count() + b.count());
        assert_eq!(joined.get(&NoStore, 36).unwrap().as_long().unwrap(), 36);
        assert_eq!(joined.get(&NoStore, 37).unwrap().as_long().unwrap(), 100);
    }

    #[test]
    fn common_prefix_of_equal_vectors_is_length() {
        for n in [0, 3, 16, 40, 256] {
            let a = build(0..n);
            let b = build(0..n);
            assert_eq!(
                a.common_prefix_length(&NoStore, &b).unwrap(),
                n as u64
            );
        }
    }

    #[test]
    fn common_prefix_finds_divergence_point() {
        for (n, k) in [(10u64, 4u64), (20, 17), (40, 16), (300, 255), (300, 0)] {
            // b agrees with a on the first k elements, then diverges.
            let mut cells = longs(0..n as i64);
            cells[k as usize] = Cell::long(-1);
            let a = build(0..n as i64);
            let b = Vector::of(&NoStore, cells).unwrap();
            assert_eq!(a.common_prefix_length(&NoStore, &b).unwrap(), k);
            assert_eq!(b.common_prefix_length(&NoStore, &a).unwrap(), k);
        }
    }

    #[test]
    fn common_prefix_bounded_by_shorter() {
        let a = build(0..100);
        let b = build(0..60);
        assert_eq!(a.common_prefix_length(&NoStore, &b).unwrap(), 60);
        assert_eq!(b.common_prefix_length(&NoStore, &a).unwrap(), 60);
    }
}
