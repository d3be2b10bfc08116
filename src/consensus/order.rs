/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! One peer's proposed total order of blocks.
//!
//! An order carries a vector of signed blocks and two monotonically non-decreasing
//! indices: everything below `consensus_point` is agreed by a stake-weighted
//! majority and frozen; everything below `proposal_point` has been proposed by this
//! peer. Invariant: `consensus_point <= proposal_point <= blocks.count()`.

use crate::cell::encoding::{write_vlc_u64, Reader};
use crate::cell::refs::{Ref, Resolver};
use crate::cell::vector::Vector;
use crate::cell::{Cell, Value};
use crate::error::Fault;
use crate::types::basic::{CellHash, Timestamp};

#[derive(Clone)]
pub struct Order {
    timestamp: Timestamp,
    proposal_point: u64,
    consensus_point: u64,
    blocks: Ref,
}

impl Order {
    /// The empty order every peer starts from.
    pub fn genesis() -> Order {
        Order {
            timestamp: Timestamp::new(0),
            proposal_point: 0,
            consensus_point: 0,
            blocks: Ref::of(Vector::empty().to_cell()),
        }
    }

    pub(crate) fn from_parts(
        timestamp: Timestamp,
        proposal_point: u64,
        consensus_point: u64,
        blocks: Vector,
    ) -> Order {
        Order {
            timestamp,
            proposal_point,
            consensus_point,
            blocks: Ref::of(blocks.to_cell()),
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn proposal_point(&self) -> u64 {
        self.proposal_point
    }

    pub fn consensus_point(&self) -> u64 {
        self.consensus_point
    }

    pub fn blocks_ref(&self) -> &Ref {
        &self.blocks
    }

    /// The block vector, resolved.
    pub fn blocks(&self, resolver: &dyn Resolver) -> Result<Vector, Fault> {
        Ok(self.blocks.resolve(resolver)?.as_vector()?.clone())
    }

    pub fn block_count(&self, resolver: &dyn Resolver) -> Result<u64, Fault> {
        Ok(self.blocks(resolver)?.count())
    }

    /// Append a signed block, bumping the proposal point past it.
    pub fn append_block(
        &self,
        resolver: &dyn Resolver,
        signed_block: Cell,
    ) -> Result<Order, Fault> {
        let blocks = self.blocks(resolver)?.append(resolver, signed_block)?;
        let length = blocks.count();
        Ok(Order {
            timestamp: self.timestamp,
            proposal_point: length,
            consensus_point: self.consensus_point,
            blocks: Ref::of(blocks.to_cell()),
        })
    }

    pub fn with_timestamp(&self, timestamp: Timestamp) -> Order {
        Order {
            timestamp,
            proposal_point: self.proposal_point,
            consensus_point: self.consensus_point,
            blocks: self.blocks.clone(),
        }
    }

    /// The key orders are ranked by when several beliefs carry an order for the
    /// same peer: timestamp first, then proposal point, consensus point, and the
    /// order cell hash as the final lexicographic tie-break.
    pub fn merge_rank(&self) -> (Timestamp, u64, u64, CellHash) {
        (
            self.timestamp,
            self.proposal_point,
            self.consensus_point,
            self.clone().into_cell().hash(),
        )
    }

    pub fn into_cell(self) -> Cell {
        Cell::new(Value::Order(self))
    }

    pub(crate) fn write(&self, w: &mut Vec<u8>) {
        write_vlc_u64(w, self.timestamp.int());
        write_vlc_u64(w, self.proposal_point);
        write_vlc_u64(w, self.consensus_point);
        self.blocks.write(w);
    }

    pub(crate) fn read(r: &mut Reader) -> Result<Order, Fault> {
        let timestamp = Timestamp::new(r.vlc_u64()?);
        let proposal_point = r.vlc_u64()?;
        let consensus_point = r.vlc_u64()?;
        if consensus_point > proposal_point {
            return Err(Fault::InvalidData("consensus point beyond proposal point"));
        }
        let blocks = Ref::read(r)?;
        Ok(Order {
            timestamp,
            proposal_point,
            consensus_point,
            blocks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::decode_cell;
    use crate::store::context::Context;
    use crate::store::memory::MemoryStore;
    use std::sync::Arc;

    #[test]
    fn append_advances_proposal_point() {
        let cx = Context::new(Arc::new(MemoryStore::new()));
        let order = Order::genesis();
        assert_eq!(order.block_count(&cx).unwrap(), 0);

        let appended = order.append_block(&cx, Cell::string("stand-in block")).unwrap();
        assert_eq!(appended.block_count(&cx).unwrap(), 1);
        assert_eq!(appended.proposal_point(), 1);
        assert_eq!(appended.consensus_point(), 0);
    }

    #[test]
    fn decode_rejects_inverted_points() {
        let cx = Context::new(Arc::new(MemoryStore::new()));
        let order = Order::genesis().append_block(&cx, Cell::long(1)).unwrap();
        let mut forged = Order {
            consensus_point: 5,
            ..order
        };
        forged.proposal_point = 1;
        let encoding = forged.into_cell().encoding().to_vec();
        assert!(matches!(
            decode_cell(&encoding),
            Err(Fault::InvalidData(_))
        ));
    }

    #[test]
    fn merge_rank_orders_by_timestamp_first() {
        let a = Order::genesis().with_timestamp(Timestamp::new(5));
        let b = Order::genesis().with_timestamp(Timestamp::new(9));
        assert!(a.merge_rank() < b.merge_rank());
    }
}
