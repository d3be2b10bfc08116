/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Beliefs and the deterministic merge that drives consensus.
//!
//! A belief is one peer's local view of every known peer's [`Order`], each entry
//! carrying the remote peer's own signature. Merging the beliefs received from the
//! network is a pure function of the retained orders and the stake map, so any two
//! peers that have seen the same orders compute the same merged order. That is
//! what makes the network converge.
//!
//! The merge proceeds in three steps:
//! 1. For every peer key, retain the signed order with the greatest
//!    (timestamp, proposal point, consensus point, hash) rank, dropping entries
//!    whose signature does not verify.
//! 2. Find the longest block prefix supported by a stake-weighted quorum of the
//!    retained orders. The quorum exceeds half the total stake, so at most one
//!    prefix of a given length can reach it. The local consensus point advances to
//!    that length and never decreases; blocks below it are never replaced.
//! 3. Extend the agreed prefix with every remaining distinct block across the
//!    retained orders, ordered by (block timestamp, block hash).

use std::collections::{BTreeMap, HashSet};

use crate::cell::encoding::{write_vlc_u64, Reader};
use crate::cell::refs::{Ref, Resolver};
use crate::cell::vector::Vector;
use crate::cell::{Cell, Value};
use crate::error::Fault;
use crate::types::basic::{AccountKey, CellHash, Stake, Timestamp, TotalStake};

use super::order::Order;

/// A mapping `peer key → signed order`: the local view of every known peer's
/// proposed ordering.
#[derive(Clone)]
pub struct Belief {
    timestamp: Timestamp,
    // Refs to Signed(Order) cells, in ascending key order.
    orders: Vec<(AccountKey, Ref)>,
}

impl Belief {
    pub fn new(timestamp: Timestamp) -> Belief {
        Belief {
            timestamp,
            orders: Vec::new(),
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn orders(&self) -> &[(AccountKey, Ref)] {
        &self.orders
    }

    pub(crate) fn order_refs(&self) -> Vec<Ref> {
        self.orders.iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn order_ref(&self, key: &AccountKey) -> Option<&Ref> {
        match self.orders.binary_search_by_key(key, |(k, _)| *k) {
            Ok(index) => Some(&self.orders[index].1),
            Err(_) => None,
        }
    }

    /// This belief with `key`'s entry replaced by (or inserted as) `signed_order`.
    pub fn with_order(&self, key: AccountKey, signed_order: Cell) -> Belief {
        let mut orders = self.orders.clone();
        match orders.binary_search_by_key(&key, |(k, _)| *k) {
            Ok(index) => orders[index].1 = Ref::of(signed_order),
            Err(index) => orders.insert(index, (key, Ref::of(signed_order))),
        }
        Belief {
            timestamp: self.timestamp,
            orders,
        }
    }

    pub fn with_timestamp(&self, timestamp: Timestamp) -> Belief {
        Belief {
            timestamp,
            orders: self.orders.clone(),
        }
    }

    pub fn into_cell(self) -> Cell {
        Cell::new(Value::Belief(self))
    }

    pub(crate) fn write(&self, w: &mut Vec<u8>) {
        write_vlc_u64(w, self.timestamp.int());
        write_vlc_u64(w, self.orders.len() as u64);
        for (key, order) in &self.orders {
            w.extend_from_slice(&key.bytes());
            order.write(w);
        }
    }

    pub(crate) fn read(r: &mut Reader) -> Result<Belief, Fault> {
        let timestamp = Timestamp::new(r.vlc_u64()?);
        let n = r.vlc_u64()? as usize;
        let mut orders = Vec::with_capacity(n);
        let mut previous: Option<AccountKey> = None;
        for _ in 0..n {
            let key = AccountKey::new(r.array32()?);
            if previous.map_or(false, |p| p >= key) {
                return Err(Fault::BadFormat("belief keys not in ascending order"));
            }
            previous = Some(key);
            orders.push((key, Ref::read(r)?));
        }
        Ok(Belief { timestamp, orders })
    }
}

/// A signed order surviving step 1 of the merge.
pub(crate) struct Retained {
    /// The Signed(Order) cell exactly as it arrived, so it can be carried into the
    /// merged belief without re-signing.
    pub signed: Cell,
    pub order: Order,
}

/// Retain, for every peer key across `beliefs`, the best-ranked order whose
/// signature verifies against that key.
pub(crate) fn retain_best(
    resolver: &dyn Resolver,
    beliefs: &[Belief],
) -> Result<BTreeMap<AccountKey, Retained>, Fault> {
    let mut retained: BTreeMap<AccountKey, Retained> = BTreeMap::new();
    for belief in beliefs {
        for (key, order_ref) in belief.orders() {
            let signed_cell = order_ref.resolve(resolver)?;
            let signed = match signed_cell.as_signed() {
                Ok(signed) => signed,
                Err(_) => continue,
            };
            if signed.signer() != *key || !signed.verify() {
                continue;
            }
            let order = match signed.value(resolver) {
                Ok(cell) => match cell.as_order() {
                    Ok(order) => order.clone(),
                    Err(_) => continue,
                },
                Err(fault @ Fault::Missing(_)) => return Err(fault),
                Err(_) => continue,
            };
            let better = match retained.get(key) {
                None => true,
                Some(current) => order.merge_rank() > current.order.merge_rank(),
            };
            if better {
                retained.insert(
                    *key,
                    Retained {
                        signed: signed_cell,
                        order,
                    },
                );
            }
        }
    }
    Ok(retained)
}

fn stake_of(stakes: &[(AccountKey, Stake)], key: &AccountKey) -> Stake {
    stakes
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, stake)| *stake)
        .unwrap_or(Stake::new(0))
}

/// Compute the merged order for the local peer from the retained orders.
///
/// Returns the local peer's current order unchanged (same timestamp) when the merge
/// would alter nothing, so an unchanged belief is detectable by hash.
pub(crate) fn merge_orders(
    resolver: &dyn Resolver,
    own_key: AccountKey,
    retained: &BTreeMap<AccountKey, Retained>,
    stakes: &[(AccountKey, Stake)],
    now: Timestamp,
) -> Result<Order, Fault> {
    let own = retained
        .get(&own_key)
        .ok_or(Fault::Internal("own order absent from merge".into()))?;
    let own_blocks = own.order.blocks(resolver)?;
    let own_cp = own.order.consensus_point();

    let mut total = TotalStake::new(0);
    for (_, stake) in stakes {
        total += *stake;
    }
    let quorum = total.quorum();

    // Step 2: the longest prefix of any retained order that a quorum of stake
    // supports. An order supports length k of a candidate iff their common prefix
    // is at least k long.
    let mut best_len: u64 = 0;
    let mut best_blocks: Option<Vector> = None;
    for (key, candidate) in retained {
        let candidate_blocks = candidate.order.blocks(resolver)?;
        let mut supports: Vec<(u64, Stake)> = Vec::new();
        for (other_key, other) in retained {
            let stake = stake_of(stakes, other_key);
            if stake.int() == 0 {
                continue;
            }
            let agreed = if other_key == key {
                candidate_blocks.count()
            } else {
                other
                    .order
                    .blocks(resolver)?
                    .common_prefix_length(resolver, &candidate_blocks)?
            };
            supports.push((agreed, stake));
        }
        supports.sort_by(|a, b| b.0.cmp(&a.0));
        let mut accumulated = TotalStake::new(0);
        for (agreed, stake) in supports {
            accumulated += stake;
            if accumulated >= quorum {
                if agreed > best_len {
                    best_len = agreed;
                    best_blocks = Some(candidate_blocks.clone());
                }
                break;
            }
        }
    }

    // Never decrease the consensus point, and never replace a block below it.
    let (base, new_cp) = match best_blocks {
        Some(candidate)
            if best_len >= own_cp
                && candidate.common_prefix_length(resolver, &own_blocks)? >= own_cp =>
        {
            (candidate.sub_vector(resolver, 0, best_len)?, best_len)
        }
        _ => (own_blocks.sub_vector(resolver, 0, own_cp)?, own_cp),
    };

    // Step 3: adopt every remaining distinct block, in (timestamp, hash) order.
    // This is a pure function of the retained orders, so peers converge on it.
    let mut included: HashSet<CellHash> = HashSet::new();
    for i in 0..base.count() {
        included.insert(base.element_ref(resolver, i)?.hash());
    }
    let mut extension: Vec<(u64, CellHash, Cell)> = Vec::new();
    for retained_order in retained.values() {
        let blocks = retained_order.order.blocks(resolver)?;
        for i in 0..blocks.count() {
            let block_ref = blocks.element_ref(resolver, i)?;
            let hash = block_ref.hash();
            if included.contains(&hash) {
                continue;
            }
            let cell = block_ref.resolve(resolver)?;
            let timestamp = match block_timestamp(resolver, &cell) {
                Ok(ts) => ts,
                Err(fault @ Fault::Missing(_)) => return Err(fault),
                Err(_) => continue, // not a valid signed block; do not adopt
            };
            included.insert(hash);
            extension.push((timestamp.int(), hash, cell));
        }
    }
    extension.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

    let mut blocks = base;
    for (_, _, cell) in extension {
        blocks = blocks.append(resolver, cell)?;
    }

    if new_cp == own_cp && blocks == own_blocks {
        return Ok(own.order.clone());
    }

    let proposal_point = blocks.count();
    let timestamp = now.max(own.order.timestamp());
    Ok(Order::from_parts(timestamp, proposal_point, new_cp, blocks))
}

fn block_timestamp(resolver: &dyn Resolver, cell: &Cell) -> Result<Timestamp, Fault> {
    let signed = cell.as_signed()?;
    let block = signed.value(resolver)?;
    Ok(block.as_block()?.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::decode_cell;
    use crate::cell::signed::SignedCell;
    use crate::consensus::block::Block;
    use crate::store::context::Context;
    use crate::store::memory::MemoryStore;
    use crate::types::keypair::Keypair;
    use std::sync::Arc;

    fn context() -> Context {
        Context::new(Arc::new(MemoryStore::new()))
    }

    fn signed_order(keypair: &Keypair, order: &Order) -> Cell {
        SignedCell::sign(keypair, order.clone().into_cell()).into_cell()
    }

    fn block_cell(cx: &Context, keypair: &Keypair, ts: u64) -> Cell {
        let block = Block::new(cx, Timestamp::new(ts), keypair.public(), vec![]).unwrap();
        SignedCell::sign(keypair, block.into_cell()).into_cell()
    }

    fn belief_of(entries: Vec<(&Keypair, &Order)>) -> Belief {
        let mut belief = Belief::new(Timestamp::new(1));
        for (keypair, order) in entries {
            belief = belief.with_order(keypair.public(), signed_order(keypair, order));
        }
        belief
    }

    #[test]
    fn belief_roundtrip() {
        let keypair = Keypair::from_seed(1);
        let belief = belief_of(vec![(&keypair, &Order::genesis())]);
        let cell = belief.into_cell();
        let decoded = decode_cell(cell.encoding()).unwrap();
        assert_eq!(decoded.hash(), cell.hash());
        assert_eq!(decoded.as_belief().unwrap().orders().len(), 1);
    }

    #[test]
    fn retain_drops_forged_orders() {
        let cx = context();
        let honest = Keypair::from_seed(1);
        let forger = Keypair::from_seed(2);
        // The forger claims the honest peer's key on an order it signed itself.
        let order = Order::genesis().with_timestamp(Timestamp::new(10));
        let belief =
            Belief::new(Timestamp::new(1)).with_order(honest.public(), signed_order(&forger, &order));
        let retained = retain_best(&cx, &[belief]).unwrap();
        assert!(retained.is_empty());
    }

    #[test]
    fn retain_keeps_highest_ranked_order() {
        let cx = context();
        let keypair = Keypair::from_seed(1);
        let older = Order::genesis().with_timestamp(Timestamp::new(10));
        let newer = Order::genesis().with_timestamp(Timestamp::new(20));
        let beliefs = [
            belief_of(vec![(&keypair, &newer)]),
            belief_of(vec![(&keypair, &older)]),
        ];
        let retained = retain_best(&cx, &beliefs).unwrap();
        assert_eq!(
            retained[&keypair.public()].order.timestamp(),
            Timestamp::new(20)
        );
    }

    #[test]
    fn sole_staked_peer_reaches_consensus_alone() {
        let cx = context();
        let keypair = Keypair::from_seed(1);
        let order = Order::genesis()
            .append_block(&cx, block_cell(&cx, &keypair, 5))
            .unwrap()
            .with_timestamp(Timestamp::new(5));
        let belief = belief_of(vec![(&keypair, &order)]);
        let retained = retain_best(&cx, &[belief]).unwrap();
        let stakes = vec![(keypair.public(), Stake::new(100))];
        let merged = merge_orders(
            &cx,
            keypair.public(),
            &retained,
            &stakes,
            Timestamp::new(6),
        )
        .unwrap();
        assert_eq!(merged.consensus_point(), 1);
        assert_eq!(merged.proposal_point(), 1);
    }

    #[test]
    fn equal_stake_peers_converge_on_the_same_extension() {
        let cx = context();
        let p = Keypair::from_seed(1);
        let q = Keypair::from_seed(2);
        let stakes = vec![(p.public(), Stake::new(50)), (q.public(), Stake::new(50))];

        let p_order = Order::genesis()
            .append_block(&cx, block_cell(&cx, &p, 100))
            .unwrap()
            .with_timestamp(Timestamp::new(100));
        let q_order = Order::genesis()
            .append_block(&cx, block_cell(&cx, &q, 101))
            .unwrap()
            .with_timestamp(Timestamp::new(101));

        // Both peers see both orders and must compute identical merged blocks.
        let view = [belief_of(vec![(&p, &p_order), (&q, &q_order)])];
        let retained = retain_best(&cx, &view).unwrap();
        let merged_p =
            merge_orders(&cx, p.public(), &retained, &stakes, Timestamp::new(102)).unwrap();
        let merged_q =
            merge_orders(&cx, q.public(), &retained, &stakes, Timestamp::new(102)).unwrap();

        assert_eq!(merged_p.blocks(&cx).unwrap(), merged_q.blocks(&cx).unwrap());
        assert_eq!(merged_p.block_count(&cx).unwrap(), 2);
        // No quorum on a non-empty prefix yet.
        assert_eq!(merged_p.consensus_point(), 0);

        // One more exchange: with identical orders on both sides, the full prefix
        // reaches quorum.
        let p2 = merged_p.with_timestamp(Timestamp::new(103));
        let q2 = merged_q.with_timestamp(Timestamp::new(103));
        let view2 = [belief_of(vec![(&p, &p2), (&q, &q2)])];
        let retained2 = retain_best(&cx, &view2).unwrap();
        let settled =
            merge_orders(&cx, p.public(), &retained2, &stakes, Timestamp::new(104)).unwrap();
        assert_eq!(settled.consensus_point(), 2);
    }

    #[test]
    fn consensus_point_never_decreases() {
        let cx = context();
        let p = Keypair::from_seed(1);
        let q = Keypair::from_seed(2);
        // P holds all the stake and has consensus over one block.
        let stakes = vec![(p.public(), Stake::new(100)), (q.public(), Stake::new(0))];
        let p_order = Order::genesis()
            .append_block(&cx, block_cell(&cx, &p, 50))
            .unwrap()
            .with_timestamp(Timestamp::new(50));
        let view = [belief_of(vec![(&p, &p_order)])];
        let retained = retain_best(&cx, &view).unwrap();
        let advanced =
            merge_orders(&cx, p.public(), &retained, &stakes, Timestamp::new(51)).unwrap();
        assert_eq!(advanced.consensus_point(), 1);

        // A later merge including an unrelated order cannot roll the point back.
        let q_order = Order::genesis()
            .append_block(&cx, block_cell(&cx, &q, 60))
            .unwrap()
            .with_timestamp(Timestamp::new(60));
        let view2 = [belief_of(vec![(&p, &advanced), (&q, &q_order)])];
        let retained2 = retain_best(&cx, &view2).unwrap();
        let merged =
            merge_orders(&cx, p.public(), &retained2, &stakes, Timestamp::new(61)).unwrap();
        assert!(merged.consensus_point() >= 1);
        // The agreed block is still first.
        assert_eq!(
            merged.blocks(&cx).unwrap().element_ref(&cx, 0).unwrap().hash(),
            advanced.blocks(&cx).unwrap().element_ref(&cx, 0).unwrap().hash()
        );
    }

    #[test]
    fn unchanged_merge_returns_identical_order() {
        let cx = context();
        let keypair = Keypair::from_seed(1);
        let stakes = vec![(keypair.public(), Stake::new(100))];
        let order = Order::genesis()
            .append_block(&cx, block_cell(&cx, &keypair, 5))
            .unwrap()
            .with_timestamp(Timestamp::new(5));
        let view = [belief_of(vec![(&keypair, &order)])];
        let retained = retain_best(&cx, &view).unwrap();
        let merged =
            merge_orders(&cx, keypair.public(), &retained, &stakes, Timestamp::new(6)).unwrap();

        // Merging again with nothing new yields the same order cell, timestamp
        // included, so no belief change is detected or rebroadcast.
        let view2 = [belief_of(vec![(&keypair, &merged)])];
        let retained2 = retain_best(&cx, &view2).unwrap();
        let again =
            merge_orders(&cx, keypair.public(), &retained2, &stakes, Timestamp::new(60)).unwrap();
        assert_eq!(
            again.clone().into_cell().hash(),
            merged.clone().into_cell().hash()
        );
    }
}
