/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The local peer value: keypair, state chain, current belief, and signed belief.
//!
//! `Peer` is immutable; every operation returns a new value, and the server
//! publishes the latest one atomically. The state chain holds the genesis state at
//! index 0 and one state per executed consensus block, so the chain length always
//! equals the own order's consensus point plus one.

use std::sync::Arc;

use log::warn;

use crate::cell::refs::Resolver;
use crate::cell::signed::SignedCell;
use crate::cell::vector::Vector;
use crate::cell::Cell;
use crate::error::Fault;
use crate::store::context::Context;
use crate::types::basic::{AccountKey, CellHash, Timestamp};
use crate::types::keypair::Keypair;
use crate::vm::Vm;

use super::belief::{merge_orders, retain_best, Belief};
use super::block::{codes, TxResult};
use super::order::Order;
use super::state::State;

#[derive(Clone)]
pub struct Peer {
    keypair: Arc<Keypair>,
    timestamp: Timestamp,
    belief: Belief,
    signed_belief: SignedCell,
    // State cells: genesis at 0, then one per executed consensus block.
    states: Vector,
    // One vector of TxResult cells per executed consensus block.
    results: Vector,
}

impl Peer {
    /// Create a fresh peer over `genesis`, with an empty own order.
    pub fn new(cx: &Context, keypair: Arc<Keypair>, genesis: State) -> Result<Peer, Fault> {
        let key = keypair.public();
        let signed_order = SignedCell::sign(&keypair, Order::genesis().into_cell()).into_cell();
        let belief = Belief::new(Timestamp::new(0)).with_order(key, signed_order);
        let signed_belief = SignedCell::sign(&keypair, belief.clone().into_cell());
        let states = Vector::of(cx, [genesis.into_cell()])?;
        Ok(Peer {
            keypair,
            timestamp: Timestamp::new(0),
            belief,
            signed_belief,
            states,
            results: Vector::empty(),
        })
    }

    pub fn key(&self) -> AccountKey {
        self.keypair.public()
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn belief(&self) -> &Belief {
        &self.belief
    }

    pub fn belief_cell(&self) -> Cell {
        self.belief.clone().into_cell()
    }

    /// The current belief signed by this peer, as broadcast to the network.
    pub fn signed_belief(&self) -> &SignedCell {
        &self.signed_belief
    }

    pub fn states(&self) -> &Vector {
        &self.states
    }

    pub fn results(&self) -> &Vector {
        &self.results
    }

    pub fn own_order(&self, resolver: &dyn Resolver) -> Result<Order, Fault> {
        let order_ref = self
            .belief
            .order_ref(&self.key())
            .ok_or(Fault::Internal("own order missing from belief".into()))?;
        let signed = order_ref.resolve(resolver)?;
        Ok(signed.as_signed()?.value(resolver)?.as_order()?.clone())
    }

    pub fn consensus_point(&self, resolver: &dyn Resolver) -> Result<u64, Fault> {
        Ok(self.own_order(resolver)?.consensus_point())
    }

    pub fn proposal_point(&self, resolver: &dyn Resolver) -> Result<u64, Fault> {
        Ok(self.own_order(resolver)?.proposal_point())
    }

    /// The state agreed at the current consensus point.
    pub fn consensus_state(&self, resolver: &dyn Resolver) -> Result<State, Fault> {
        let cell = self
            .states
            .last(resolver)?
            .ok_or(Fault::Internal("empty state chain".into()))?;
        Ok(cell.as_state()?.clone())
    }

    pub fn genesis_state(&self, resolver: &dyn Resolver) -> Result<State, Fault> {
        Ok(self.states.get(resolver, 0)?.as_state()?.clone())
    }

    /// The per-transaction results of consensus block `index`.
    pub fn block_results(&self, resolver: &dyn Resolver, index: u64) -> Result<Vec<TxResult>, Fault> {
        let cell = self.results.get(resolver, index)?;
        let vector = cell.as_vector()?;
        let mut out = Vec::with_capacity(vector.count() as usize);
        for i in 0..vector.count() {
            out.push(vector.get(resolver, i)?.as_result()?.clone());
        }
        Ok(out)
    }

    /// Refresh the peer timestamp. Determines what this peer will accept and stamp
    /// on its next proposal or merge; never moves backwards.
    pub fn update_timestamp(&self, now: Timestamp) -> Peer {
        let mut peer = self.clone();
        peer.timestamp = peer.timestamp.max(now);
        peer
    }

    /// Append `block` to the own order as a signed block and re-sign the belief.
    pub fn propose_block(&self, cx: &Context, block: Cell) -> Result<Peer, Fault> {
        let signed_block = SignedCell::sign(&self.keypair, block).into_cell();
        let order = self
            .own_order(cx)?
            .append_block(cx, signed_block)?
            .with_timestamp(self.timestamp);
        self.with_own_order(order)
    }

    /// Merge the given remote beliefs (whose signatures have already been checked)
    /// with the local belief, advancing consensus and executing newly agreed
    /// blocks through `vm`.
    ///
    /// Returns a peer whose belief cell hash equals the current one when nothing
    /// changed.
    pub fn merge_beliefs(
        &self,
        cx: &Context,
        vm: &dyn Vm,
        incoming: &[Belief],
    ) -> Result<Peer, Fault> {
        let state = self.consensus_state(cx)?;
        let stakes = state.stakes(cx)?;

        let mut views = Vec::with_capacity(incoming.len() + 1);
        views.push(self.belief.clone());
        views.extend_from_slice(incoming);
        let retained = retain_best(cx, &views)?;

        let own_key = self.key();
        let merged = merge_orders(cx, own_key, &retained, &stakes, self.timestamp)?;

        // Rebuild the belief from the retained orders, carrying remote signatures
        // through and re-signing only our own order.
        let mut belief = Belief::new(self.belief.timestamp());
        for (key, kept) in &retained {
            if key != &own_key {
                belief = belief.with_order(*key, kept.signed.clone());
            }
        }
        let signed_order = SignedCell::sign(&self.keypair, merged.clone().into_cell()).into_cell();
        belief = belief.with_order(own_key, signed_order);

        if belief.clone().into_cell().hash() == self.belief_cell().hash() {
            return Ok(self.clone());
        }
        let belief = belief.with_timestamp(self.timestamp);

        let mut peer = self.clone();
        peer.belief = belief.clone();
        peer.signed_belief = SignedCell::sign(&self.keypair, belief.into_cell());
        peer.execute_agreed_blocks(cx, vm, &merged)?;
        Ok(peer)
    }

    fn with_own_order(&self, order: Order) -> Result<Peer, Fault> {
        let signed_order = SignedCell::sign(&self.keypair, order.into_cell()).into_cell();
        let belief = self
            .belief
            .with_order(self.key(), signed_order)
            .with_timestamp(self.timestamp);
        let mut peer = self.clone();
        peer.signed_belief = SignedCell::sign(&self.keypair, belief.clone().into_cell());
        peer.belief = belief;
        Ok(peer)
    }

    /// Execute blocks between the executed point (states chain length minus one)
    /// and the merged order's consensus point, extending the state chain.
    fn execute_agreed_blocks(
        &mut self,
        cx: &Context,
        vm: &dyn Vm,
        order: &Order,
    ) -> Result<(), Fault> {
        let executed = self.states.count() - 1;
        let target = order.consensus_point();
        if target <= executed {
            return Ok(());
        }
        let blocks = order.blocks(cx)?;
        let mut state = self.consensus_state(cx)?;
        for index in executed..target {
            let block_cell = blocks.get(cx, index)?;
            let (next_state, block_results) = execute_block(cx, vm, state, &block_cell)?;
            state = next_state;
            let mut result_cells = Vector::empty();
            for result in block_results {
                result_cells = result_cells.append(cx, result.into_cell())?;
            }
            self.states = self.states.append(cx, state.clone().into_cell())?;
            self.results = self.results.append(cx, result_cells.to_cell())?;
        }
        Ok(())
    }

    /// Deep-persist the peer's belief and chains, reporting newly stored cells.
    pub fn persist(&self, cx: &Context, novelty: &mut dyn FnMut(&Cell)) -> Result<(), Fault> {
        cx.announce(&self.signed_belief.clone().into_cell(), novelty)?;
        cx.announce(&self.states.to_cell(), novelty)?;
        cx.announce(&self.results.to_cell(), novelty)?;
        Ok(())
    }

    /// The persistent representation: `[signed belief, states, results]`.
    pub fn to_data(&self, cx: &Context) -> Result<Cell, Fault> {
        let data = Vector::of(
            cx,
            [
                self.signed_belief.clone().into_cell(),
                self.states.to_cell(),
                self.results.to_cell(),
            ],
        )?;
        Ok(data.to_cell())
    }

    /// Deep-persist the peer data and anchor it as the store root.
    pub fn persist_data(&self, cx: &Context) -> Result<CellHash, Fault> {
        let data = self.to_data(cx)?;
        cx.persist(&data, crate::store::PersistMode::Deep)?;
        let hash = data.hash();
        cx.store().set_root(hash);
        Ok(hash)
    }

    /// Rebuild a peer from the store root written by [`persist_data`](Self::persist_data).
    pub fn restore(cx: &Context, keypair: Arc<Keypair>, root: CellHash) -> Result<Peer, Fault> {
        let data = cx.resolve_hash(&root)?;
        let vector = data.as_vector()?;
        if vector.count() != 3 {
            return Err(Fault::InvalidData("malformed peer data root"));
        }
        let signed_belief_cell = vector.get(cx, 0)?;
        let signed_belief = signed_belief_cell.as_signed()?.clone();
        let belief = signed_belief.value(cx)?.as_belief()?.clone();
        if signed_belief.signer() != keypair.public() {
            return Err(Fault::InvalidData("peer data signed by a different key"));
        }
        let states = vector.get(cx, 1)?.as_vector()?.clone();
        let results = vector.get(cx, 2)?.as_vector()?.clone();
        if states.is_empty() {
            return Err(Fault::InvalidData("restored state chain is empty"));
        }
        Ok(Peer {
            keypair,
            timestamp: belief.timestamp(),
            belief,
            signed_belief,
            states,
            results,
        })
    }
}

/// Execute every transaction of `block_cell` in sequence, yielding the post-state
/// and per-transaction results.
fn execute_block(
    cx: &Context,
    vm: &dyn Vm,
    state: State,
    block_cell: &Cell,
) -> Result<(State, Vec<TxResult>), Fault> {
    let signed = match block_cell.as_signed() {
        Ok(signed) if signed.verify() => signed,
        _ => {
            warn!("skipping consensus block with a bad proposer signature");
            return Ok((state, Vec::new()));
        }
    };
    let block = signed.value(cx)?;
    let block = block.as_block()?;
    let mut state = state;
    let mut results = Vec::new();
    for tx_cell in block.transactions(cx)? {
        let result = match tx_cell.as_signed() {
            Ok(signed_tx) if signed_tx.verify() => {
                let tx_value = signed_tx.value(cx)?;
                let tx = tx_value.as_transaction()?;
                let form = tx.form_cell(cx)?;
                let outcome = vm.execute(cx, &state, tx.address(), &form);
                match outcome.error {
                    None => {
                        state = outcome.state;
                        TxResult::ok(0, outcome.value)
                    }
                    Some(code) => TxResult::error(0, &code, outcome.value),
                }
            }
            _ => TxResult::error(0, codes::SIGNATURE, Cell::string("Bad Signature!")),
        };
        results.push(result);
    }
    Ok((state, results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::block::Block;
    use crate::consensus::state::PeerStatus;
    use crate::consensus::block::Transaction;
    use crate::store::memory::MemoryStore;
    use crate::store::Store;
    use crate::types::basic::{Address, Stake};
    use crate::vm::Outcome;

    fn context() -> Context {
        Context::new(Arc::new(MemoryStore::new()))
    }

    /// Counts executed transactions into the accounts cell.
    struct CountingVm;

    impl Vm for CountingVm {
        fn execute(&self, cx: &Context, state: &State, _address: Address, form: &Cell) -> Outcome {
            let executed = state
                .accounts(cx)
                .ok()
                .and_then(|cell| cell.as_long().ok())
                .unwrap_or(0);
            match form.as_long() {
                Ok(value) => Outcome::ok(
                    state.with_accounts(Cell::long(executed + 1)),
                    Cell::long(value * 2),
                ),
                Err(_) => Outcome::error(state.clone(), codes::EXCEPTION, Cell::string("bad form")),
            }
        }
    }

    fn genesis(peers: Vec<(AccountKey, u64)>) -> State {
        State::new(
            Vector::empty().to_cell(),
            Cell::long(0),
            peers
                .into_iter()
                .map(|(key, stake)| (key, PeerStatus::new(Stake::new(stake), None)))
                .collect(),
        )
    }

    fn transact(keypair: &Keypair, form: Cell) -> Cell {
        let tx = Transaction::new(Address::new(1), -1, form).into_cell();
        SignedCell::sign(keypair, tx).into_cell()
    }

    fn propose(cx: &Context, peer: &Peer, keypair: &Keypair, forms: Vec<Cell>) -> Peer {
        let txs: Vec<Cell> = forms
            .into_iter()
            .map(|form| transact(keypair, form))
            .collect();
        let block = Block::new(cx, peer.timestamp(), keypair.public(), txs)
            .unwrap()
            .into_cell();
        peer.propose_block(cx, block).unwrap()
    }

    #[test]
    fn single_peer_proposal_reaches_consensus_and_executes() {
        let cx = context();
        let keypair = Arc::new(Keypair::from_seed(543212345));
        let state = genesis(vec![(keypair.public(), 100)]);
        let peer = Peer::new(&cx, keypair.clone(), state).unwrap();

        let peer = peer.update_timestamp(Timestamp::new(1000));
        let peer = propose(&cx, &peer, &keypair, vec![Cell::long(21)]);
        let merged = peer.merge_beliefs(&cx, &CountingVm, &[]).unwrap();

        assert_eq!(merged.consensus_point(&cx).unwrap(), 1);
        let results = merged.block_results(&cx, 0).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].value(&cx).unwrap().as_long().unwrap(), 42);
        assert_eq!(
            merged
                .consensus_state(&cx)
                .unwrap()
                .accounts(&cx)
                .unwrap()
                .as_long()
                .unwrap(),
            1
        );
    }

    #[test]
    fn replaying_consensus_blocks_is_deterministic() {
        let cx = context();
        let keypair = Arc::new(Keypair::from_seed(543212345));
        let state = genesis(vec![(keypair.public(), 100)]);

        let run = || -> CellHash {
            let peer = Peer::new(&cx, keypair.clone(), state.clone()).unwrap();
            let peer = peer.update_timestamp(Timestamp::new(1000));
            let peer = propose(&cx, &peer, &keypair, vec![Cell::long(21), Cell::long(5)]);
            let merged = peer.merge_beliefs(&cx, &CountingVm, &[]).unwrap();
            merged.consensus_state(&cx).unwrap().into_cell().hash()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn two_peers_agree_on_state() {
        let cx = context();
        let kp = Arc::new(Keypair::from_seed(1));
        let kq = Arc::new(Keypair::from_seed(2));
        let state = genesis(vec![(kp.public(), 50), (kq.public(), 50)]);

        let mut p = Peer::new(&cx, kp.clone(), state.clone()).unwrap();
        let mut q = Peer::new(&cx, kq.clone(), state).unwrap();

        p = p.update_timestamp(Timestamp::new(1000));
        q = q.update_timestamp(Timestamp::new(1001));
        p = propose(&cx, &p, &kp, vec![Cell::long(1)]);
        q = propose(&cx, &q, &kq, vec![Cell::long(2)]);

        // Gossip beliefs until both settle; a few rounds suffice.
        for round in 0..4u64 {
            let now = Timestamp::new(1010 + round);
            let p_view = q.belief().clone();
            let q_view = p.belief().clone();
            p = p.update_timestamp(now).merge_beliefs(&cx, &CountingVm, &[p_view]).unwrap();
            q = q.update_timestamp(now).merge_beliefs(&cx, &CountingVm, &[q_view]).unwrap();
        }

        assert_eq!(p.consensus_point(&cx).unwrap(), 2);
        assert_eq!(q.consensus_point(&cx).unwrap(), 2);
        assert_eq!(
            p.consensus_state(&cx).unwrap().into_cell().hash(),
            q.consensus_state(&cx).unwrap().into_cell().hash()
        );
        assert_eq!(
            p.own_order(&cx).unwrap().blocks(&cx).unwrap(),
            q.own_order(&cx).unwrap().blocks(&cx).unwrap()
        );
    }

    #[test]
    fn bad_transaction_signature_yields_signature_result() {
        let cx = context();
        let keypair = Arc::new(Keypair::from_seed(7));
        let state = genesis(vec![(keypair.public(), 100)]);
        let peer = Peer::new(&cx, keypair.clone(), state).unwrap();
        let peer = peer.update_timestamp(Timestamp::new(1000));

        // A transaction whose signature bytes are corrupted.
        let tx = Transaction::new(Address::new(1), -1, Cell::long(3)).into_cell();
        let signed = SignedCell::sign(&keypair, tx);
        let mut bad = signed.signature().bytes();
        bad[0] ^= 0x01;
        let forged = SignedCell::new(
            signed.signer(),
            crate::types::basic::SignatureBytes::new(bad),
            signed.value_ref().clone(),
        )
        .into_cell();

        let block = Block::new(&cx, Timestamp::new(1000), keypair.public(), vec![forged])
            .unwrap()
            .into_cell();
        let peer = peer.propose_block(&cx, block).unwrap();
        let merged = peer.merge_beliefs(&cx, &CountingVm, &[]).unwrap();

        let results = merged.block_results(&cx, 0).unwrap();
        assert_eq!(results[0].error_code(), Some(codes::SIGNATURE));
        // State untouched by the failed transaction.
        assert_eq!(
            merged
                .consensus_state(&cx)
                .unwrap()
                .accounts(&cx)
                .unwrap()
                .as_long()
                .unwrap(),
            0
        );
    }

    #[test]
    fn persist_and_restore_preserve_belief_and_consensus() {
        let store = Arc::new(MemoryStore::new());
        let cx = Context::new(store.clone());
        let keypair = Arc::new(Keypair::from_seed(9));
        let state = genesis(vec![(keypair.public(), 100)]);
        let peer = Peer::new(&cx, keypair.clone(), state).unwrap();
        let peer = peer.update_timestamp(Timestamp::new(1000));
        let peer = propose(&cx, &peer, &keypair, vec![Cell::long(4)]);
        let peer = peer.merge_beliefs(&cx, &CountingVm, &[]).unwrap();

        let root = peer.persist_data(&cx).unwrap();
        assert_eq!(store.root(), Some(root));

        let restored = Peer::restore(&cx, keypair, root).unwrap();
        assert_eq!(
            restored.belief_cell().hash(),
            peer.belief_cell().hash()
        );
        assert_eq!(restored.consensus_point(&cx).unwrap(), 1);
        assert_eq!(
            restored.consensus_state(&cx).unwrap().into_cell().hash(),
            peer.consensus_state(&cx).unwrap().into_cell().hash()
        );
    }
}
