/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Peer state: the replicated [`State`](state::State), [`Block`](block::Block)s and
//! [`Order`](order::Order)s, [`Belief`](belief::Belief)s with their deterministic
//! merge, and the local [`Peer`](peer::Peer) composite.

pub mod belief;

pub mod block;

pub mod order;

pub mod peer;

pub mod state;
