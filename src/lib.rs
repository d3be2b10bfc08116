/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A decentralized consensus peer over a content-addressed, persistent data model.
//!
//! `converge` implements the core of a peer that participates in a network of
//! untrusted peers to reach agreement on an ordered log of signed transactions.
//! Each peer maintains a local [`Belief`](consensus::belief::Belief), its view of
//! every participating peer's proposed ordering, merges incoming beliefs with a
//! deterministic, stake-weighted function, and advances a shared consensus point
//! over the resulting total order. Executed transactions mutate a replicated
//! [`State`](consensus::state::State) whose history is content-addressed.
//!
//! The crate is organised leaf-first:
//! - [`cell`]: the immutable data model with canonical encoding, identity hashing,
//!   lazy refs, and the chunked persistent vector.
//! - [`store`]: the hash-to-cell repository with shallow/deep persistence and a
//!   root anchor for restart, accessed through an explicit
//!   [`Context`](store::context::Context).
//! - [`consensus`]: peer state values and the belief merge.
//! - [`messages`] and [`net`]: the typed wire protocol over framed TCP.
//! - [`server`]: the peer server with dispatch, block proposal, merge loop,
//!   challenge handshake, and periodic tasks.
//!
//! Execution of transactions and signature of octet sequences are the embedder's
//! concern, reached through the [`Vm`](vm::Vm) trait and
//! [`Keypair`](types::keypair::Keypair) respectively. Launch a peer with
//! [`Server::launch`](server::Server::launch) and a [`PeerConfig`](config::PeerConfig).

pub mod cell;

pub mod config;

pub mod consensus;

pub mod error;

pub mod logging;

pub mod messages;

pub mod net;

pub mod server;

pub mod store;

pub mod types;

pub mod vm;

// Re-exports of the types most embedders touch.
pub use cell::refs::Ref;
pub use cell::signed::SignedCell;
pub use cell::vector::Vector;
pub use cell::{Cell, Value};
pub use config::PeerConfig;
pub use error::Fault;
pub use messages::{Message, MessageKind};
pub use server::Server;
pub use store::context::Context;
pub use store::memory::MemoryStore;
pub use store::{PersistMode, Store};
pub use types::basic::{AccountKey, Address, CellHash, SignatureBytes, Stake, Timestamp, TotalStake};
pub use types::keypair::Keypair;
pub use vm::{Outcome, Vm};
