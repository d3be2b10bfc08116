/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Configuration as specified by the embedder.

use std::sync::Arc;
use std::time::Duration;

use crate::consensus::state::State;
use crate::store::Store;
use crate::types::keypair::Keypair;

/// Configuration of one peer server. The mandatory pieces go through
/// [`new`](PeerConfig::new); everything else has a sensible default and is a plain
/// public field.
#[derive(Clone)]
pub struct PeerConfig {
    /// The keypair this peer signs blocks, orders and beliefs with.
    pub keypair: Arc<Keypair>,

    /// The store backing this server. Pinned into every worker's context.
    pub store: Arc<dyn Store>,

    /// The genesis state, received as an opaque value from the embedder.
    pub genesis: State,

    /// Port to bind on. `None` binds an ephemeral port.
    pub bind_port: Option<u16>,

    /// The URL other peers should connect to us at. Defaults to
    /// `localhost:<bound port>`.
    pub advertised_url: Option<String>,

    /// Rebuild the peer from the store's root hash on startup, if one is set.
    pub restore_from_root: bool,

    /// Deep-store the final peer value and anchor it at the store root on close.
    pub persist_on_close: bool,

    /// Capacity of the bounded receive queue; inbound messages are dropped beyond
    /// it.
    pub receive_queue_size: usize,

    /// Pause of the update loop when there is nothing new to process.
    pub update_pause: Duration,

    /// Pause between connection-reconciliation rounds.
    pub connection_pause: Duration,

    /// How long a parked partial message waits for its missing data before being
    /// discarded.
    pub partial_expiry: Duration,
}

impl PeerConfig {
    pub fn new(keypair: Arc<Keypair>, store: Arc<dyn Store>, genesis: State) -> PeerConfig {
        PeerConfig {
            keypair,
            store,
            genesis,
            bind_port: None,
            advertised_url: None,
            restore_from_root: false,
            persist_on_close: false,
            receive_queue_size: 10_000,
            update_pause: Duration::from_millis(1),
            connection_pause: Duration::from_secs(2),
            partial_expiry: Duration::from_secs(30),
        }
    }
}
