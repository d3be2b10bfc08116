//! Restart recovery: a peer closed under persist mode restores its belief and
//! consensus point from the store root.

mod common;

use std::sync::Arc;
use std::time::Duration;

use converge::{MemoryStore, PeerConfig, Server, Store};

use common::{await_until, genesis, keypair, setup_logger, signed_invoke, ArithVm, Client};

#[test]
fn restart_recovers_belief_and_consensus() {
    setup_logger(log::LevelFilter::Warn);
    let signer = keypair(42);
    let store = Arc::new(MemoryStore::new());
    let state = genesis(&[(signer.public(), 100, None)]);

    let (belief_hash, consensus_point) = {
        let mut config = PeerConfig::new(signer.clone(), store.clone(), state.clone());
        config.persist_on_close = true;
        let server = Server::launch(config, Arc::new(ArithVm)).unwrap();

        // Two transactions submitted one after the other, so two blocks reach
        // consensus.
        let mut client = Client::connect(server.port());
        client.transact(1, signed_invoke(&signer, 1, -1, "(+ 1 2)"));
        client.await_result(1, Duration::from_secs(5));
        client.transact(2, signed_invoke(&signer, 1, -1, "(+ 2 3)"));
        client.await_result(2, Duration::from_secs(5));
        assert!(await_until(Duration::from_secs(5), || {
            server.consensus_point().unwrap() == 2
        }));

        let belief_hash = server.belief_hash();
        let consensus_point = server.consensus_point().unwrap();
        server.close();
        (belief_hash, consensus_point)
    };
    assert!(store.root().is_some());

    let mut config = PeerConfig::new(signer, store, state);
    config.restore_from_root = true;
    let restored = Server::launch(config, Arc::new(ArithVm)).unwrap();

    assert_eq!(restored.belief_hash(), belief_hash);
    assert_eq!(restored.consensus_point().unwrap(), consensus_point);
    restored.close();
}
