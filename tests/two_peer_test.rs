//! Two-peer agreement: transactions submitted to different peers end up in the
//! same consensus prefix with identical state hashes on both sides.

mod common;

use std::sync::Arc;
use std::time::Duration;

use converge::{MemoryStore, PeerConfig, Server};

use common::{await_until, genesis, keypair, setup_logger, signed_invoke, ArithVm, Client};

#[test]
fn two_peers_reach_agreement() {
    setup_logger(log::LevelFilter::Warn);
    let kp = keypair(1);
    let kq = keypair(2);
    let state = genesis(&[(kp.public(), 50, None), (kq.public(), 50, None)]);

    let p = Server::launch(
        PeerConfig::new(kp.clone(), Arc::new(MemoryStore::new()), state.clone()),
        Arc::new(ArithVm),
    )
    .unwrap();
    let q = Server::launch(
        PeerConfig::new(kq.clone(), Arc::new(MemoryStore::new()), state),
        Arc::new(ArithVm),
    )
    .unwrap();

    p.connect(kq.public(), &format!("localhost:{}", q.port())).unwrap();
    q.connect(kp.public(), &format!("localhost:{}", p.port())).unwrap();

    // Submit one transaction to each peer within a narrow window.
    let mut client_p = Client::connect(p.port());
    let mut client_q = Client::connect(q.port());
    client_p.transact(1, signed_invoke(&kp, 1, -1, "(+ 1 2)"));
    client_q.transact(2, signed_invoke(&kq, 2, -1, "(* 2 2)"));

    let result_p = client_p.await_result(1, Duration::from_secs(10));
    let result_q = client_q.await_result(2, Duration::from_secs(10));
    assert!(!result_p.is_error());
    assert!(!result_q.is_error());
    assert_eq!(result_p.value(p.context()).unwrap().as_long().unwrap(), 3);
    assert_eq!(result_q.value(q.context()).unwrap().as_long().unwrap(), 4);

    // Both blocks reach the consensus prefix on both sides.
    assert!(await_until(Duration::from_secs(10), || {
        p.consensus_point().unwrap() == 2 && q.consensus_point().unwrap() == 2
    }));

    let p_state = p.peer().consensus_state(p.context()).unwrap().into_cell().hash();
    let q_state = q.peer().consensus_state(q.context()).unwrap().into_cell().hash();
    assert_eq!(p_state, q_state);

    let p_blocks = p
        .peer()
        .own_order(p.context())
        .unwrap()
        .blocks(p.context())
        .unwrap();
    let q_blocks = q
        .peer()
        .own_order(q.context())
        .unwrap()
        .blocks(q.context())
        .unwrap();
    assert_eq!(p_blocks.count(), 2);
    assert_eq!(
        p_blocks.to_cell().hash(),
        q_blocks.to_cell().hash()
    );

    p.close();
    q.close();
}
