/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The peer server.
//!
//! A server owns three long-lived workers plus the transport layer:
//! - The **receiver** dequeues framed messages from the bounded receive queue and
//!   dispatches them by type.
//! - The **updater** owns the peer value. Each tick it refreshes the timestamp,
//!   publishes a pending block if any, merges pending beliefs, executes newly
//!   agreed blocks, reports results to interested clients, and broadcasts.
//! - The **connector** periodically reconciles the live connection set with the
//!   peer list in the current consensus state and issues challenges to untrusted
//!   connections.
//!
//! The server never panics on an inbound message: protocol violations close the
//! offending connection, bad signatures drop the message, and missing data parks
//! the message while the hash is pulled from the originating connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{debug, error, info, warn};
use rand::RngCore;

use crate::cell::signed::SignedCell;
use crate::cell::vector::Vector;
use crate::cell::Cell;
use crate::config::PeerConfig;
use crate::consensus::belief::Belief;
use crate::consensus::block::{codes, Block, TxResult};
use crate::consensus::peer::Peer;
use crate::error::Fault;
use crate::logging::{
    short_hash, BELIEF_MERGED, BLOCK_PROPOSED, CHALLENGE_SENT, CONNECTION_TRUSTED,
    CONSENSUS_ADVANCE, PARTIAL_PARKED, PARTIAL_REQUEUED, RESULT_RETURNED, SERVER_CLOSED,
    SERVER_STARTED,
};
use crate::messages::{Message, MessageKind};
use crate::net::connection::Connection;
use crate::net::manager::ConnectionManager;
use crate::store::context::Context;
use crate::store::PersistMode;
use crate::types::basic::{AccountKey, Address, CellHash, Timestamp};
use crate::types::keypair::Keypair;
use crate::vm::Vm;

/// How long the receiver waits on an empty queue before re-checking the running
/// flag.
const RECEIVE_POLL: Duration = Duration::from_millis(100);

/// Client interest entries older than this are culled.
const INTEREST_EXPIRY: Duration = Duration::from_secs(300);

/// An unanswered challenge expires after this long, letting the connector issue a
/// fresh one.
const CHALLENGE_EXPIRY: Duration = Duration::from_secs(10);

/// A message parked until the cell with a missing hash arrives.
struct Parked {
    connection: Arc<Connection>,
    message: Message,
    at: Instant,
}

/// A client awaiting the result of a submitted transaction.
struct Interest {
    connection: Arc<Connection>,
    id: i64,
    at: Instant,
}

/// An outstanding challenge awaiting a response from the expected peer.
struct Challenge {
    key: AccountKey,
    at: Instant,
}

struct ServerCore {
    keypair: Arc<Keypair>,
    cx: Context,
    vm: Arc<dyn Vm>,
    manager: Arc<ConnectionManager>,
    requeue: SyncSender<(Arc<Connection>, Message)>,
    peer: RwLock<Arc<Peer>>,
    new_transactions: Mutex<Vec<Cell>>,
    new_beliefs: Mutex<HashMap<AccountKey, (Timestamp, Belief)>>,
    partial_messages: Mutex<HashMap<CellHash, Parked>>,
    challenges: Mutex<HashMap<CellHash, Challenge>>,
    interests: Mutex<HashMap<CellHash, Interest>>,
    has_new_messages: AtomicBool,
    is_running: AtomicBool,
    port: u16,
    url: String,
    persist_on_close: bool,
    update_pause: Duration,
    connection_pause: Duration,
    partial_expiry: Duration,
}

impl ServerCore {
    fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    fn peer_snapshot(&self) -> Arc<Peer> {
        self.peer.read().unwrap().clone()
    }

    fn publish_peer(&self, peer: Peer) {
        *self.peer.write().unwrap() = Arc::new(peer);
    }
}

fn current_timestamp() -> Timestamp {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    Timestamp::new(millis)
}

/// A self-contained peer server launched from a [`PeerConfig`].
pub struct Server {
    core: Arc<ServerCore>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Server {
    /// Establish the peer (restoring from the store root if so configured), bind
    /// the listener, and start the workers.
    pub fn launch(config: PeerConfig, vm: Arc<dyn Vm>) -> Result<Server, Fault> {
        let cx = Context::new(config.store.clone());
        let keypair = config.keypair.clone();

        let peer = establish_peer(&cx, &config)?;

        let (to_receiver, from_connections) = mpsc::sync_channel(config.receive_queue_size);
        let manager = ConnectionManager::new(to_receiver.clone());
        let port = manager
            .launch(config.bind_port)
            .map_err(|error| Fault::Internal(format!("failed to bind listener: {}", error)))?;
        let url = config
            .advertised_url
            .clone()
            .unwrap_or_else(|| format!("localhost:{}", port));

        let core = Arc::new(ServerCore {
            keypair,
            cx,
            vm,
            manager,
            requeue: to_receiver,
            peer: RwLock::new(Arc::new(peer)),
            new_transactions: Mutex::new(Vec::new()),
            new_beliefs: Mutex::new(HashMap::new()),
            partial_messages: Mutex::new(HashMap::new()),
            challenges: Mutex::new(HashMap::new()),
            interests: Mutex::new(HashMap::new()),
            has_new_messages: AtomicBool::new(false),
            is_running: AtomicBool::new(true),
            port,
            url,
            persist_on_close: config.persist_on_close,
            update_pause: config.update_pause,
            connection_pause: config.connection_pause,
            partial_expiry: config.partial_expiry,
        });

        let receiver = {
            let core = core.clone();
            thread::spawn(move || receiver_loop(core, from_connections))
        };
        let updater = {
            let core = core.clone();
            thread::spawn(move || updater_loop(core))
        };
        let connector = {
            let core = core.clone();
            thread::spawn(move || connector_loop(core))
        };

        info!("{}, port {}, peer {}", SERVER_STARTED, port, core.peer_snapshot().key());
        Ok(Server {
            core,
            workers: Mutex::new(vec![receiver, updater, connector]),
        })
    }

    pub fn port(&self) -> u16 {
        self.core.port
    }

    pub fn url(&self) -> &str {
        &self.core.url
    }

    pub fn key(&self) -> AccountKey {
        self.core.peer_snapshot().key()
    }

    pub fn context(&self) -> &Context {
        &self.core.cx
    }

    /// An atomic snapshot of the current peer value.
    pub fn peer(&self) -> Arc<Peer> {
        self.core.peer_snapshot()
    }

    pub fn consensus_point(&self) -> Result<u64, Fault> {
        self.core.peer_snapshot().consensus_point(&self.core.cx)
    }

    pub fn belief_hash(&self) -> CellHash {
        self.core.peer_snapshot().belief_cell().hash()
    }

    /// Connect to a remote peer expected to hold `key`, and challenge it.
    pub fn connect(&self, key: AccountKey, url: &str) -> Result<(), Fault> {
        self.core
            .manager
            .connect(key, url)
            .map_err(|error| Fault::Internal(format!("cannot connect to {}: {}", url, error)))?;
        request_challenges(&self.core);
        Ok(())
    }

    /// The connection to the given peer, if one is open.
    pub fn connection(&self, key: &AccountKey) -> Option<Arc<Connection>> {
        self.core.manager.connection(key)
    }

    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }

    /// Stop the workers, close the transport, and (if configured) persist the
    /// final peer value under the store root.
    pub fn close(&self) {
        if !self.core.is_running.swap(false, Ordering::AcqRel) {
            return;
        }
        if self.core.persist_on_close {
            let peer = self.core.peer_snapshot();
            match peer.persist_data(&self.core.cx) {
                Ok(hash) => info!("stored peer data at root {}", short_hash(&hash)),
                Err(fault) => error!("failed to persist peer data on close: {}", fault),
            }
        }
        self.core.manager.close();
        let mut workers = self.workers.lock().unwrap();
        for worker in workers.drain(..) {
            let _ = worker.join();
        }
        info!("{}, port {}", SERVER_CLOSED, self.core.port);
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.close();
    }
}

fn establish_peer(cx: &Context, config: &PeerConfig) -> Result<Peer, Fault> {
    if config.restore_from_root {
        if let Some(root) = cx.store().root() {
            match Peer::restore(cx, config.keypair.clone(), root) {
                Ok(peer) => {
                    info!("restored peer from store root {}", short_hash(&root));
                    return Ok(peer);
                }
                Err(fault) => warn!("cannot restore peer from store: {}", fault),
            }
        }
    }
    Peer::new(cx, config.keypair.clone(), config.genesis.clone())
}

/* Receiver worker: message dispatch. */

fn receiver_loop(core: Arc<ServerCore>, queue: Receiver<(Arc<Connection>, Message)>) {
    debug!("receiver worker started for port {}", core.port);
    while core.is_running() {
        match queue.recv_timeout(RECEIVE_POLL) {
            Ok((connection, message)) => process_message(&core, connection, message),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("receiver worker stopped for port {}", core.port);
}

fn process_message(core: &Arc<ServerCore>, connection: Arc<Connection>, message: Message) {
    if connection.is_closed() {
        return;
    }
    let kind = message.kind;
    let outcome = match kind {
        MessageKind::Belief => process_belief(core, &message),
        MessageKind::Challenge => process_challenge(core, &connection, &message),
        // The COMMAND message type is reserved; its semantics are undefined.
        MessageKind::Command => Ok(()),
        MessageKind::Data => process_data(core, &message),
        MessageKind::MissingData => process_missing_data(core, &connection, &message),
        MessageKind::Query => process_query(core, &connection, &message),
        MessageKind::Response => process_response(core, &connection, &message),
        // Results are client-side; a peer ignores them inbound.
        MessageKind::Result => Ok(()),
        MessageKind::Transact => process_transact(core, &connection, &message),
        MessageKind::Goodbye => {
            connection.close();
            Ok(())
        }
        MessageKind::Status => process_status(core, &connection, &message),
    };

    if let Err(fault) = outcome {
        if let Some(hash) = fault.missing_hash() {
            register_partial_message(core, hash, connection.clone(), message);
            connection.send(Message::missing_data(hash));
        } else if fault.is_fatal() {
            warn!("fatal fault in {:?} message from {}: {}", kind, connection.peer_addr(), fault);
            connection.close();
        } else {
            warn!("dropping {:?} message from {}: {}", kind, connection.peer_addr(), fault);
        }
    }
}

fn process_belief(core: &Arc<ServerCore>, message: &Message) -> Result<(), Fault> {
    let signed = message.payload.as_signed()?.clone();
    if !signed.verify() {
        // Slashing for bad-signature beliefs is a policy hook; for now the belief
        // is dropped.
        return Err(Fault::BadSignature);
    }
    // Persist before merging so the update loop can never hit missing data.
    core.cx.persist(&message.payload, PersistMode::Deep)?;
    let belief = signed.value(&core.cx)?.as_belief()?.clone();
    let key = signed.signer();
    let timestamp = belief.timestamp();

    let mut pending = core.new_beliefs.lock().unwrap();
    let newer = pending
        .get(&key)
        .map_or(true, |(current, _)| timestamp > *current);
    if newer {
        pending.insert(key, (timestamp, belief));
        core.has_new_messages.store(true, Ordering::Release);
    }
    Ok(())
}

fn process_transact(
    core: &Arc<ServerCore>,
    connection: &Arc<Connection>,
    message: &Message,
) -> Result<(), Fault> {
    // Payload is a vector [id, signed-transaction].
    let payload = message.payload.as_vector()?;
    if payload.count() != 2 {
        return Err(Fault::InvalidData("malformed transact payload"));
    }
    let id = payload.get(&core.cx, 0)?.as_long()?;
    let signed_tx = payload.get(&core.cx, 1)?;
    core.cx.persist(&signed_tx, PersistMode::Deep)?;

    let signed = signed_tx.as_signed()?;
    if !signed.verify() {
        warn!("bad signature on client transaction {}", short_hash(&signed_tx.hash()));
        connection.send(Message::result(TxResult::error(
            id,
            codes::SIGNATURE,
            Cell::string("Bad Signature!"),
        )));
        return Ok(());
    }
    // Check it actually is a transaction before admitting it to a block.
    signed.value(&core.cx)?.as_transaction()?;

    let mut transactions = core.new_transactions.lock().unwrap();
    transactions.push(signed_tx.clone());
    drop(transactions);
    core.interests.lock().unwrap().insert(
        signed_tx.hash(),
        Interest {
            connection: connection.clone(),
            id,
            at: Instant::now(),
        },
    );
    core.has_new_messages.store(true, Ordering::Release);
    Ok(())
}

fn process_query(
    core: &Arc<ServerCore>,
    connection: &Arc<Connection>,
    message: &Message,
) -> Result<(), Fault> {
    // Payload is a vector [id, form, address?].
    let payload = message.payload.as_vector()?;
    if payload.count() < 2 || payload.count() > 3 {
        return Err(Fault::InvalidData("malformed query payload"));
    }
    let id = payload.get(&core.cx, 0)?.as_long()?;
    let form = payload.get(&core.cx, 1)?;
    let address = if payload.count() == 3 {
        Address::new(payload.get(&core.cx, 2)?.as_long()? as u64)
    } else {
        Address::new(0)
    };

    let peer = core.peer_snapshot();
    let state = peer.consensus_state(&core.cx)?;
    let outcome = core.vm.execute(&core.cx, &state, address, &form);
    let result = match outcome.error {
        None => TxResult::ok(id, outcome.value),
        Some(code) => TxResult::error(id, &code, outcome.value),
    };
    connection.send(Message::result(result));
    Ok(())
}

fn process_status(
    core: &Arc<ServerCore>,
    connection: &Arc<Connection>,
    message: &Message,
) -> Result<(), Fault> {
    let peer = core.peer_snapshot();
    let belief_hash = peer.signed_belief().clone().into_cell().hash();
    let state_hash = peer.consensus_state(&core.cx)?.into_cell().hash();
    let genesis_hash = peer.genesis_state(&core.cx)?.into_cell().hash();

    let mut peer_list = Vector::empty();
    for (key, url) in status_connect_list(core, &peer)? {
        let entry = Vector::of(
            &core.cx,
            [Cell::blob(key.bytes().to_vec()), Cell::string(url)],
        )?;
        peer_list = peer_list.append(&core.cx, entry.to_cell())?;
    }

    let reply = Vector::of(
        &core.cx,
        [
            Cell::hash_value(belief_hash),
            Cell::hash_value(state_hash),
            Cell::hash_value(genesis_hash),
            peer_list.to_cell(),
        ],
    )?;
    connection.send(Message::result(TxResult::ok(message.id, reply.to_cell())));
    Ok(())
}

/// The peer key → URL map served in STATUS replies: our own advertised URL plus
/// every URL advertised in the consensus state.
fn status_connect_list(
    core: &Arc<ServerCore>,
    peer: &Peer,
) -> Result<Vec<(AccountKey, String)>, Fault> {
    let own_key = peer.key();
    let mut list = vec![(own_key, core.url.clone())];
    let state = peer.consensus_state(&core.cx)?;
    for (key, url) in state.peer_urls(&core.cx)? {
        if key != own_key {
            list.push((key, url));
        }
    }
    Ok(list)
}

fn process_challenge(
    core: &Arc<ServerCore>,
    connection: &Arc<Connection>,
    message: &Message,
) -> Result<(), Fault> {
    let signed = message.payload.as_signed()?;
    let token = signed.value(&core.cx)?;
    token.as_hash()?;
    let response = SignedCell::sign(&core.keypair, token);
    connection.send(Message::response(response));
    Ok(())
}

fn process_response(
    core: &Arc<ServerCore>,
    connection: &Arc<Connection>,
    message: &Message,
) -> Result<(), Fault> {
    let signed = message.payload.as_signed()?.clone();
    let token_hash = signed.value(&core.cx)?.as_hash()?;

    let mut challenges = core.challenges.lock().unwrap();
    let expected = match challenges.get(&token_hash) {
        Some(challenge) => challenge.key,
        None => {
            warn!("unknown token in challenge response from {}", connection.peer_addr());
            return Ok(());
        }
    };
    if signed.signer() != expected {
        warn!("challenge response signed by an unexpected key from {}", connection.peer_addr());
        return Ok(());
    }
    if !signed.verify() {
        return Err(Fault::BadSignature);
    }
    challenges.remove(&token_hash);
    drop(challenges);

    connection.set_trusted(expected);
    info!("{}, {}, {}", CONNECTION_TRUSTED, connection.peer_addr(), expected);
    Ok(())
}

fn process_data(core: &Arc<ServerCore>, message: &Message) -> Result<(), Fault> {
    core.cx.persist(&message.payload, PersistMode::Shallow)?;
    maybe_process_partial(core, message.payload.hash());
    Ok(())
}

fn process_missing_data(
    core: &Arc<ServerCore>,
    connection: &Arc<Connection>,
    message: &Message,
) -> Result<(), Fault> {
    let hash = message.payload.as_hash()?;
    // Best effort: requests for data we do not hold are ignored.
    if let Some(cell) = core.cx.lookup(&hash)? {
        connection.send(Message::data(cell));
    }
    Ok(())
}

/// Store a partial message for re-processing once the missing data arrives.
fn register_partial_message(
    core: &Arc<ServerCore>,
    hash: CellHash,
    connection: Arc<Connection>,
    message: Message,
) {
    debug!("{}, {}", PARTIAL_PARKED, short_hash(&hash));
    core.partial_messages.lock().unwrap().insert(
        hash,
        Parked {
            connection,
            message,
            at: Instant::now(),
        },
    );
}

/// If received data fulfils a parked message, re-enqueue that message once. A full
/// queue drops it; the remote may retransmit.
fn maybe_process_partial(core: &Arc<ServerCore>, hash: CellHash) {
    let parked = core.partial_messages.lock().unwrap().remove(&hash);
    if let Some(parked) = parked {
        match core.requeue.try_send((parked.connection, parked.message)) {
            Ok(()) => debug!("{}, {}", PARTIAL_REQUEUED, short_hash(&hash)),
            Err(TrySendError::Full(_)) => {
                warn!("receive queue full, dropping partial message for {}", short_hash(&hash))
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/* Updater worker: belief updates and transaction processing. */

fn updater_loop(core: Arc<ServerCore>) {
    debug!("updater worker started for port {}", core.port);
    while core.is_running() {
        // Update the peer timestamp first; it determines what we might accept.
        let now = current_timestamp();
        core.publish_peer(core.peer_snapshot().update_timestamp(now));

        match maybe_update_belief(&core) {
            Ok(_) => {}
            Err(fault) => error!("belief update failed: {}", fault),
        }

        if !core.has_new_messages.swap(false, Ordering::AcqRel) {
            thread::sleep(core.update_pause);
        }
    }
    debug!("updater worker stopped for port {}", core.port);
}

/// Handle a general belief update. Returns whether the belief changed.
fn maybe_update_belief(core: &Arc<ServerCore>) -> Result<bool, Fault> {
    let initial = core.peer_snapshot();
    let old_consensus_point = initial.consensus_point(&core.cx)?;
    let initial_belief_hash = initial.belief_cell().hash();

    let published = maybe_publish_block(core)?;

    let pending: Vec<Belief> = {
        let mut map = core.new_beliefs.lock().unwrap();
        map.drain().map(|(_, (_, belief))| belief).collect()
    };
    // Only merge when there is something to merge.
    if !published && pending.is_empty() {
        return Ok(false);
    }

    let peer = core.peer_snapshot();
    let merged = peer.merge_beliefs(&core.cx, core.vm.as_ref(), &pending)?;
    if merged.belief_cell().hash() == initial_belief_hash {
        return Ok(false);
    }
    core.publish_peer(merged.clone());
    debug!("{}, {}", BELIEF_MERGED, short_hash(&merged.belief_cell().hash()));

    // Persist the new peer value, pushing the novelty to warm remote stores in
    // dependency order. The signed belief itself travels as a BELIEF message, not
    // DATA.
    let signed_belief_cell = merged.signed_belief().clone().into_cell();
    let signed_belief_hash = signed_belief_cell.hash();
    let mut novelty: Vec<Cell> = Vec::new();
    merged.persist(&core.cx, &mut |cell| novelty.push(cell.clone()))?;
    for cell in novelty {
        if cell.hash() != signed_belief_hash {
            core.manager.broadcast(&Message::data(cell));
        }
    }
    core.manager.broadcast_belief(
        merged.belief().timestamp(),
        &Message::belief(signed_belief_cell),
    );

    let new_consensus_point = merged.consensus_point(&core.cx)?;
    if new_consensus_point > old_consensus_point {
        info!(
            "{}, {} -> {}",
            CONSENSUS_ADVANCE, old_consensus_point, new_consensus_point
        );
        report_transactions(core, &merged, old_consensus_point, new_consensus_point)?;
    }
    Ok(true)
}

/// Propose pending transactions as a new block, if there are any.
fn maybe_publish_block(core: &Arc<ServerCore>) -> Result<bool, Fault> {
    let drained: Vec<Cell> = {
        let mut transactions = core.new_transactions.lock().unwrap();
        if transactions.is_empty() {
            return Ok(false);
        }
        transactions.drain(..).collect()
    };
    let peer = core.peer_snapshot();
    let block = Block::new(&core.cx, peer.timestamp(), peer.key(), drained)?.into_cell();
    core.cx.persist(&block, PersistMode::Deep)?;
    let proposed = peer.propose_block(&core.cx, block.clone())?;
    info!("{}, {}", BLOCK_PROPOSED, short_hash(&block.hash()));
    core.publish_peer(proposed);
    Ok(true)
}

/// Deliver results for every newly agreed block to the clients that registered
/// interest in its transactions.
fn report_transactions(
    core: &Arc<ServerCore>,
    peer: &Peer,
    from: u64,
    to: u64,
) -> Result<(), Fault> {
    let order = peer.own_order(&core.cx)?;
    let blocks = order.blocks(&core.cx)?;
    for index in from..to {
        let block_cell = blocks.get(&core.cx, index)?;
        let block = block_cell.as_signed()?.value(&core.cx)?;
        let transactions = block.as_block()?.transactions(&core.cx)?;
        let results = peer.block_results(&core.cx, index)?;
        for (position, tx_cell) in transactions.iter().enumerate() {
            let interest = core.interests.lock().unwrap().remove(&tx_cell.hash());
            if let Some(interest) = interest {
                if interest.connection.is_closed() {
                    continue;
                }
                if let Some(result) = results.get(position) {
                    debug!("{}, {}", RESULT_RETURNED, interest.connection.peer_addr());
                    interest
                        .connection
                        .send(Message::result(result.with_id(interest.id)));
                }
            }
        }
    }
    Ok(())
}

/* Connector worker: connection reconciliation and challenges. */

fn connector_loop(core: Arc<ServerCore>) {
    debug!("connector worker started for port {}", core.port);
    pause(&core, Duration::from_millis(100));
    let mut last_consensus_point = u64::MAX;
    while core.is_running() {
        cull_expired(&core);

        let peer = core.peer_snapshot();
        match peer.consensus_point(&core.cx) {
            Ok(consensus_point) => {
                // Only reconcile the connection list when the state has changed.
                if consensus_point != last_consensus_point {
                    last_consensus_point = consensus_point;
                    if let Err(fault) = connect_to_peers(&core, &peer) {
                        warn!("connection reconciliation failed: {}", fault);
                    }
                }
            }
            Err(fault) => warn!("cannot read consensus point: {}", fault),
        }
        request_challenges(&core);

        pause(&core, core.connection_pause);
    }
    debug!("connector worker stopped for port {}", core.port);
}

/// Sleep in slices so close() is not held up by a full connection pause.
fn pause(core: &Arc<ServerCore>, total: Duration) {
    let slice = Duration::from_millis(100);
    let mut remaining = total;
    while core.is_running() && !remaining.is_zero() {
        let step = remaining.min(slice);
        thread::sleep(step);
        remaining -= step;
    }
}

/// Open connections to every peer advertised in the current consensus state that
/// we are not yet connected to.
fn connect_to_peers(core: &Arc<ServerCore>, peer: &Peer) -> Result<(), Fault> {
    let own_key = peer.key();
    let state = peer.consensus_state(&core.cx)?;
    for (key, url) in state.peer_urls(&core.cx)? {
        if key == own_key || url == core.url {
            continue;
        }
        if !core.manager.is_connected(&key) {
            match core.manager.connect(key, &url) {
                Ok(_) => debug!("connected to peer {} at {}", key, url),
                Err(error) => warn!("cannot connect to peer at {}: {}", url, error),
            }
        }
    }
    Ok(())
}

/// Send challenges to connections that are not yet trusted and not already
/// challenged.
fn request_challenges(core: &Arc<ServerCore>) {
    for (key, connection) in core.manager.keyed() {
        if connection.is_trusted() {
            continue;
        }
        if core.challenges.lock().unwrap().values().any(|challenge| challenge.key == key) {
            continue;
        }
        if let Some(token_hash) = send_challenge(core, &connection) {
            core.challenges.lock().unwrap().insert(
                token_hash,
                Challenge {
                    key,
                    at: Instant::now(),
                },
            );
        }
    }
}

/// Generate a 120-byte random token, hash it, sign the hash, and send the
/// challenge. Returns the token hash on success.
fn send_challenge(core: &Arc<ServerCore>, connection: &Arc<Connection>) -> Option<CellHash> {
    let mut token_bytes = [0u8; 120];
    rand::rngs::OsRng.fill_bytes(&mut token_bytes);
    let token = Cell::blob(token_bytes.to_vec());
    let token_hash = token.hash();
    let signed = SignedCell::sign(&core.keypair, Cell::hash_value(token_hash));
    if connection.send(Message::challenge(signed)) {
        debug!("{}, {}", CHALLENGE_SENT, connection.peer_addr());
        Some(token_hash)
    } else {
        None
    }
}

/// Discard parked partial messages and client interests that expired or whose
/// origin connection closed.
fn cull_expired(core: &Arc<ServerCore>) {
    let partial_expiry = core.partial_expiry;
    core.partial_messages
        .lock()
        .unwrap()
        .retain(|_, parked| parked.at.elapsed() < partial_expiry && !parked.connection.is_closed());
    core.interests
        .lock()
        .unwrap()
        .retain(|_, interest| interest.at.elapsed() < INTEREST_EXPIRY && !interest.connection.is_closed());
    core.challenges
        .lock()
        .unwrap()
        .retain(|_, challenge| challenge.at.elapsed() < CHALLENGE_EXPIRY);
}
