/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The connection manager: the listener, the outbound connection registry, and
//! broadcast fan-out.
//!
//! Outbound connections are keyed by the expected remote peer key; inbound
//! connections are anonymous until a client identifies itself (clients never do,
//! and peers are connected to outbound by the connector). Broadcasts go to every
//! live connection, trusted or not.

use std::collections::HashMap;
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Mutex};
use std::thread;

use log::{debug, warn};

use crate::messages::Message;
use crate::types::basic::{AccountKey, Timestamp};

use super::connection::Connection;

pub struct ConnectionManager {
    inbound: SyncSender<(Arc<Connection>, Message)>,
    // Outbound connections by expected remote peer key.
    connections: Mutex<HashMap<AccountKey, Arc<Connection>>>,
    // Inbound connections, anonymous.
    accepted: Mutex<Vec<Arc<Connection>>>,
    next_id: AtomicU64,
    port: Mutex<Option<u16>>,
    running: AtomicBool,
}

impl ConnectionManager {
    pub fn new(inbound: SyncSender<(Arc<Connection>, Message)>) -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager {
            inbound,
            connections: Mutex::new(HashMap::new()),
            accepted: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            port: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    /// Bind the listener (an explicit port, or an ephemeral one) and start
    /// accepting connections. Returns the actual port.
    pub fn launch(self: &Arc<Self>, port: Option<u16>) -> std::io::Result<u16> {
        let listener = TcpListener::bind(("127.0.0.1", port.unwrap_or(0)))?;
        let actual = listener.local_addr()?.port();
        *self.port.lock().unwrap() = Some(actual);
        self.running.store(true, Ordering::Release);

        let manager = self.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                if !manager.running.load(Ordering::Acquire) {
                    break;
                }
                match stream {
                    Ok(stream) => {
                        let id = manager.next_id.fetch_add(1, Ordering::Relaxed);
                        match Connection::spawn(id, stream, manager.inbound.clone()) {
                            Ok(connection) => {
                                debug!("accepted connection from {}", connection.peer_addr());
                                manager.accepted.lock().unwrap().push(connection);
                            }
                            Err(error) => warn!("failed to accept connection: {}", error),
                        }
                    }
                    Err(error) => warn!("listener error: {}", error),
                }
            }
        });
        Ok(actual)
    }

    pub fn port(&self) -> Option<u16> {
        *self.port.lock().unwrap()
    }

    /// Open an outbound connection to `url` expecting the peer identified by `key`.
    pub fn connect(&self, key: AccountKey, url: &str) -> std::io::Result<Arc<Connection>> {
        let addr = url
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "unresolvable url"))?;
        let stream = TcpStream::connect(addr)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let connection = Connection::spawn(id, stream, self.inbound.clone())?;
        self.connections.lock().unwrap().insert(key, connection.clone());
        Ok(connection)
    }

    pub fn is_connected(&self, key: &AccountKey) -> bool {
        self.connections
            .lock()
            .unwrap()
            .get(key)
            .map_or(false, |connection| !connection.is_closed())
    }

    pub fn connection(&self, key: &AccountKey) -> Option<Arc<Connection>> {
        self.connections.lock().unwrap().get(key).cloned()
    }

    /// The live outbound connections with their expected peer keys, pruning closed
    /// ones.
    pub fn keyed(&self) -> Vec<(AccountKey, Arc<Connection>)> {
        let mut connections = self.connections.lock().unwrap();
        connections.retain(|_, connection| !connection.is_closed());
        connections
            .iter()
            .map(|(key, connection)| (*key, connection.clone()))
            .collect()
    }

    /// Every live connection, outbound and accepted.
    pub fn all(&self) -> Vec<Arc<Connection>> {
        let mut all: Vec<Arc<Connection>> = self
            .keyed()
            .into_iter()
            .map(|(_, connection)| connection)
            .collect();
        let mut accepted = self.accepted.lock().unwrap();
        accepted.retain(|connection| !connection.is_closed());
        all.extend(accepted.iter().cloned());
        all
    }

    /// Push a message to every live connection.
    pub fn broadcast(&self, message: &Message) {
        for connection in self.all() {
            connection.send(message.clone());
        }
    }

    /// Push a belief to every live connection, skipping remotes that already
    /// received one at least as new.
    pub fn broadcast_belief(&self, timestamp: Timestamp, message: &Message) {
        for connection in self.all() {
            connection.send_belief(timestamp, message);
        }
    }

    /// Stop accepting and close every connection.
    pub fn close(&self) {
        self.running.store(false, Ordering::Release);
        for connection in self.all() {
            connection.close();
        }
        // Nudge the listener out of its blocking accept.
        if let Some(port) = self.port() {
            let _ = TcpStream::connect(("127.0.0.1", port));
        }
    }
}
