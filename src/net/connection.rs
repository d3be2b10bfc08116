/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A single peer or client connection.
//!
//! Each connection owns a reader thread and a writer thread around its `TcpStream`,
//! so sends never block the caller and inbound frames flow into the server's
//! bounded receive queue. A protocol violation or I/O failure on either side marks
//! the connection closed; reconnection is the periodic connector's job.

use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::messages::Message;
use crate::types::basic::{AccountKey, Timestamp};

use super::framing::{self, FrameError};

/// Outbound messages queued per connection before the writer thread drains them.
const WRITER_CHANNEL_LEN: usize = 256;

pub struct Connection {
    id: u64,
    peer_addr: SocketAddr,
    // Clone of the stream held for shutdown; reader and writer own their own clones.
    stream: TcpStream,
    to_writer: SyncSender<Message>,
    closed: AtomicBool,
    trusted_key: Mutex<Option<AccountKey>>,
    // Timestamp of the newest belief sent on this connection. Belief broadcasts are
    // monotonic per connection.
    last_belief_sent: Mutex<Option<Timestamp>>,
}

impl Connection {
    /// Wrap an established stream, spawning its reader and writer threads. Inbound
    /// messages are offered to `inbound`; when the queue is full they are dropped
    /// and the remote retries via the broadcast cadence.
    pub fn spawn(
        id: u64,
        stream: TcpStream,
        inbound: SyncSender<(Arc<Connection>, Message)>,
    ) -> std::io::Result<Arc<Connection>> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (to_writer, from_main) = mpsc::sync_channel(WRITER_CHANNEL_LEN);

        let connection = Arc::new(Connection {
            id,
            peer_addr,
            stream: stream.try_clone()?,
            to_writer,
            closed: AtomicBool::new(false),
            trusted_key: Mutex::new(None),
            last_belief_sent: Mutex::new(None),
        });

        let mut write_stream = stream.try_clone()?;
        let writer_connection = connection.clone();
        thread::spawn(move || {
            // The writer holds the connection (and with it the sending end of its
            // own channel) alive, so it polls rather than parking forever.
            loop {
                match from_main.recv_timeout(Duration::from_secs(1)) {
                    Ok(message) => {
                        if framing::write_frame(&mut write_stream, &message).is_err() {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        if writer_connection.is_closed() {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            writer_connection.close();
        });

        let reader_connection = connection.clone();
        thread::spawn(move || {
            let mut read_stream = stream;
            loop {
                match framing::read_frame(&mut read_stream) {
                    Ok(message) => match inbound.try_send((reader_connection.clone(), message)) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!("receive queue full, dropping message from {}", peer_addr);
                        }
                        Err(TrySendError::Disconnected(_)) => break,
                    },
                    Err(FrameError::Bad(fault)) => {
                        warn!("closing connection to {}: {}", peer_addr, fault);
                        break;
                    }
                    Err(FrameError::Io(_)) => break,
                }
            }
            reader_connection.close();
        });

        Ok(connection)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Queue a message for sending. Returns `false` if the connection is closed or
    /// its writer queue is full.
    pub fn send(&self, message: Message) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.to_writer.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("writer queue full for {}", self.peer_addr);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Send a belief message unless one with an equal or newer timestamp was
    /// already delivered on this connection.
    pub fn send_belief(&self, timestamp: Timestamp, message: &Message) -> bool {
        {
            let mut last = self.last_belief_sent.lock().unwrap();
            match *last {
                Some(sent) if sent > timestamp => return false,
                _ => *last = Some(timestamp),
            }
        }
        self.send(message.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the connection and release both worker threads.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.stream.shutdown(Shutdown::Both);
        }
    }

    /// The remote peer key, once the challenge handshake succeeded.
    pub fn trusted_key(&self) -> Option<AccountKey> {
        *self.trusted_key.lock().unwrap()
    }

    pub fn is_trusted(&self) -> bool {
        self.trusted_key().is_some()
    }

    /// Mark the connection trusted for `key` after a verified challenge response.
    pub fn set_trusted(&self, key: AccountKey) {
        *self.trusted_key.lock().unwrap() = Some(key);
    }
}
