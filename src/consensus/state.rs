/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The replicated state: an immutable snapshot of all accounts, peers and global
//! parameters.
//!
//! The core never interprets accounts or globals; they belong to the embedder's VM.
//! What the core does read is the peer map, because stakes weigh the belief merge
//! and advertised URLs drive the connector.

use crate::cell::encoding::{read_option_string, write_option_string, write_vlc_u64, Reader};
use crate::cell::refs::{Ref, Resolver};
use crate::cell::{Cell, Value};
use crate::error::Fault;
use crate::types::basic::{AccountKey, Stake, TotalStake};

/// Per-peer network metadata kept within [`State`].
#[derive(Clone, PartialEq, Eq)]
pub struct PeerStatus {
    stake: Stake,
    url: Option<String>,
}

impl PeerStatus {
    pub fn new(stake: Stake, url: Option<String>) -> PeerStatus {
        PeerStatus { stake, url }
    }

    pub fn stake(&self) -> Stake {
        self.stake
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn into_cell(self) -> Cell {
        Cell::new(Value::PeerStatus(self))
    }

    pub(crate) fn write(&self, w: &mut Vec<u8>) {
        write_vlc_u64(w, self.stake.int());
        write_option_string(w, &self.url);
    }

    pub(crate) fn read(r: &mut Reader) -> Result<PeerStatus, Fault> {
        let stake = Stake::new(r.vlc_u64()?);
        let url = read_option_string(r)?;
        Ok(PeerStatus { stake, url })
    }
}

/// An immutable snapshot of the replicated world.
#[derive(Clone)]
pub struct State {
    globals: Ref,
    accounts: Ref,
    // Peer statuses in ascending key order.
    peers: Vec<(AccountKey, Ref)>,
}

impl State {
    /// Create a state from its parts. Peer entries are sorted by key; of duplicate
    /// keys, the first entry given wins.
    pub fn new(globals: Cell, accounts: Cell, peers: Vec<(AccountKey, PeerStatus)>) -> State {
        let mut entries: Vec<(AccountKey, Ref)> = peers
            .into_iter()
            .map(|(key, status)| (key, Ref::of(status.into_cell())))
            .collect();
        entries.sort_by_key(|(key, _)| *key);
        entries.dedup_by(|a, b| a.0 == b.0);
        State {
            globals: Ref::of(globals),
            accounts: Ref::of(accounts),
            peers: entries,
        }
    }

    pub fn globals(&self, resolver: &dyn Resolver) -> Result<Cell, Fault> {
        self.globals.resolve(resolver)
    }

    pub fn accounts(&self, resolver: &dyn Resolver) -> Result<Cell, Fault> {
        self.accounts.resolve(resolver)
    }

    /// Replace the accounts cell, keeping globals and peers.
    pub fn with_accounts(&self, accounts: Cell) -> State {
        State {
            globals: self.globals.clone(),
            accounts: Ref::of(accounts),
            peers: self.peers.clone(),
        }
    }

    /// The peer keys known to this state, in ascending order.
    pub fn peer_keys(&self) -> Vec<AccountKey> {
        self.peers.iter().map(|(key, _)| *key).collect()
    }

    pub fn peer_status(
        &self,
        resolver: &dyn Resolver,
        key: &AccountKey,
    ) -> Result<Option<PeerStatus>, Fault> {
        match self.peers.binary_search_by_key(key, |(k, _)| *k) {
            Err(_) => Ok(None),
            Ok(index) => {
                let cell = self.peers[index].1.resolve(resolver)?;
                Ok(Some(cell.as_peer_status()?.clone()))
            }
        }
    }

    /// Every peer's stake, in ascending key order.
    pub fn stakes(&self, resolver: &dyn Resolver) -> Result<Vec<(AccountKey, Stake)>, Fault> {
        let mut out = Vec::with_capacity(self.peers.len());
        for (key, status) in &self.peers {
            let cell = status.resolve(resolver)?;
            out.push((*key, cell.as_peer_status()?.stake()));
        }
        Ok(out)
    }

    pub fn total_stake(&self, resolver: &dyn Resolver) -> Result<TotalStake, Fault> {
        let mut total = TotalStake::new(0);
        for (_, stake) in self.stakes(resolver)? {
            total += stake;
        }
        Ok(total)
    }

    /// Every peer's advertised URL, in ascending key order.
    pub fn peer_urls(
        &self,
        resolver: &dyn Resolver,
    ) -> Result<Vec<(AccountKey, String)>, Fault> {
        let mut out = Vec::new();
        for (key, status) in &self.peers {
            let cell = status.resolve(resolver)?;
            if let Some(url) = cell.as_peer_status()?.url() {
                out.push((*key, url.to_owned()));
            }
        }
        Ok(out)
    }

    pub fn into_cell(self) -> Cell {
        Cell::new(Value::State(self))
    }

    pub(crate) fn child_refs(&self) -> Vec<Ref> {
        let mut refs = vec![self.globals.clone(), self.accounts.clone()];
        refs.extend(self.peers.iter().map(|(_, status)| status.clone()));
        refs
    }

    pub(crate) fn write(&self, w: &mut Vec<u8>) {
        self.globals.write(w);
        self.accounts.write(w);
        write_vlc_u64(w, self.peers.len() as u64);
        for (key, status) in &self.peers {
            w.extend_from_slice(&key.bytes());
            status.write(w);
        }
    }

    pub(crate) fn read(r: &mut Reader) -> Result<State, Fault> {
        let globals = Ref::read(r)?;
        let accounts = Ref::read(r)?;
        let n = r.vlc_u64()? as usize;
        let mut peers = Vec::with_capacity(n);
        let mut previous: Option<AccountKey> = None;
        for _ in 0..n {
            let key = AccountKey::new(r.array32()?);
            if previous.map_or(false, |p| p >= key) {
                return Err(Fault::BadFormat("peer keys not in ascending order"));
            }
            previous = Some(key);
            peers.push((key, Ref::read(r)?));
        }
        Ok(State {
            globals,
            accounts,
            peers,
        })
    }
}
