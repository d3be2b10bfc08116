/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Typed messages exchanged between peers and clients.
//!
//! On the wire a message body is `type-byte ‖ message-id (Long cell) ‖ payload
//! (cell)`, carried inside a length-prefixed frame (see
//! [`framing`](crate::net::framing)). The message id is a small integer chosen by
//! the sender; requests that expect a reply are correlated by it. Messages with no
//! payload carry a Null cell.

use crate::cell::refs::Resolver;
use crate::cell::signed::SignedCell;
use crate::cell::vector::Vector;
use crate::cell::{decode_cell, read_cell, Cell};
use crate::consensus::block::TxResult;
use crate::error::Fault;
use crate::types::basic::CellHash;

/// The complete set of wire message kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Belief = 1,
    Challenge = 2,
    Command = 3,
    Data = 4,
    MissingData = 5,
    Query = 6,
    Response = 7,
    Result = 8,
    Transact = 9,
    Goodbye = 10,
    Status = 11,
}

impl MessageKind {
    pub fn byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Result<MessageKind, Fault> {
        Ok(match byte {
            1 => MessageKind::Belief,
            2 => MessageKind::Challenge,
            3 => MessageKind::Command,
            4 => MessageKind::Data,
            5 => MessageKind::MissingData,
            6 => MessageKind::Query,
            7 => MessageKind::Response,
            8 => MessageKind::Result,
            9 => MessageKind::Transact,
            10 => MessageKind::Goodbye,
            11 => MessageKind::Status,
            _ => return Err(Fault::BadFormat("unknown message type")),
        })
    }
}

/// A typed message with its correlation id and payload cell.
#[derive(Clone)]
pub struct Message {
    pub kind: MessageKind,
    pub id: i64,
    pub payload: Cell,
}

/// Small vectors are assembled fully in memory, so building them never resolves.
struct NoResolve;

impl Resolver for NoResolve {
    fn resolve_hash(&self, hash: &CellHash) -> Result<Cell, Fault> {
        Err(Fault::Missing(*hash))
    }
}

impl Message {
    pub fn new(kind: MessageKind, id: i64, payload: Cell) -> Message {
        Message { kind, id, payload }
    }

    /// A signed belief, broadcast to every connection.
    pub fn belief(signed_belief: Cell) -> Message {
        Message::new(MessageKind::Belief, 0, signed_belief)
    }

    /// A cell pushed to warm a remote store.
    pub fn data(cell: Cell) -> Message {
        Message::new(MessageKind::Data, 0, cell)
    }

    /// A request for the cell with the given hash.
    pub fn missing_data(hash: CellHash) -> Message {
        Message::new(MessageKind::MissingData, 0, Cell::hash_value(hash))
    }

    /// A transaction result; the frame id mirrors the result's correlation id.
    pub fn result(result: TxResult) -> Message {
        let id = result.id();
        Message::new(MessageKind::Result, id, result.into_cell())
    }

    /// A client transaction submission: payload `[id, signed-transaction]`.
    pub fn transact(id: i64, signed_transaction: Cell) -> Result<Message, Fault> {
        let payload = Vector::of(&NoResolve, [Cell::long(id), signed_transaction])?;
        Ok(Message::new(MessageKind::Transact, id, payload.to_cell()))
    }

    /// A read-only query: payload `[id, form, address]`.
    pub fn query(id: i64, form: Cell, address: Cell) -> Result<Message, Fault> {
        let payload = Vector::of(&NoResolve, [Cell::long(id), form, address])?;
        Ok(Message::new(MessageKind::Query, id, payload.to_cell()))
    }

    pub fn status(id: i64) -> Message {
        Message::new(MessageKind::Status, id, Cell::null())
    }

    pub fn challenge(signed_token: SignedCell) -> Message {
        Message::new(MessageKind::Challenge, 0, signed_token.into_cell())
    }

    pub fn response(signed_token: SignedCell) -> Message {
        Message::new(MessageKind::Response, 0, signed_token.into_cell())
    }

    pub fn goodbye() -> Message {
        Message::new(MessageKind::Goodbye, 0, Cell::null())
    }

    /// Encode into a frame body.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Vec::new();
        w.push(self.kind.byte());
        w.extend_from_slice(Cell::long(self.id).encoding());
        w.extend_from_slice(self.payload.encoding());
        w
    }

    /// Decode a frame body.
    pub fn decode(bytes: &[u8]) -> Result<Message, Fault> {
        let mut r = crate::cell::encoding::Reader::new(bytes);
        let kind = MessageKind::from_byte(r.u8()?)?;
        let id = read_cell(&mut r)?.as_long()?;
        let remaining = r.remaining();
        let payload = {
            let start = bytes.len() - remaining;
            decode_cell(&bytes[start..])?
        };
        Ok(Message { kind, id, payload })
    }
}
