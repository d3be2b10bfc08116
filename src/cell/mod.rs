/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The content-addressed data model.
//!
//! Every value exchanged or persisted by a peer is a [`Cell`]: an immutable,
//! reference-counted value with a canonical octet encoding and a SHA-256 identity
//! hash over that encoding. Equal-by-value implies equal encodings implies equal
//! hashes, so equality and hashing derive from the identity hash alone.
//!
//! Cells form a DAG: children must be hashed before a parent can be encoded, so
//! cycles are impossible. Children larger than
//! [`MAX_EMBEDDED_LENGTH`](encoding::MAX_EMBEDDED_LENGTH) are written as lazy
//! by-hash [`Ref`](refs::Ref)s.

pub mod encoding;

pub mod refs;

pub mod signed;

pub mod vector;

use std::sync::{Arc, OnceLock};

use sha2::{Digest, Sha256};

use crate::consensus::belief::Belief;
use crate::consensus::block::{Block, Transaction, TxResult};
use crate::consensus::order::Order;
use crate::consensus::state::{PeerStatus, State};
use crate::error::Fault;
use crate::types::basic::CellHash;

use self::encoding::{
    Reader, MAX_EMBEDDED_LENGTH, TAG_BELIEF, TAG_BLOB, TAG_BLOCK, TAG_HASH, TAG_LONG, TAG_NULL,
    TAG_ORDER, TAG_PEER_STATUS, TAG_RESULT, TAG_SIGNED, TAG_STATE, TAG_STRING, TAG_TRANSACTION,
    TAG_VECTOR,
};
use self::refs::Ref;
use self::signed::SignedCell;
use self::vector::Vector;

/// The value space of the data model. Every variant has a type tag and a
/// deterministic parse.
#[derive(Clone)]
pub enum Value {
    Null,
    Long(i64),
    Blob(Vec<u8>),
    String(String),
    Hash(CellHash),
    Vector(Vector),
    Signed(SignedCell),
    Transaction(Transaction),
    Block(Block),
    Order(Order),
    Belief(Belief),
    State(State),
    PeerStatus(PeerStatus),
    Result(TxResult),
}

struct CellInner {
    value: Value,
    encoding: OnceLock<Vec<u8>>,
    hash: OnceLock<CellHash>,
}

/// An immutable, content-addressed value. Cheap to clone; multiple owners share the
/// same logical value transparently.
#[derive(Clone)]
pub struct Cell(Arc<CellInner>);

impl Cell {
    pub fn new(value: Value) -> Cell {
        Cell(Arc::new(CellInner {
            value,
            encoding: OnceLock::new(),
            hash: OnceLock::new(),
        }))
    }

    pub fn null() -> Cell {
        Cell::new(Value::Null)
    }

    pub fn long(value: i64) -> Cell {
        Cell::new(Value::Long(value))
    }

    pub fn blob(bytes: Vec<u8>) -> Cell {
        Cell::new(Value::Blob(bytes))
    }

    pub fn string(value: impl Into<String>) -> Cell {
        Cell::new(Value::String(value.into()))
    }

    pub fn hash_value(hash: CellHash) -> Cell {
        Cell::new(Value::Hash(hash))
    }

    pub fn vector(vector: Vector) -> Cell {
        Cell::new(Value::Vector(vector))
    }

    pub fn value(&self) -> &Value {
        &self.0.value
    }

    /// The canonical encoding of this cell. Computed once and cached.
    pub fn encoding(&self) -> &[u8] {
        self.0.encoding.get_or_init(|| {
            let mut w = Vec::new();
            write_value(&self.0.value, &mut w);
            w
        })
    }

    /// The identity hash: the SHA-256 digest of the canonical encoding.
    pub fn hash(&self) -> CellHash {
        *self.0.hash.get_or_init(|| {
            let mut hasher = Sha256::new();
            hasher.update(self.encoding());
            CellHash::new(hasher.finalize().into())
        })
    }

    /// Whether this cell is inlined into parent encodings rather than stored
    /// standalone.
    pub fn is_embedded(&self) -> bool {
        self.encoding().len() <= MAX_EMBEDDED_LENGTH
    }

    /// The ordered child references of this cell.
    pub fn child_refs(&self) -> Vec<Ref> {
        match &self.0.value {
            Value::Null
            | Value::Long(_)
            | Value::Blob(_)
            | Value::String(_)
            | Value::Hash(_)
            | Value::PeerStatus(_) => Vec::new(),
            Value::Vector(vector) => vector.child_refs(),
            Value::Signed(signed) => vec![signed.value_ref().clone()],
            Value::Transaction(tx) => vec![tx.form().clone()],
            Value::Block(block) => vec![block.transactions_ref().clone()],
            Value::Order(order) => vec![order.blocks_ref().clone()],
            Value::Belief(belief) => belief.order_refs(),
            Value::State(state) => state.child_refs(),
            Value::Result(result) => vec![result.value_ref().clone()],
        }
    }

    pub fn as_long(&self) -> Result<i64, Fault> {
        match self.value() {
            Value::Long(v) => Ok(*v),
            _ => Err(Fault::InvalidData("expected a long cell")),
        }
    }

    pub fn as_blob(&self) -> Result<&[u8], Fault> {
        match self.value() {
            Value::Blob(v) => Ok(v),
            _ => Err(Fault::InvalidData("expected a blob cell")),
        }
    }

    pub fn as_string(&self) -> Result<&str, Fault> {
        match self.value() {
            Value::String(v) => Ok(v),
            _ => Err(Fault::InvalidData("expected a string cell")),
        }
    }

    pub fn as_hash(&self) -> Result<CellHash, Fault> {
        match self.value() {
            Value::Hash(v) => Ok(*v),
            _ => Err(Fault::InvalidData("expected a hash cell")),
        }
    }

    pub fn as_vector(&self) -> Result<&Vector, Fault> {
        match self.value() {
            Value::Vector(v) => Ok(v),
            _ => Err(Fault::InvalidData("expected a vector cell")),
        }
    }

    pub fn as_signed(&self) -> Result<&SignedCell, Fault> {
        match self.value() {
            Value::Signed(v) => Ok(v),
            _ => Err(Fault::InvalidData("expected a signed cell")),
        }
    }

    pub fn as_transaction(&self) -> Result<&Transaction, Fault> {
        match self.value() {
            Value::Transaction(v) => Ok(v),
            _ => Err(Fault::InvalidData("expected a transaction cell")),
        }
    }

    pub fn as_block(&self) -> Result<&Block, Fault> {
        match self.value() {
            Value::Block(v) => Ok(v),
            _ => Err(Fault::InvalidData("expected a block cell")),
        }
    }

    pub fn as_order(&self) -> Result<&Order, Fault> {
        match self.value() {
            Value::Order(v) => Ok(v),
            _ => Err(Fault::InvalidData("expected an order cell")),
        }
    }

    pub fn as_belief(&self) -> Result<&Belief, Fault> {
        match self.value() {
            Value::Belief(v) => Ok(v),
            _ => Err(Fault::InvalidData("expected a belief cell")),
        }
    }

    pub fn as_state(&self) -> Result<&State, Fault> {
        match self.value() {
            Value::State(v) => Ok(v),
            _ => Err(Fault::InvalidData("expected a state cell")),
        }
    }

    pub fn as_peer_status(&self) -> Result<&PeerStatus, Fault> {
        match self.value() {
            Value::PeerStatus(v) => Ok(v),
            _ => Err(Fault::InvalidData("expected a peer status cell")),
        }
    }

    pub fn as_result(&self) -> Result<&TxResult, Fault> {
        match self.value() {
            Value::Result(v) => Ok(v),
            _ => Err(Fault::InvalidData("expected a result cell")),
        }
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }
}

impl Eq for Cell {}

impl std::hash::Hash for Cell {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write(&self.hash().bytes())
    }
}

impl std::fmt::Debug for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cell({})", self.hash())
    }
}

impl From<Value> for Cell {
    fn from(value: Value) -> Cell {
        Cell::new(value)
    }
}

/// Write the canonical encoding of `value`: the type tag, then the type's body.
pub(crate) fn write_value(value: &Value, w: &mut Vec<u8>) {
    match value {
        Value::Null => w.push(TAG_NULL),
        Value::Long(v) => {
            w.push(TAG_LONG);
            encoding::write_vlc_i64(w, *v);
        }
        Value::Blob(bytes) => {
            w.push(TAG_BLOB);
            encoding::write_vlc_u64(w, bytes.len() as u64);
            w.extend_from_slice(bytes);
        }
        Value::String(s) => {
            w.push(TAG_STRING);
            encoding::write_vlc_u64(w, s.len() as u64);
            w.extend_from_slice(s.as_bytes());
        }
        Value::Hash(hash) => {
            w.push(TAG_HASH);
            w.extend_from_slice(&hash.bytes());
        }
        Value::Vector(vector) => {
            w.push(TAG_VECTOR);
            vector.write(w);
        }
        Value::Signed(signed) => {
            w.push(TAG_SIGNED);
            signed.write(w);
        }
        Value::Transaction(tx) => {
            w.push(TAG_TRANSACTION);
            tx.write(w);
        }
        Value::Block(block) => {
            w.push(TAG_BLOCK);
            block.write(w);
        }
        Value::Order(order) => {
            w.push(TAG_ORDER);
            order.write(w);
        }
        Value::Belief(belief) => {
            w.push(TAG_BELIEF);
            belief.write(w);
        }
        Value::State(state) => {
            w.push(TAG_STATE);
            state.write(w);
        }
        Value::PeerStatus(status) => {
            w.push(TAG_PEER_STATUS);
            status.write(w);
        }
        Value::Result(result) => {
            w.push(TAG_RESULT);
            result.write(w);
        }
    }
}

/// Read one cell from the reader, leaving the cursor after its encoding.
pub(crate) fn read_cell(r: &mut Reader) -> Result<Cell, Fault> {
    let tag = r.u8()?;
    let value = match tag {
        TAG_NULL => Value::Null,
        TAG_LONG => Value::Long(r.vlc_i64()?),
        TAG_BLOB => {
            let len = r.vlc_u64()? as usize;
            Value::Blob(r.bytes(len)?.to_vec())
        }
        TAG_STRING => {
            let len = r.vlc_u64()? as usize;
            let bytes = r.bytes(len)?;
            let s = std::str::from_utf8(bytes)
                .map_err(|_| Fault::BadFormat("invalid UTF-8 in string"))?;
            Value::String(s.to_owned())
        }
        TAG_HASH => Value::Hash(CellHash::new(r.array32()?)),
        TAG_VECTOR => Value::Vector(Vector::read(r)?),
        TAG_SIGNED => Value::Signed(SignedCell::read(r)?),
        TAG_TRANSACTION => Value::Transaction(Transaction::read(r)?),
        TAG_BLOCK => Value::Block(Block::read(r)?),
        TAG_ORDER => Value::Order(Order::read(r)?),
        TAG_BELIEF => Value::Belief(Belief::read(r)?),
        TAG_STATE => Value::State(State::read(r)?),
        TAG_PEER_STATUS => Value::PeerStatus(PeerStatus::read(r)?),
        TAG_RESULT => Value::Result(TxResult::read(r)?),
        _ => return Err(Fault::BadFormat("unknown cell tag")),
    };
    Ok(Cell::new(value))
}

/// Decode a complete cell encoding, rejecting trailing bytes.
pub fn decode_cell(bytes: &[u8]) -> Result<Cell, Fault> {
    let mut r = Reader::new(bytes);
    let cell = read_cell(&mut r)?;
    r.finish()?;
    Ok(cell)
}
