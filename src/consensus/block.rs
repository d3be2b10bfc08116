/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Blocks, transactions, and per-transaction results.

use crate::cell::encoding::{read_option_string, write_option_string, write_vlc_i64, write_vlc_u64, Reader};
use crate::cell::refs::{Ref, Resolver};
use crate::cell::{Cell, Value};
use crate::error::Fault;
use crate::types::basic::{AccountKey, Address, Timestamp};

/// Error codes carried by a [`TxResult`].
pub mod codes {
    /// A signature did not verify. Reported back to the submitting client.
    pub const SIGNATURE: &str = "SIGNATURE";

    /// The VM raised an exceptional outcome while executing the form.
    pub const EXCEPTION: &str = "EXCEPTION";
}

/// A transaction to be executed by the embedder's VM: a form evaluated as `address`.
///
/// The sequence number is opaque to the core; replay protection belongs to the VM.
#[derive(Clone)]
pub struct Transaction {
    address: Address,
    sequence: i64,
    form: Ref,
}

impl Transaction {
    pub fn new(address: Address, sequence: i64, form: Cell) -> Transaction {
        Transaction {
            address,
            sequence,
            form: Ref::of(form),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    pub fn form(&self) -> &Ref {
        &self.form
    }

    pub fn form_cell(&self, resolver: &dyn Resolver) -> Result<Cell, Fault> {
        self.form.resolve(resolver)
    }

    pub fn into_cell(self) -> Cell {
        Cell::new(Value::Transaction(self))
    }

    pub(crate) fn write(&self, w: &mut Vec<u8>) {
        write_vlc_u64(w, self.address.int());
        write_vlc_i64(w, self.sequence);
        self.form.write(w);
    }

    pub(crate) fn read(r: &mut Reader) -> Result<Transaction, Fault> {
        let address = Address::new(r.vlc_u64()?);
        let sequence = r.vlc_i64()?;
        let form = Ref::read(r)?;
        Ok(Transaction {
            address,
            sequence,
            form,
        })
    }
}

/// A timestamped, ordered batch of signed transactions proposed by one peer.
#[derive(Clone)]
pub struct Block {
    timestamp: Timestamp,
    proposer: AccountKey,
    transactions: Ref,
}

impl Block {
    /// Create a block over the given signed-transaction cells.
    pub fn new(
        resolver: &dyn Resolver,
        timestamp: Timestamp,
        proposer: AccountKey,
        transactions: Vec<Cell>,
    ) -> Result<Block, Fault> {
        let vector = crate::cell::vector::Vector::of(resolver, transactions)?;
        Ok(Block {
            timestamp,
            proposer,
            transactions: Ref::of(vector.to_cell()),
        })
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn proposer(&self) -> AccountKey {
        self.proposer
    }

    pub fn transactions_ref(&self) -> &Ref {
        &self.transactions
    }

    /// The signed-transaction cells of this block, in order.
    pub fn transactions(&self, resolver: &dyn Resolver) -> Result<Vec<Cell>, Fault> {
        self.transactions
            .resolve(resolver)?
            .as_vector()?
            .to_vec(resolver)
    }

    pub fn length(&self, resolver: &dyn Resolver) -> Result<u64, Fault> {
        Ok(self.transactions.resolve(resolver)?.as_vector()?.count())
    }

    pub fn into_cell(self) -> Cell {
        Cell::new(Value::Block(self))
    }

    pub(crate) fn write(&self, w: &mut Vec<u8>) {
        write_vlc_u64(w, self.timestamp.int());
        w.extend_from_slice(&self.proposer.bytes());
        self.transactions.write(w);
    }

    pub(crate) fn read(r: &mut Reader) -> Result<Block, Fault> {
        let timestamp = Timestamp::new(r.vlc_u64()?);
        let proposer = AccountKey::new(r.array32()?);
        let transactions = Ref::read(r)?;
        Ok(Block {
            timestamp,
            proposer,
            transactions,
        })
    }
}

/// The outcome of one transaction, correlated to a client request by `id`.
#[derive(Clone)]
pub struct TxResult {
    id: i64,
    value: Ref,
    error: Option<String>,
}

impl TxResult {
    /// A successful result carrying `value`.
    pub fn ok(id: i64, value: Cell) -> TxResult {
        TxResult {
            id,
            value: Ref::of(value),
            error: None,
        }
    }

    /// A failed result carrying an error code and a message value.
    pub fn error(id: i64, code: &str, message: Cell) -> TxResult {
        TxResult {
            id,
            value: Ref::of(message),
            error: Some(code.to_owned()),
        }
    }

    /// The same result under a different correlation id.
    pub fn with_id(&self, id: i64) -> TxResult {
        TxResult {
            id,
            value: self.value.clone(),
            error: self.error.clone(),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn value_ref(&self) -> &Ref {
        &self.value
    }

    pub fn value(&self, resolver: &dyn Resolver) -> Result<Cell, Fault> {
        self.value.resolve(resolver)
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn into_cell(self) -> Cell {
        Cell::new(Value::Result(self))
    }

    pub(crate) fn write(&self, w: &mut Vec<u8>) {
        write_vlc_i64(w, self.id);
        self.value.write(w);
        write_option_string(w, &self.error);
    }

    pub(crate) fn read(r: &mut Reader) -> Result<TxResult, Fault> {
        let id = r.vlc_i64()?;
        let value = Ref::read(r)?;
        let error = read_option_string(r)?;
        Ok(TxResult { id, value, error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::decode_cell;
    use crate::cell::signed::SignedCell;
    use crate::store::context::Context;
    use crate::store::memory::MemoryStore;
    use crate::types::keypair::Keypair;
    use std::sync::Arc;

    #[test]
    fn block_roundtrip() {
        let cx = Context::new(Arc::new(MemoryStore::new()));
        let keypair = Keypair::from_seed(4);
        let tx = Transaction::new(Address::new(12), -1, Cell::string("(+ 1 2)")).into_cell();
        let signed_tx = SignedCell::sign(&keypair, tx).into_cell();
        let block = Block::new(
            &cx,
            Timestamp::new(1_700_000_000_000),
            keypair.public(),
            vec![signed_tx],
        )
        .unwrap();
        assert_eq!(block.length(&cx).unwrap(), 1);

        let cell = block.into_cell();
        let decoded = decode_cell(cell.encoding()).unwrap();
        assert_eq!(decoded.hash(), cell.hash());
    }

    #[test]
    fn result_roundtrip() {
        let ok = TxResult::ok(7, Cell::long(3)).into_cell();
        let decoded = decode_cell(ok.encoding()).unwrap();
        let result = decoded.as_result().unwrap();
        assert_eq!(result.id(), 7);
        assert!(!result.is_error());

        let err =
            TxResult::error(8, codes::SIGNATURE, Cell::string("Bad Signature!")).into_cell();
        let decoded = decode_cell(err.encoding()).unwrap();
        let result = decoded.as_result().unwrap();
        assert_eq!(result.error_code(), Some(codes::SIGNATURE));
        assert_eq!(result.with_id(9).id(), 9);
    }
}
