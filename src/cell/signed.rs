/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Signed cells: a value ref together with a signer key and a signature over the
//! value's identity hash.
//!
//! Because the signature is over the hash rather than the full encoding, a signed
//! cell can be verified without resolving its value, which matters for beliefs
//! whose orders arrive lazily over the wire.

use crate::error::Fault;
use crate::types::basic::{AccountKey, SignatureBytes};
use crate::types::keypair::{self, Keypair};

use super::encoding::Reader;
use super::refs::{Ref, Resolver};
use super::{Cell, Value};

#[derive(Clone)]
pub struct SignedCell {
    signer: AccountKey,
    signature: SignatureBytes,
    value: Ref,
}

impl SignedCell {
    /// Sign `value` with `keypair`, producing a signed cell claiming the keypair's
    /// public key as signer.
    pub fn sign(keypair: &Keypair, value: Cell) -> SignedCell {
        let signature = keypair.sign_hash(&value.hash());
        SignedCell {
            signer: keypair.public(),
            signature,
            value: Ref::of(value),
        }
    }

    pub fn new(signer: AccountKey, signature: SignatureBytes, value: Ref) -> SignedCell {
        SignedCell {
            signer,
            signature,
            value,
        }
    }

    pub fn signer(&self) -> AccountKey {
        self.signer
    }

    pub fn signature(&self) -> &SignatureBytes {
        &self.signature
    }

    pub fn value_ref(&self) -> &Ref {
        &self.value
    }

    /// Resolve the signed value.
    pub fn value(&self, resolver: &dyn Resolver) -> Result<Cell, Fault> {
        self.value.resolve(resolver)
    }

    /// Verify the signature against the claimed signer key. Does not resolve the
    /// value.
    pub fn verify(&self) -> bool {
        keypair::verify(&self.value.hash(), &self.signature, &self.signer)
    }

    /// Wrap this signed value into a cell.
    pub fn into_cell(self) -> Cell {
        Cell::new(Value::Signed(self))
    }

    pub(crate) fn write(&self, w: &mut Vec<u8>) {
        w.extend_from_slice(&self.signer.bytes());
        w.extend_from_slice(&self.signature.bytes());
        self.value.write(w);
    }

    pub(crate) fn read(r: &mut Reader) -> Result<SignedCell, Fault> {
        let signer = AccountKey::new(r.array32()?);
        let signature = SignatureBytes::new(r.array64()?);
        let value = Ref::read(r)?;
        Ok(SignedCell {
            signer,
            signature,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::decode_cell;

    #[test]
    fn sign_verify_roundtrip() {
        let keypair = Keypair::from_seed(11);
        let signed = SignedCell::sign(&keypair, Cell::long(99));
        assert!(signed.verify());

        let cell = signed.into_cell();
        let decoded = decode_cell(cell.encoding()).unwrap();
        let decoded_signed = decoded.as_signed().unwrap();
        assert!(decoded_signed.verify());
        assert_eq!(decoded_signed.signer(), keypair.public());
    }

    #[test]
    fn forged_signature_fails() {
        let keypair = Keypair::from_seed(11);
        let signed = SignedCell::sign(&keypair, Cell::long(99));
        let mut bad = signed.signature().bytes();
        bad[3] ^= 0x40;
        let forged = SignedCell::new(
            signed.signer(),
            SignatureBytes::new(bad),
            signed.value_ref().clone(),
        );
        assert!(!forged.verify());
    }

    #[test]
    fn wrong_signer_fails() {
        let keypair = Keypair::from_seed(11);
        let signed = SignedCell::sign(&keypair, Cell::long(99));
        let forged = SignedCell::new(
            Keypair::from_seed(12).public(),
            *signed.signature(),
            signed.value_ref().clone(),
        );
        assert!(!forged.verify());
    }
}
