/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [Keypair] type as an object used to sign cell hashes and access the public key.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use super::basic::{AccountKey, CellHash, SignatureBytes};

/// A wrapper around [SigningKey](ed25519_dalek::SigningKey) which implements
/// convenience methods for signing cell hashes and accessing the public key.
#[derive(Clone)]
pub struct Keypair(SigningKey);

impl Keypair {
    pub fn new(signing_key: SigningKey) -> Keypair {
        Keypair(signing_key)
    }

    /// Derive a keypair deterministically from a numeric seed.
    ///
    /// The signing key is the SHA-256 digest of the little-endian seed bytes. Seeded
    /// keypairs are reproducible, so they must only be used for testing and local
    /// networks.
    pub fn from_seed(seed: u64) -> Keypair {
        let mut hasher = Sha256::new();
        hasher.update(seed.to_le_bytes());
        let digest: [u8; 32] = hasher.finalize().into();
        Keypair(SigningKey::from_bytes(&digest))
    }

    /// Generate a fresh keypair from the operating system's entropy source.
    pub fn generate() -> Keypair {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Keypair(SigningKey::from_bytes(&bytes))
    }

    /// Sign the 32 bytes of a cell hash.
    pub fn sign_hash(&self, hash: &CellHash) -> SignatureBytes {
        SignatureBytes::new(self.0.sign(&hash.bytes()).to_bytes())
    }

    /// The public account key of this keypair.
    pub fn public(&self) -> AccountKey {
        AccountKey::new(self.0.verifying_key().to_bytes())
    }
}

/// Verify that `signature` was created by the holder of `key` over the 32 bytes of
/// `hash`.
///
/// Returns `false` for byte sequences that are not valid Ed25519 public keys, rather
/// than failing: an unverifiable signer is treated the same as a wrong one.
pub fn verify(hash: &CellHash, signature: &SignatureBytes, key: &AccountKey) -> bool {
    let verifying_key = match VerifyingKey::from_bytes(&key.bytes()) {
        Ok(vk) => vk,
        Err(_) => return false,
    };
    let signature = Signature::from_bytes(&signature.bytes());
    verifying_key.verify(&hash.bytes(), &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_keypairs_are_deterministic() {
        let a = Keypair::from_seed(543212345);
        let b = Keypair::from_seed(543212345);
        assert_eq!(a.public(), b.public());
        assert_ne!(a.public(), Keypair::from_seed(543212346).public());
    }

    #[test]
    fn sign_and_verify() {
        let keypair = Keypair::from_seed(1);
        let hash = CellHash::new([7u8; 32]);
        let signature = keypair.sign_hash(&hash);
        assert!(verify(&hash, &signature, &keypair.public()));

        let mut forged = signature.bytes();
        forged[0] ^= 0x01;
        assert!(!verify(&hash, &SignatureBytes::new(forged), &keypair.public()));

        let other = Keypair::from_seed(2);
        assert!(!verify(&hash, &signature, &other.public()));
    }
}
