//! Device signing identity.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key bytes: {0}")]
    InvalidKey(String),
    #[error("invalid signature")]
    InvalidSignature,
}

/// A device's Ed25519 signing identity.
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Reconstruct a keypair from a persisted 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    pub fn seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

/// Verify a detached signature against a public key and message.
pub fn verify(public_key: &VerifyingKey, message: &[u8], signature: &[u8; 64]) -> Result<(), CryptoError> {
    let sig = Signature::from_bytes(signature);
    public_key
        .verify(message, &sig)
        .map_err(|_| CryptoError::InvalidSignature)
}

pub fn public_key_from_bytes(bytes: &[u8; 32]) -> Result<VerifyingKey, CryptoError> {
    VerifyingKey::from_bytes(bytes).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_succeeds() {
        let kp = KeyPair::generate();
        let msg = b"hello mesh";
        let sig = kp.sign(msg);
        verify(&kp.public_key(), msg, &sig).unwrap();
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let kp = KeyPair::generate();
        let sig = kp.sign(b"hello mesh");
        let err = verify(&kp.public_key(), b"goodbye mesh", &sig);
        assert!(err.is_err());
    }

    #[test]
    fn seed_roundtrip_reproduces_same_keys() {
        let kp = KeyPair::generate();
        let seed = kp.seed();
        let restored = KeyPair::from_seed(&seed);
        assert_eq!(kp.public_key_bytes(), restored.public_key_bytes());
    }
}
