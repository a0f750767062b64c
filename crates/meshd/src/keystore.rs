//! Key store (component B): the device's own signing keypair plus the
//! trusted-peer public key table.
//!
//! The community PSK itself is resolved once at config load time
//! ([`crate::config::Config::resolve_psk`]); this module only owns identity
//! material, not the PSK.

use base64::Engine;
use meshnet::crypto::KeyPair;
use meshnet::packet::PeerKeyLookup;
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyStoreError {
    /// Private key requested before a keypair was generated or loaded.
    #[error("key store not initialized")]
    NotInitialized,
    #[error("invalid base64 public key: {0}")]
    InvalidBase64(String),
    #[error("invalid public key bytes: expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// Holds the device's Ed25519 identity and the table of trusted peer public
/// keys, keyed by `device_id`.
pub struct KeyStore {
    keypair: RwLock<Option<KeyPair>>,
    peers: RwLock<HashMap<String, [u8; 32]>>,
}

impl KeyStore {
    /// An empty store; call [`Self::with_keypair`] before signing, exporting
    /// the public key, or calling [`Self::own_private`] — every one of those
    /// fails with [`KeyStoreError::NotInitialized`] until then.
    pub fn new() -> Self {
        Self {
            keypair: RwLock::new(None),
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Install an already-generated/loaded keypair.
    pub fn with_keypair(keypair: KeyPair) -> Self {
        Self {
            keypair: RwLock::new(Some(keypair)),
            peers: RwLock::new(HashMap::new()),
        }
    }

    pub fn own_public(&self) -> Result<[u8; 32], KeyStoreError> {
        self.keypair
            .read()
            .as_ref()
            .map(|kp| kp.public_key_bytes())
            .ok_or(KeyStoreError::NotInitialized)
    }

    /// The device's own private key seed (§4.B). Fails with
    /// [`KeyStoreError::NotInitialized`] before a keypair has been generated
    /// or loaded.
    pub fn own_private(&self) -> Result<[u8; 32], KeyStoreError> {
        self.keypair
            .read()
            .as_ref()
            .map(|kp| kp.seed())
            .ok_or(KeyStoreError::NotInitialized)
    }

    /// Sign a message with the device's own private key.
    pub fn sign(&self, message: &[u8]) -> Result<[u8; 64], KeyStoreError> {
        self.keypair
            .read()
            .as_ref()
            .map(|kp| kp.sign(message))
            .ok_or(KeyStoreError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.keypair.read().is_some()
    }

    pub fn add_peer(&self, device_id: impl Into<String>, public_key: [u8; 32]) {
        self.peers.write().insert(device_id.into(), public_key);
    }

    pub fn remove_peer(&self, device_id: &str) {
        self.peers.write().remove(device_id);
    }

    pub fn peer_public(&self, device_id: &str) -> Option<[u8; 32]> {
        self.peers.read().get(device_id).copied()
    }

    pub fn is_trusted(&self, device_id: &str) -> bool {
        self.peers.read().contains_key(device_id)
    }

    pub fn trusted_peers(&self) -> Vec<String> {
        self.peers.read().keys().cloned().collect()
    }

    pub fn export_public_base64(&self) -> Result<String, KeyStoreError> {
        let bytes = self.own_public()?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn import_peer_public_base64(
        &self,
        device_id: impl Into<String>,
        encoded: &str,
    ) -> Result<(), KeyStoreError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| KeyStoreError::InvalidBase64(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(KeyStoreError::InvalidLength(bytes.len()));
        }
        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(&bytes);
        self.add_peer(device_id, public_key);
        Ok(())
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapter so [`meshnet::packet::PacketCrypto`] can resolve sender public
/// keys without depending on the concrete key-store type.
impl PeerKeyLookup for KeyStore {
    fn peer_public_key(&self, device_id: &str) -> Option<[u8; 32]> {
        self.peer_public(device_id)
    }
}
