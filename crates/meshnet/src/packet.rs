//! Packet crypto: the two-envelope sign-then-PSK-encrypt scheme (component C).
//!
//! Every packet on the wire is `nonce || AEAD_encrypt(psk_key, nonce, signed_record_bytes)`.
//! The signed record itself binds payload, sender, and timestamp under an
//! Ed25519 signature so a compromised PSK alone cannot forge another
//! member's authorship.

use crate::crypto::{self, KeyPair};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ed25519_dalek::VerifyingKey;
use parking_lot::RwLock;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Abstracted so [`PacketCrypto`] doesn't depend on the concrete key-store
/// type; the daemon's key store implements this.
pub trait PeerKeyLookup: Send + Sync {
    fn peer_public_key(&self, device_id: &str) -> Option<[u8; 32]>;
}

#[derive(Debug, Error)]
pub enum PacketError {
    /// PSK decryption failed. Caller should silently drop.
    #[error("wrong community")]
    WrongCommunity,
    /// Post-decrypt structure invalid. Caller should silently drop.
    #[error("malformed packet: {0}")]
    Malformed(String),
    /// `authored_ts` outside the clock-skew window. Caller should warn+drop.
    #[error("stale packet: authored_ts={authored_ts} now={now}")]
    Stale { authored_ts: u64, now: u64 },
    /// `(signature, authored_ts)` hash already seen. Caller should warn+drop.
    #[error("replayed packet")]
    Replay,
    /// `device_id` not present in the key store. Caller should warn+drop.
    #[error("unknown sender: {0}")]
    UnknownSender(String),
    /// Ed25519 verification failed. Caller should warn+drop.
    #[error("bad signature from {0}")]
    BadSignature(String),
}

/// A record bound together by a detached Ed25519 signature, before PSK
/// encryption. Wire layout: `[device_id_len:u8][device_id][authored_ts:u64 be][signature:64][payload]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRecord {
    pub payload: Vec<u8>,
    pub device_id: String,
    pub authored_ts: u64,
    pub signature: [u8; 64],
}

impl SignedRecord {
    fn signing_input(payload: &[u8], device_id: &str, authored_ts: u64) -> Vec<u8> {
        let mut input = Vec::with_capacity(payload.len() + device_id.len() + 8);
        input.extend_from_slice(payload);
        input.extend_from_slice(device_id.as_bytes());
        input.extend_from_slice(&authored_ts.to_be_bytes());
        input
    }

    pub fn sign(keypair: &KeyPair, device_id: &str, authored_ts: u64, payload: Vec<u8>) -> Self {
        let signature = keypair.sign(&Self::signing_input(&payload, device_id, authored_ts));
        Self {
            payload,
            device_id: device_id.to_string(),
            authored_ts,
            signature,
        }
    }

    pub fn verify_signature(&self, public_key: &VerifyingKey) -> Result<(), PacketError> {
        let input = Self::signing_input(&self.payload, &self.device_id, self.authored_ts);
        crypto::verify(public_key, &input, &self.signature)
            .map_err(|_| PacketError::BadSignature(self.device_id.clone()))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let device_id_bytes = self.device_id.as_bytes();
        let mut out = Vec::with_capacity(1 + device_id_bytes.len() + 8 + 64 + self.payload.len());
        out.push(device_id_bytes.len() as u8);
        out.extend_from_slice(device_id_bytes);
        out.extend_from_slice(&self.authored_ts.to_be_bytes());
        out.extend_from_slice(&self.signature);
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.is_empty() {
            return Err(PacketError::Malformed("empty record".into()));
        }
        let device_id_len = bytes[0] as usize;
        let mut offset = 1usize;
        let min_len = offset + device_id_len + 8 + 64;
        if bytes.len() < min_len {
            return Err(PacketError::Malformed("record shorter than header implies".into()));
        }
        let device_id = String::from_utf8(bytes[offset..offset + device_id_len].to_vec())
            .map_err(|e| PacketError::Malformed(e.to_string()))?;
        offset += device_id_len;
        let authored_ts = u64::from_be_bytes(bytes[offset..offset + 8].try_into().unwrap());
        offset += 8;
        let mut signature = [0u8; 64];
        signature.copy_from_slice(&bytes[offset..offset + 64]);
        offset += 64;
        let payload = bytes[offset..].to_vec();
        Ok(Self {
            payload,
            device_id,
            authored_ts,
            signature,
        })
    }
}

/// A packet that survived decrypt, freshness, replay, and signature checks.
#[derive(Debug, Clone)]
pub struct VerifiedPacket {
    pub payload: Vec<u8>,
    pub device_id: String,
    pub authored_ts: u64,
    pub verified: bool,
}

/// Drop counters for each §7 packet-boundary error, incremented by
/// [`PacketCrypto::open`] so the caller can expose them for metrics/testing
/// (e.g. scenarios 4 and 5: "Replay counter incremented by 1",
/// "WrongCommunity counter incremented").
#[derive(Debug, Default)]
pub struct PacketCryptoStats {
    pub wrong_community: AtomicU64,
    pub malformed: AtomicU64,
    pub stale: AtomicU64,
    pub replay: AtomicU64,
    pub unknown_sender: AtomicU64,
    pub bad_signature: AtomicU64,
}

/// A point-in-time copy of [`PacketCryptoStats`]'s counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketCryptoStatsSnapshot {
    pub wrong_community: u64,
    pub malformed: u64,
    pub stale: u64,
    pub replay: u64,
    pub unknown_sender: u64,
    pub bad_signature: u64,
}

impl PacketCryptoStats {
    fn record(&self, err: &PacketError) {
        let counter = match err {
            PacketError::WrongCommunity => &self.wrong_community,
            PacketError::Malformed(_) => &self.malformed,
            PacketError::Stale { .. } => &self.stale,
            PacketError::Replay => &self.replay,
            PacketError::UnknownSender(_) => &self.unknown_sender,
            PacketError::BadSignature(_) => &self.bad_signature,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PacketCryptoStatsSnapshot {
        PacketCryptoStatsSnapshot {
            wrong_community: self.wrong_community.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            replay: self.replay.load(Ordering::Relaxed),
            unknown_sender: self.unknown_sender.load(Ordering::Relaxed),
            bad_signature: self.bad_signature.load(Ordering::Relaxed),
        }
    }
}

/// Sign+encrypt outgoing packets, decrypt+verify incoming ones, and guard
/// against replay. One instance per device.
pub struct PacketCrypto {
    keypair: Arc<KeyPair>,
    device_id: String,
    cipher: ChaCha20Poly1305,
    keys: Arc<dyn PeerKeyLookup>,
    replay_cache: RwLock<HashMap<[u8; 32], u64>>,
    max_clock_skew_ms: u64,
    replay_window_ms: u64,
    stats: PacketCryptoStats,
}

impl PacketCrypto {
    pub fn new(
        keypair: Arc<KeyPair>,
        device_id: impl Into<String>,
        psk: &[u8; 32],
        keys: Arc<dyn PeerKeyLookup>,
        max_clock_skew_ms: u64,
        replay_window_ms: u64,
    ) -> Self {
        Self {
            keypair,
            device_id: device_id.into(),
            cipher: ChaCha20Poly1305::new(Key::from_slice(psk)),
            keys,
            replay_cache: RwLock::new(HashMap::new()),
            max_clock_skew_ms,
            replay_window_ms,
            stats: PacketCryptoStats::default(),
        }
    }

    /// Snapshot of the §7 packet-boundary drop counters.
    pub fn stats(&self) -> PacketCryptoStatsSnapshot {
        self.stats.snapshot()
    }

    /// Sign, serialize, and PSK-encrypt a payload. Returns `nonce || ciphertext`.
    pub fn seal(&self, payload: &[u8], authored_ts: u64) -> Vec<u8> {
        let record = SignedRecord::sign(&self.keypair, &self.device_id, authored_ts, payload.to_vec());
        let record_bytes = record.to_bytes();

        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, record_bytes.as_ref())
            .expect("chacha20poly1305 encryption is infallible for valid key/nonce lengths");

        let mut wire = Vec::with_capacity(12 + ciphertext.len());
        wire.extend_from_slice(&nonce_bytes);
        wire.extend_from_slice(&ciphertext);
        wire
    }

    /// Decrypt, deserialize, and verify an incoming wire packet: the full
    /// seven-step gate from §4.C (freshness + anti-replay + signature).
    /// Used once per physical datagram, at the transport hop boundary.
    pub fn open(&self, wire: &[u8], now_ms: u64) -> Result<VerifiedPacket, PacketError> {
        match self.open_checked(wire, now_ms) {
            Ok(v) => Ok(v),
            Err(e) => {
                self.stats.record(&e);
                Err(e)
            }
        }
    }

    fn open_checked(&self, wire: &[u8], now_ms: u64) -> Result<VerifiedPacket, PacketError> {
        let record = self.decrypt_and_deserialize(wire)?;

        if now_ms.abs_diff(record.authored_ts) > self.max_clock_skew_ms {
            return Err(PacketError::Stale {
                authored_ts: record.authored_ts,
                now: now_ms,
            });
        }

        let replay_key = crypto_replay_hash(&record.signature, record.authored_ts);
        {
            let cache = self.replay_cache.read();
            if cache.contains_key(&replay_key) {
                return Err(PacketError::Replay);
            }
        }

        let verified = self.verify_signature(&record)?;
        self.replay_cache.write().insert(replay_key, now_ms);
        Ok(verified)
    }

    /// Decrypt, deserialize, and verify the signature of an embedded
    /// signed record — e.g. a stored event's `ciphertext`, which carries
    /// its *original* author and `authored_ts` rather than this hop's.
    ///
    /// Deliberately skips the clock-skew and replay checks: those guard
    /// the freshness of the *transport hop* that carried this packet, which
    /// [`Self::open`] already validated once. Re-applying them here would
    /// reject every event older than `max_clock_skew` on its very first
    /// relay, defeating eventual consistency for late-joining peers.
    pub fn open_inner(&self, ciphertext: &[u8]) -> Result<VerifiedPacket, PacketError> {
        let record = self.decrypt_and_deserialize(ciphertext)?;
        self.verify_signature(&record)
    }

    fn decrypt_and_deserialize(&self, wire: &[u8]) -> Result<SignedRecord, PacketError> {
        if wire.len() < 12 {
            return Err(PacketError::WrongCommunity);
        }
        let (nonce_bytes, ciphertext) = wire.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        let record_bytes = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| PacketError::WrongCommunity)?;
        SignedRecord::from_bytes(&record_bytes)
    }

    fn verify_signature(&self, record: &SignedRecord) -> Result<VerifiedPacket, PacketError> {
        let Some(public_key_bytes) = self.keys.peer_public_key(&record.device_id) else {
            return Err(PacketError::UnknownSender(record.device_id.clone()));
        };
        let public_key = crypto::public_key_from_bytes(&public_key_bytes)
            .map_err(|_| PacketError::UnknownSender(record.device_id.clone()))?;
        record.verify_signature(&public_key)?;

        Ok(VerifiedPacket {
            payload: record.payload.clone(),
            device_id: record.device_id.clone(),
            authored_ts: record.authored_ts,
            verified: true,
        })
    }

    /// Evict replay-cache entries older than `replay_window`. Intended to be
    /// called from a background interval task (§10.6 decision record).
    pub fn evict_replay_cache(&self, now_ms: u64) {
        self.replay_cache
            .write()
            .retain(|_, seen_at| now_ms.saturating_sub(*seen_at) <= self.replay_window_ms);
    }

    pub fn replay_cache_len(&self) -> usize {
        self.replay_cache.read().len()
    }
}

fn crypto_replay_hash(signature: &[u8; 64], authored_ts: u64) -> [u8; 32] {
    meshcore::crypto::replay_hash(signature, authored_ts)
}
