//! Content-addressing derivations shared by the event log and chunk codec.
//!
//! These are pure functions over already-encrypted bytes; they never touch
//! key material beyond the PSK bytes handed in by the caller.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// `event_id = truncate_16(BLAKE3(ciphertext))`.
pub fn compute_event_id(ciphertext: &[u8]) -> [u8; 16] {
    let hash = blake3::hash(ciphertext);
    let mut id = [0u8; 16];
    id.copy_from_slice(&hash.as_bytes()[0..16]);
    id
}

/// `file_id = truncate_16(BLAKE3(name || creation_ts_be64 || random))`.
pub fn compute_file_id(name: &str, creation_ts: u64, random: &[u8]) -> [u8; 16] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(name.as_bytes());
    hasher.update(&creation_ts.to_be_bytes());
    hasher.update(random);
    let hash = hasher.finalize();
    let mut id = [0u8; 16];
    id.copy_from_slice(&hash.as_bytes()[0..16]);
    id
}

/// Kind tag used inside the PRF-tag input: `P` for parity chunks, `D` for
/// data chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Data,
    Parity,
}

impl ChunkKind {
    fn tag_byte(self) -> u8 {
        match self {
            ChunkKind::Data => b'D',
            ChunkKind::Parity => b'P',
        }
    }
}

/// `prf_tag = HMAC-SHA256(psk, file_id || "-" || chunk_no || "-" || kind)[0..16]`,
/// hex-encoded. A fast, non-decrypting membership/integrity marker.
pub fn compute_prf_tag(psk: &[u8], file_id: &[u8; 16], chunk_no: u32, kind: ChunkKind) -> String {
    let mut mac = HmacSha256::new_from_slice(psk).expect("HMAC accepts any key length");
    mac.update(file_id);
    mac.update(b"-");
    mac.update(chunk_no.to_string().as_bytes());
    mac.update(b"-");
    mac.update(&[kind.tag_byte()]);
    let full = mac.finalize().into_bytes();
    hex::encode(&full[0..16])
}

/// SHA-256 of `signature || authored_ts_be64`, used as the replay-cache key.
pub fn replay_hash(signature: &[u8], authored_ts: u64) -> [u8; 32] {
    use sha2::Digest;
    let mut hasher = Sha256::new();
    hasher.update(signature);
    hasher.update(&authored_ts.to_be_bytes());
    hasher.finalize().into()
}
