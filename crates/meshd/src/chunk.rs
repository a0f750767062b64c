//! Chunk codec (component E): deterministic chunking of a file into
//! fixed-size encrypted chunk events, PRF-tagged for ownership, with
//! reassembly and optional XOR parity recovery.
//!
//! §10.6 decision record: chunk bodies are AEAD-encrypted (not the
//! reference XOR-keystream+HMAC construction described in §4.E) under a
//! PSK-derived sub-key distinct from the outer packet-crypto key, so a
//! PSK-only compromise path for one doesn't immediately hand over the other.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use meshcore::crypto::{compute_event_id, compute_file_id, compute_prf_tag, ChunkKind};
use meshcore::{Event, FileId};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

/// Plaintext chunk size in bytes (§4.E).
pub const DEFAULT_CHUNK_SIZE: usize = 500;

#[derive(Debug, Error)]
pub enum ChunkError {
    /// Reassembly left at least one data chunk missing after parity recovery
    /// (or with parity disabled/absent). Bubbled to the caller of `read_file`.
    #[error("file reassembly incomplete: {missing} of {total} data chunks missing")]
    Incomplete { missing: usize, total: usize },
    #[error("chunk decryption failed")]
    DecryptionFailed,
}

/// Derives the chunk-body AEAD key from the community PSK, distinct from
/// the outer envelope key so the two ciphers never reuse a key.
fn derive_chunk_key(psk: &[u8; 32]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, psk);
    let mut okm = [0u8; 32];
    hk.expand(b"meshd-chunk-body-key", &mut okm)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    okm
}

fn encrypt_chunk(chunk_key: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(chunk_key));
    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let body = cipher
        .encrypt(nonce, plaintext)
        .expect("chacha20poly1305 encryption is infallible for valid key/nonce lengths");
    let mut out = Vec::with_capacity(12 + body.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&body);
    out
}

fn decrypt_chunk(chunk_key: &[u8; 32], ciphertext: &[u8]) -> Result<Vec<u8>, ChunkError> {
    if ciphertext.len() < 12 {
        return Err(ChunkError::DecryptionFailed);
    }
    let cipher = ChaCha20Poly1305::new(Key::from_slice(chunk_key));
    let (nonce_bytes, body) = ciphertext.split_at(12);
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher.decrypt(nonce, body).map_err(|_| ChunkError::DecryptionFailed)
}

/// Splits files into chunk [`Event`]s and reassembles them back, keyed from
/// the community PSK.
pub struct ChunkCodec {
    psk: [u8; 32],
    chunk_size: usize,
    /// Data chunks per XOR parity group; 0 disables parity.
    parity_multiplier: usize,
}

impl ChunkCodec {
    pub fn new(psk: [u8; 32], chunk_size: usize, parity_multiplier: usize) -> Self {
        Self {
            psk,
            chunk_size: chunk_size.max(1),
            parity_multiplier,
        }
    }

    /// Splits `bytes` into chunk events carrying `author_id`/`authored_ts`.
    /// Returns `(file_id, events)`; the caller stores each event through the
    /// normal event-log/broadcast pipeline like any other event.
    pub fn chunk(
        &self,
        name: &str,
        creation_ts: u64,
        author_id: &str,
        bytes: &[u8],
    ) -> (FileId, Vec<Event>) {
        let mut random = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut random);
        let file_id = compute_file_id(name, creation_ts, &random);
        let chunk_key = derive_chunk_key(&self.psk);

        let data_chunks: Vec<Vec<u8>> = bytes
            .chunks(self.chunk_size)
            .map(|c| {
                let mut padded = c.to_vec();
                padded.resize(self.chunk_size, 0);
                padded
            })
            .collect();

        let mut events = Vec::with_capacity(data_chunks.len());
        for (chunk_no, plaintext) in data_chunks.iter().enumerate() {
            events.push(self.build_event(
                &file_id,
                chunk_no as u32,
                false,
                None,
                &chunk_key,
                plaintext,
                author_id,
                creation_ts,
            ));
        }

        if self.parity_multiplier >= 2 {
            let data_count = data_chunks.len();
            let mut parity_no = data_count as u32;
            for group_start in (0..data_count).step_by(self.parity_multiplier) {
                let group_end = (group_start + self.parity_multiplier).min(data_count);
                if group_end - group_start < 2 {
                    continue;
                }
                let covers: Vec<u32> = (group_start as u32..group_end as u32).collect();
                let mut xor = vec![0u8; self.chunk_size];
                for chunk in &data_chunks[group_start..group_end] {
                    for (x, b) in xor.iter_mut().zip(chunk.iter()) {
                        *x ^= b;
                    }
                }
                events.push(self.build_event(
                    &file_id,
                    parity_no,
                    true,
                    Some(covers),
                    &chunk_key,
                    &xor,
                    author_id,
                    creation_ts,
                ));
                parity_no += 1;
            }
        }

        (file_id, events)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_event(
        &self,
        file_id: &FileId,
        chunk_no: u32,
        is_parity: bool,
        covers_chunks: Option<Vec<u32>>,
        chunk_key: &[u8; 32],
        plaintext: &[u8],
        author_id: &str,
        authored_ts: u64,
    ) -> Event {
        let ciphertext = encrypt_chunk(chunk_key, plaintext);
        let event_id = compute_event_id(&ciphertext);
        let kind = if is_parity { ChunkKind::Parity } else { ChunkKind::Data };
        let prf_tag = compute_prf_tag(&self.psk, file_id, chunk_no, kind);
        Event {
            event_id,
            author_id: author_id.to_string(),
            authored_ts,
            received_ts: authored_ts,
            arrival_seq: 0,
            ciphertext,
            file_id: Some(*file_id),
            chunk_no: Some(chunk_no),
            is_parity: Some(is_parity),
            prf_tag: Some(prf_tag),
            covers_chunks,
        }
    }

    /// Reassemble a file from whatever chunk events the log holds for
    /// `file_id`, sorted by `chunk_no` ascending (§4.E reassembly steps).
    pub fn reassemble(&self, file_id: &FileId, chunks: &[Event]) -> Result<Vec<u8>, ChunkError> {
        let chunk_key = derive_chunk_key(&self.psk);

        let data_total = chunks
            .iter()
            .filter(|e| e.is_parity == Some(false))
            .map(|e| e.chunk_no.unwrap_or(0))
            .max()
            .map(|m| m as usize + 1)
            .unwrap_or(0);

        let mut data_slots: Vec<Option<Vec<u8>>> = vec![None; data_total];
        let mut parity_slots: Vec<(Vec<u32>, Vec<u8>)> = Vec::new();

        for event in chunks {
            let Some(chunk_no) = event.chunk_no else { continue };
            let Some(is_parity) = event.is_parity else { continue };
            let kind = if is_parity { ChunkKind::Parity } else { ChunkKind::Data };
            let expected_tag = compute_prf_tag(&self.psk, file_id, chunk_no, kind);
            if event.prf_tag.as_deref() != Some(expected_tag.as_str()) {
                continue; // mismatch: discard this chunk, §4.E step 2
            }
            let Ok(plaintext) = decrypt_chunk(&chunk_key, &event.ciphertext) else {
                continue;
            };
            if is_parity {
                let covers = event.covers_chunks.clone().unwrap_or_default();
                parity_slots.push((covers, plaintext));
            } else if (chunk_no as usize) < data_total {
                data_slots[chunk_no as usize] = Some(plaintext);
            }
        }

        if self.parity_multiplier >= 2 {
            recover_with_parity(&mut data_slots, &parity_slots);
        }

        let missing = data_slots.iter().filter(|s| s.is_none()).count();
        if missing > 0 {
            return Err(ChunkError::Incomplete {
                missing,
                total: data_total,
            });
        }

        let mut out = Vec::with_capacity(data_total * self.chunk_size);
        for (i, slot) in data_slots.into_iter().enumerate() {
            let mut chunk = slot.expect("checked above: no missing slots");
            if i + 1 == data_total {
                while chunk.last() == Some(&0) {
                    chunk.pop();
                }
            }
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

/// Repeated-scan XOR recovery (§4.E): for each missing data chunk, if some
/// parity group's covered chunks are all present except that one, recover
/// it as `parity XOR (XOR of the others)`. Iterate to a fixed point.
fn recover_with_parity(data_slots: &mut [Option<Vec<u8>>], parity_slots: &[(Vec<u32>, Vec<u8>)]) {
    loop {
        let mut progressed = false;
        for (covers, parity_bytes) in parity_slots {
            let missing: Vec<u32> = covers
                .iter()
                .copied()
                .filter(|&idx| data_slots.get(idx as usize).map(|s| s.is_none()).unwrap_or(false))
                .collect();
            if missing.len() != 1 {
                continue;
            }
            let target = missing[0] as usize;
            let mut recovered = parity_bytes.clone();
            for &idx in covers {
                if idx as usize == target {
                    continue;
                }
                if let Some(Some(bytes)) = data_slots.get(idx as usize) {
                    for (r, b) in recovered.iter_mut().zip(bytes.iter()) {
                        *r ^= b;
                    }
                }
            }
            data_slots[target] = Some(recovered);
            progressed = true;
        }
        if !progressed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(parity: usize) -> ChunkCodec {
        ChunkCodec::new([42u8; 32], 500, parity)
    }

    #[test]
    fn chunk_then_reassemble_roundtrips_without_parity() {
        let codec = codec(0);
        let file = (0..2048u32).map(|i| (i % 256) as u8).collect::<Vec<u8>>();
        let (file_id, events) = codec.chunk("photo.bin", 1000, "alice", &file);
        let back = codec.reassemble(&file_id, &events).unwrap();
        assert_eq!(back, file);
    }

    #[test]
    fn small_file_single_chunk_trims_padding() {
        let codec = codec(0);
        let file = b"hello mesh".to_vec();
        let (file_id, events) = codec.chunk("note.txt", 1, "alice", &file);
        assert_eq!(events.len(), 1);
        let back = codec.reassemble(&file_id, &events).unwrap();
        assert_eq!(back, file);
    }

    #[test]
    fn missing_chunk_without_parity_is_incomplete() {
        let codec = codec(0);
        let file = (0..1500u32).map(|i| (i % 256) as u8).collect::<Vec<u8>>();
        let (file_id, mut events) = codec.chunk("f.bin", 1, "alice", &file);
        events.remove(1);
        let err = codec.reassemble(&file_id, &events).unwrap_err();
        assert!(matches!(err, ChunkError::Incomplete { .. }));
    }

    #[test]
    fn parity_recovers_single_loss_per_group() {
        let codec = codec(2);
        let file = (0..2048u32).map(|i| (i % 256) as u8).collect::<Vec<u8>>();
        let (file_id, events) = codec.chunk("f.bin", 1, "alice", &file);
        // Drop data chunks 1 and 3 (each in a different parity group of size 2).
        let filtered: Vec<Event> = events
            .into_iter()
            .filter(|e| !(e.is_parity == Some(false) && (e.chunk_no == Some(1) || e.chunk_no == Some(3))))
            .collect();
        let back = codec.reassemble(&file_id, &filtered).unwrap();
        assert_eq!(back, file);
    }

    #[test]
    fn tampered_prf_tag_causes_chunk_to_be_discarded() {
        let codec = codec(0);
        let file = b"short file content".to_vec();
        let (file_id, mut events) = codec.chunk("f.bin", 1, "alice", &file);
        events[0].prf_tag = Some("0".repeat(32));
        let err = codec.reassemble(&file_id, &events).unwrap_err();
        assert!(matches!(err, ChunkError::Incomplete { .. }));
    }
}
