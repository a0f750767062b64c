//! Persistent storage (§10.3): an embedded `sled::Db` with a tree per
//! concern — events, keys, and small scalar metadata.

use meshcore::Event;
use sled::Db;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying device is out of space (§4.D: `insert`'s documented
    /// error).
    #[error("storage is full")]
    StorageFull,
    #[error("sled error: {0}")]
    Sled(sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),
}

/// ENOSPC on Linux and macOS; a `sled::Error::Io` wrapping it means the disk
/// is full rather than some other I/O failure.
const ENOSPC: i32 = 28;

impl From<sled::Error> for StorageError {
    fn from(e: sled::Error) -> Self {
        if let sled::Error::Io(io_err) = &e {
            if io_err.raw_os_error() == Some(ENOSPC) {
                return StorageError::StorageFull;
            }
        }
        StorageError::Sled(e)
    }
}

const KEY_DEVICE_SEED: &str = "device_seed";
const KEY_ARRIVAL_SEQ: &str = "arrival_seq";

/// Storage backend for meshd: an `events` tree keyed by `event_id`, a `keys`
/// tree holding the sealed device keypair seed and peer public keys, and a
/// `meta` tree for small scalars such as the arrival-sequence counter.
pub struct Storage {
    db: Db,
    events: sled::Tree,
    keys: sled::Tree,
    meta: sled::Tree,
}

impl Storage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let events = db.open_tree("events")?;
        let keys = db.open_tree("keys")?;
        let meta = db.open_tree("meta")?;
        Ok(Self { db, events, keys, meta })
    }

    /// `insert` is atomic and idempotent on `event_id` collision: the event
    /// tree is keyed by `event_id`, so a repeat insert just overwrites the
    /// identical bytes.
    pub fn put_event(&self, event: &Event) -> Result<(), StorageError> {
        let value = postcard::to_allocvec(event)?;
        self.events.insert(event.event_id, value)?;
        Ok(())
    }

    pub fn get_event(&self, event_id: &[u8; 16]) -> Result<Option<Event>, StorageError> {
        match self.events.get(event_id)? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn has_event(&self, event_id: &[u8; 16]) -> Result<bool, StorageError> {
        Ok(self.events.contains_key(event_id)?)
    }

    pub fn all_events(&self) -> Result<Vec<Event>, StorageError> {
        self.events
            .iter()
            .values()
            .map(|r| -> Result<Event, StorageError> { Ok(postcard::from_bytes(&r?)?) })
            .collect()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Next arrival-sequence value, persisted so restarts don't reuse numbers.
    pub fn next_arrival_seq(&self) -> Result<u64, StorageError> {
        let next = self.meta.fetch_and_update(KEY_ARRIVAL_SEQ, |old| {
            let current = old
                .map(|bytes| u64::from_le_bytes(bytes.try_into().unwrap_or([0; 8])))
                .unwrap_or(0);
            Some((current + 1).to_le_bytes().to_vec())
        })?;
        Ok(next
            .map(|bytes| u64::from_le_bytes(bytes.as_ref().try_into().unwrap_or([0; 8])))
            .unwrap_or(0))
    }

    /// Load the device's persisted Ed25519 seed, if one was generated in a
    /// prior run.
    pub fn load_device_seed(&self) -> Result<Option<[u8; 32]>, StorageError> {
        Ok(self
            .keys
            .get(KEY_DEVICE_SEED)?
            .map(|bytes| bytes.as_ref().try_into().expect("seed is always 32 bytes")))
    }

    pub fn save_device_seed(&self, seed: &[u8; 32]) -> Result<(), StorageError> {
        self.keys.insert(KEY_DEVICE_SEED, seed.as_slice())?;
        Ok(())
    }

    /// Peer public keys are namespaced under `peer:` so they share the tree
    /// with the device seed without key collisions.
    pub fn save_peer_public(&self, device_id: &str, public_key: &[u8; 32]) -> Result<(), StorageError> {
        self.keys.insert(format!("peer:{device_id}"), public_key.as_slice())?;
        Ok(())
    }

    pub fn load_peer_publics(&self) -> Result<Vec<(String, [u8; 32])>, StorageError> {
        let mut out = Vec::new();
        for entry in self.keys.scan_prefix("peer:") {
            let (key, value) = entry?;
            let device_id = String::from_utf8_lossy(&key["peer:".len()..]).into_owned();
            let public_key: [u8; 32] = value.as_ref().try_into().expect("public key is always 32 bytes");
            out.push((device_id, public_key));
        }
        Ok(out)
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_event(id: u8) -> Event {
        Event {
            event_id: [id; 16],
            author_id: "alice".into(),
            authored_ts: 1000,
            received_ts: 1000,
            arrival_seq: 0,
            ciphertext: vec![id, id, id],
            file_id: None,
            chunk_no: None,
            is_parity: None,
            prf_tag: None,
            covers_chunks: None,
        }
    }

    #[test]
    fn put_then_get_roundtrips() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let event = sample_event(1);
        storage.put_event(&event).unwrap();
        assert!(storage.has_event(&event.event_id).unwrap());
        let back = storage.get_event(&event.event_id).unwrap().unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn repeat_insert_of_same_id_is_idempotent() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let event = sample_event(2);
        storage.put_event(&event).unwrap();
        storage.put_event(&event).unwrap();
        assert_eq!(storage.event_count(), 1);
    }

    #[test]
    fn arrival_seq_is_monotone() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let a = storage.next_arrival_seq().unwrap();
        let b = storage.next_arrival_seq().unwrap();
        assert!(b > a);
    }

    #[test]
    fn enospc_io_error_maps_to_storage_full() {
        let io_err = std::io::Error::from_raw_os_error(ENOSPC);
        let err: StorageError = sled::Error::Io(io_err).into();
        assert!(matches!(err, StorageError::StorageFull));
    }

    #[test]
    fn other_io_error_is_not_storage_full() {
        let io_err = std::io::Error::from_raw_os_error(libc_eacces());
        let err: StorageError = sled::Error::Io(io_err).into();
        assert!(matches!(err, StorageError::Sled(_)));
    }

    /// EACCES, used only to exercise the "not ENOSPC" branch above.
    fn libc_eacces() -> i32 {
        13
    }

    #[test]
    fn device_seed_persists() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        assert!(storage.load_device_seed().unwrap().is_none());
        storage.save_device_seed(&[7u8; 32]).unwrap();
        assert_eq!(storage.load_device_seed().unwrap(), Some([7u8; 32]));
    }

    #[test]
    fn peer_publics_persist_and_list() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        storage.save_peer_public("bob", &[1u8; 32]).unwrap();
        storage.save_peer_public("carol", &[2u8; 32]).unwrap();
        let mut peers = storage.load_peer_publics().unwrap();
        peers.sort();
        assert_eq!(peers, vec![("bob".to_string(), [1u8; 32]), ("carol".to_string(), [2u8; 32])]);
    }
}
