//! Append-only event log (component D): indexed by `event_id`, with
//! secondary orderings by `authored_ts` and by `arrival_seq`.
//!
//! The log is the single source of truth (§5); the local cumulative Bloom
//! and scan queue are derived caches rebuilt from it on startup.

use crate::storage::{Storage, StorageError};
use meshcore::Event;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventLogError {
    /// `insert`'s documented error (§4.D): the underlying storage is out of
    /// space.
    #[error("storage is full")]
    StorageFull,
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Append-only store of opaque events.
pub struct EventLog {
    storage: Arc<Storage>,
}

impl EventLog {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Insert is idempotent on `event_id` collision: a repeat returns `Ok(false)`
    /// without disturbing the stored copy (events are immutable, §3).
    pub fn insert(&self, event: Event) -> Result<bool, EventLogError> {
        if self.storage.has_event(&event.event_id)? {
            return Ok(false);
        }
        match self.storage.put_event(&event) {
            Ok(()) => Ok(true),
            Err(StorageError::StorageFull) => Err(EventLogError::StorageFull),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get(&self, event_id: &[u8; 16]) -> Result<Option<Event>, EventLogError> {
        Ok(self.storage.get_event(event_id)?)
    }

    pub fn has(&self, event_id: &[u8; 16]) -> Result<bool, EventLogError> {
        Ok(self.storage.has_event(event_id)?)
    }

    /// All events, ordered by `authored_ts` ascending.
    pub fn all_events(&self) -> Result<Vec<Event>, EventLogError> {
        let mut events = self.storage.all_events()?;
        events.sort_by_key(|e| e.authored_ts);
        Ok(events)
    }

    /// Events with `received_ts > ts`, in arrival order.
    pub fn events_since(&self, ts: u64) -> Result<Vec<Event>, EventLogError> {
        let mut events: Vec<Event> = self
            .storage
            .all_events()?
            .into_iter()
            .filter(|e| e.received_ts > ts)
            .collect();
        events.sort_by_key(|e| e.arrival_seq);
        Ok(events)
    }

    /// Chunk events for `file_id`, ordered by `chunk_no` ascending.
    pub fn chunks_for_file(&self, file_id: &[u8; 16]) -> Result<Vec<Event>, EventLogError> {
        let mut chunks: Vec<Event> = self
            .storage
            .all_events()?
            .into_iter()
            .filter(|e| e.file_id.as_ref() == Some(file_id))
            .collect();
        chunks.sort_by_key(|e| (e.chunk_no.unwrap_or(0), e.is_parity.unwrap_or(false)));
        Ok(chunks)
    }

    pub fn event_count(&self) -> usize {
        self.storage.event_count()
    }

    pub fn next_arrival_seq(&self) -> Result<u64, EventLogError> {
        Ok(self.storage.next_arrival_seq()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_log() -> (EventLog, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        (EventLog::new(storage), dir)
    }

    fn event(id: u8, authored_ts: u64, received_ts: u64, arrival_seq: u64) -> Event {
        Event {
            event_id: [id; 16],
            author_id: "alice".into(),
            authored_ts,
            received_ts,
            arrival_seq,
            ciphertext: vec![id],
            file_id: None,
            chunk_no: None,
            is_parity: None,
            prf_tag: None,
            covers_chunks: None,
        }
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let (log, _dir) = make_log();
        let e = event(1, 100, 100, 0);
        assert!(log.insert(e.clone()).unwrap());
        assert_eq!(log.get(&e.event_id).unwrap(), Some(e));
    }

    #[test]
    fn duplicate_insert_is_idempotent_not_an_error() {
        let (log, _dir) = make_log();
        let e = event(2, 100, 100, 0);
        assert!(log.insert(e.clone()).unwrap());
        assert!(!log.insert(e).unwrap());
        assert_eq!(log.event_count(), 1);
    }

    #[test]
    fn all_events_orders_by_authored_ts() {
        let (log, _dir) = make_log();
        log.insert(event(1, 300, 0, 0)).unwrap();
        log.insert(event(2, 100, 0, 1)).unwrap();
        log.insert(event(3, 200, 0, 2)).unwrap();
        let ts: Vec<u64> = log.all_events().unwrap().iter().map(|e| e.authored_ts).collect();
        assert_eq!(ts, vec![100, 200, 300]);
    }

    #[test]
    fn events_since_filters_by_received_ts() {
        let (log, _dir) = make_log();
        log.insert(event(1, 0, 100, 0)).unwrap();
        log.insert(event(2, 0, 200, 1)).unwrap();
        let recent = log.events_since(150).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].event_id, [2; 16]);
    }

    #[test]
    fn chunks_for_file_orders_by_chunk_no() {
        let (log, _dir) = make_log();
        let mut c0 = event(10, 0, 0, 0);
        c0.file_id = Some([9; 16]);
        c0.chunk_no = Some(1);
        c0.is_parity = Some(false);
        let mut c1 = event(11, 0, 0, 1);
        c1.file_id = Some([9; 16]);
        c1.chunk_no = Some(0);
        c1.is_parity = Some(false);
        log.insert(c0).unwrap();
        log.insert(c1).unwrap();
        let chunks = log.chunks_for_file(&[9; 16]).unwrap();
        assert_eq!(chunks[0].chunk_no, Some(0));
        assert_eq!(chunks[1].chunk_no, Some(1));
    }
}
