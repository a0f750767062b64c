//! Scan queue (component F): recent-vs-older partitioning with a single
//! shared round-robin cursor over the older list.
//!
//! The partition is refreshed cheaply from the log — only newly inserted
//! ids are appended, tracked by arrival-sequence watermark — rather than
//! re-scanning the whole log on every tick.

use crate::event_log::{EventLog, EventLogError};
use crate::peer_knowledge::PeerKnowledge;
use meshcore::EventId;
use parking_lot::RwLock;

/// Events received within this many milliseconds of `now` are "recent".
pub const RECENT_WINDOW_MS: u64 = 60_000;

struct ScanState {
    last_seen_arrival_seq: u64,
    /// `(event_id, received_ts, arrival_seq)`, append-only.
    ids: Vec<(EventId, u64, u64)>,
    cursor: usize,
}

/// Recent-vs-older scanning queue shared by every peer's sync tick.
pub struct ScanQueue {
    state: RwLock<ScanState>,
}

impl ScanQueue {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ScanState {
                last_seen_arrival_seq: 0,
                ids: Vec::new(),
                cursor: 0,
            }),
        }
    }

    /// Step 1 of §4.F: pull in only the ids the log has gained since the
    /// last refresh.
    fn refresh(&self, log: &EventLog) -> Result<(), EventLogError> {
        let mut state = self.state.write();
        let watermark = state.last_seen_arrival_seq;
        let mut new_events: Vec<_> = log
            .all_events()?
            .into_iter()
            .filter(|e| e.arrival_seq >= watermark && !state.ids.iter().any(|(id, _, _)| *id == e.event_id))
            .collect();
        new_events.sort_by_key(|e| e.arrival_seq);
        for e in &new_events {
            state.ids.push((e.event_id, e.received_ts, e.arrival_seq));
            state.last_seen_arrival_seq = state.last_seen_arrival_seq.max(e.arrival_seq + 1);
        }
        Ok(())
    }

    /// Produce up to `max_events_per_round` event ids not yet known by
    /// `peer_id`: recent ids (newer-first) capped at `recent_batch`, then
    /// older ids starting at the shared cursor (cursor-order) capped at
    /// `older_batch`.
    #[allow(clippy::too_many_arguments)]
    pub fn produce(
        &self,
        log: &EventLog,
        peer_knowledge: &PeerKnowledge,
        peer_id: &str,
        now_ms: u64,
        recent_batch: usize,
        older_batch: usize,
        max_events_per_round: usize,
    ) -> Result<Vec<EventId>, EventLogError> {
        self.refresh(log)?;
        let mut state = self.state.write();
        let recent_window_start = now_ms.saturating_sub(RECENT_WINDOW_MS);

        let mut recent: Vec<&(EventId, u64, u64)> = state
            .ids
            .iter()
            .filter(|(_, received_ts, _)| *received_ts >= recent_window_start)
            .collect();
        recent.sort_by(|a, b| b.1.cmp(&a.1).then(b.2.cmp(&a.2)));
        let recent_ids: Vec<EventId> = recent
            .into_iter()
            .filter(|(id, _, _)| peer_knowledge.should_send(peer_id, id))
            .take(recent_batch)
            .map(|(id, _, _)| *id)
            .collect();

        let older: Vec<&(EventId, u64, u64)> = state
            .ids
            .iter()
            .filter(|(_, received_ts, _)| *received_ts < recent_window_start)
            .collect();

        let mut older_ids = Vec::new();
        if !older.is_empty() {
            let len = older.len();
            let mut idx = state.cursor % len;
            let mut scanned = 0;
            while scanned < len && older_ids.len() < older_batch {
                let (id, _, _) = older[idx];
                if peer_knowledge.should_send(peer_id, id) {
                    older_ids.push(id);
                }
                idx = (idx + 1) % len;
                scanned += 1;
            }
            state.cursor = idx;
        }

        let mut combined = recent_ids;
        combined.extend(older_ids);
        combined.truncate(max_events_per_round);
        Ok(combined)
    }
}

impl Default for ScanQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use meshcore::Event;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn event(id: u8, received_ts: u64, arrival_seq: u64) -> Event {
        Event {
            event_id: [id; 16],
            author_id: "alice".into(),
            authored_ts: received_ts,
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

    fn make_log() -> (EventLog, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        (EventLog::new(storage), dir)
    }

    #[test]
    fn recent_events_are_offered_newest_first() {
        let (log, _dir) = make_log();
        log.insert(event(1, 100, 0)).unwrap();
        log.insert(event(2, 200, 1)).unwrap();
        let queue = ScanQueue::new();
        let pk = PeerKnowledge::new();
        let out = queue.produce(&log, &pk, "bob", 200, 10, 10, 10).unwrap();
        assert_eq!(out, vec![[2u8; 16], [1u8; 16]]);
    }

    #[test]
    fn events_known_by_peer_are_excluded() {
        let (log, _dir) = make_log();
        log.insert(event(1, 100, 0)).unwrap();
        let queue = ScanQueue::new();
        let pk = PeerKnowledge::new();
        let mut filter = meshcore::BloomFilter::new(1024, 3);
        filter.add(&[1u8; 16]);
        pk.absorb_summary("bob", &filter).unwrap();
        let out = queue.produce(&log, &pk, "bob", 100, 10, 10, 10).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn older_cursor_advances_round_robin_across_calls() {
        let (log, _dir) = make_log();
        // All received far enough in the past to count as "older".
        for i in 0..5u8 {
            log.insert(event(i, 0, i as u64)).unwrap();
        }
        let queue = ScanQueue::new();
        let pk = PeerKnowledge::new();
        let now = RECENT_WINDOW_MS + 1_000;

        let first = queue.produce(&log, &pk, "bob", now, 0, 2, 10).unwrap();
        let second = queue.produce(&log, &pk, "bob", now, 0, 2, 10).unwrap();
        assert_eq!(first, vec![[0u8; 16], [1u8; 16]]);
        assert_eq!(second, vec![[2u8; 16], [3u8; 16]]);
    }

    #[test]
    fn max_events_per_round_caps_combined_output() {
        let (log, _dir) = make_log();
        for i in 0..5u8 {
            log.insert(event(i, 100, i as u64)).unwrap();
        }
        let queue = ScanQueue::new();
        let pk = PeerKnowledge::new();
        let out = queue.produce(&log, &pk, "bob", 100, 10, 10, 2).unwrap();
        assert_eq!(out.len(), 2);
    }
}
