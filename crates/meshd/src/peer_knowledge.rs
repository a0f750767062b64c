//! Peer knowledge (component G): `peer_id -> CumulativeBloom`, seeded by
//! every filter that peer has ever sent us (union, never reset).

use meshcore::bloom::{BloomFilter, UDP_BUDGET_BYTES};
use meshcore::{CumulativeBloom, Error as CoreError, EventId};
use parking_lot::RwLock;
use std::collections::HashMap;

/// The bit-length/hash-count a freshly-seen peer's cumulative filter starts
/// at, before the first real SUMMARY union reshapes it. Matches
/// [`BloomFilter::udp_optimal`]'s own default sizing target so a `merge`
/// against whatever shape a peer's first SUMMARY carries doesn't trip
/// `ShapeMismatch` in the common case.
const DEFAULT_EXPECTED_ITEMS: usize = 1024;

/// `peer_id -> CumulativeBloom` tracking everything a peer has ever told us
/// it has.
pub struct PeerKnowledge {
    knowledge: RwLock<HashMap<String, CumulativeBloom>>,
}

impl PeerKnowledge {
    pub fn new() -> Self {
        Self {
            knowledge: RwLock::new(HashMap::new()),
        }
    }

    /// Union an inbound SUMMARY filter into the peer's stored knowledge.
    /// The first summary from a peer seeds its shape; later summaries must
    /// share that shape to merge (`ShapeMismatch` is dropped by the caller
    /// per §7 policy, not retried here).
    pub fn absorb_summary(&self, peer_id: &str, filter: &BloomFilter) -> Result<(), CoreError> {
        let mut knowledge = self.knowledge.write();
        match knowledge.get_mut(peer_id) {
            Some(existing) => existing.union_in_place(filter),
            None => {
                let mut seeded = CumulativeBloom::new(filter.m(), filter.k());
                seeded.union_in_place(filter)?;
                knowledge.insert(peer_id.to_string(), seeded);
                Ok(())
            }
        }
    }

    /// `should_send(peer, id) = !knowledge[peer].test(id)`. Absence of a
    /// peer means every event is assumed unknown to them.
    pub fn should_send(&self, peer_id: &str, id: &EventId) -> bool {
        match self.knowledge.read().get(peer_id) {
            Some(bloom) => !bloom.test(id),
            None => true,
        }
    }

    pub fn known_peers(&self) -> Vec<String> {
        self.knowledge.read().keys().cloned().collect()
    }

    /// Rough union-cardinality estimate for a peer: how many events we
    /// believe they hold. Diagnostic only (§4.H; never for correctness
    /// decisions) — `Engine::stats()`'s `sync_percentage` is derived from
    /// peer-reported SUMMARY counts instead, not from this estimate.
    pub fn estimated_known_count(&self, peer_id: &str) -> u64 {
        self.knowledge
            .read()
            .get(peer_id)
            .map(|b| b.inner().added_count())
            .unwrap_or(0)
    }

    /// A fresh, appropriately-shaped filter to seed a never-before-seen
    /// peer, so the first `absorb_summary` call doesn't need special-casing
    /// shape mismatches at the call site.
    pub fn default_shape() -> BloomFilter {
        BloomFilter::udp_optimal(DEFAULT_EXPECTED_ITEMS)
    }

    /// Sanity check that the default shape fits the UDP budget, matching
    /// the local cumulative filter's own transmission view.
    pub fn default_shape_fits_budget() -> bool {
        Self::default_shape().serialize().len() <= UDP_BUDGET_BYTES
    }
}

impl Default for PeerKnowledge {
    fn default() -> Self {
        Self::new()
    }
}
