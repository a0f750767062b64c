//! Simulated network (component J): a deterministic in-process broker that
//! implements the same [`Transport`] surface as [`crate::transport::DatagramTransport`],
//! driven by an explicit virtual clock rather than wall time.

use crate::transport::{InboundPacket, Transport, TransportStats};
use parking_lot::Mutex;
use rand::Rng;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy)]
pub struct SimulatedNetworkConfig {
    pub packet_loss: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub jitter_ms: u64,
}

impl Default for SimulatedNetworkConfig {
    fn default() -> Self {
        Self {
            packet_loss: 0.0,
            min_latency_ms: 0,
            max_latency_ms: 0,
            jitter_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub sent: u64,
    pub delivered: u64,
    pub dropped: u64,
}

struct PendingDelivery {
    delivery_time: u64,
    seq: u64,
    target: String,
    bytes: Vec<u8>,
}

impl PartialEq for PendingDelivery {
    fn eq(&self, other: &Self) -> bool {
        self.delivery_time == other.delivery_time && self.seq == other.seq
    }
}
impl Eq for PendingDelivery {}
impl PartialOrd for PendingDelivery {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PendingDelivery {
    // BinaryHeap is a max-heap; reverse so the earliest delivery_time sorts first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .delivery_time
            .cmp(&self.delivery_time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Inner {
    config: SimulatedNetworkConfig,
    virtual_time: u64,
    queue: BinaryHeap<PendingDelivery>,
    online: HashMap<String, bool>,
    inboxes: HashMap<String, mpsc::Sender<InboundPacket>>,
    next_seq: u64,
    stats: NetworkStats,
}

/// A single broker shared by every simulated device in a run.
pub struct SimulatedNetwork {
    inner: Mutex<Inner>,
}

impl SimulatedNetwork {
    pub fn new(config: SimulatedNetworkConfig) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                config,
                virtual_time: 0,
                queue: BinaryHeap::new(),
                online: HashMap::new(),
                inboxes: HashMap::new(),
                next_seq: 0,
                stats: NetworkStats::default(),
            }),
        })
    }

    /// Register a device and get back a [`Transport`] handle plus its inbound stream.
    pub fn register(self: &Arc<Self>, device_id: impl Into<String>) -> (SimulatedTransport, mpsc::Receiver<InboundPacket>) {
        let device_id = device_id.into();
        let (tx, rx) = mpsc::channel(256);
        {
            let mut inner = self.inner.lock();
            inner.inboxes.insert(device_id.clone(), tx);
            inner.online.insert(device_id.clone(), true);
        }
        (
            SimulatedTransport {
                device_id,
                network: self.clone(),
            },
            rx,
        )
    }

    pub fn virtual_time(&self) -> u64 {
        self.inner.lock().virtual_time
    }

    pub fn stats(&self) -> NetworkStats {
        self.inner.lock().stats.clone()
    }

    /// Advance the virtual clock to `now` and deliver everything due by then.
    pub fn tick(&self, now: u64) {
        let mut inner = self.inner.lock();
        inner.virtual_time = now;
        let mut due = Vec::new();
        while let Some(top) = inner.queue.peek() {
            if top.delivery_time > now {
                break;
            }
            due.push(inner.queue.pop().unwrap());
        }
        for delivery in due {
            let target_online = inner.online.get(&delivery.target).copied().unwrap_or(false);
            if !target_online {
                inner.stats.dropped += 1;
                continue;
            }
            if let Some(sender) = inner.inboxes.get(&delivery.target).cloned() {
                inner.stats.delivered += 1;
                let packet = InboundPacket { bytes: delivery.bytes };
                // Best-effort: a full inbox under simulation means the test
                // itself isn't draining fast enough; drop rather than block.
                let _ = sender.try_send(packet);
            } else {
                inner.stats.dropped += 1;
            }
        }
    }

    fn enqueue(&self, from: &str, target: &str, payload: Vec<u8>) {
        let mut inner = self.inner.lock();
        inner.stats.sent += 1;
        if from == target {
            return;
        }
        let mut rng = rand::thread_rng();
        if inner.config.packet_loss > 0.0 && rng.gen::<f64>() < inner.config.packet_loss {
            inner.stats.dropped += 1;
            return;
        }
        let base_latency = if inner.config.max_latency_ms > inner.config.min_latency_ms {
            rng.gen_range(inner.config.min_latency_ms..=inner.config.max_latency_ms)
        } else {
            inner.config.min_latency_ms
        };
        let jitter = if inner.config.jitter_ms > 0 {
            rng.gen_range(0..=inner.config.jitter_ms)
        } else {
            0
        };
        let delivery_time = inner.virtual_time + base_latency + jitter;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.queue.push(PendingDelivery {
            delivery_time,
            seq,
            target: target.to_string(),
            bytes: payload,
        });
    }
}

/// A [`Transport`] handle bound to one simulated device.
pub struct SimulatedTransport {
    device_id: String,
    network: Arc<SimulatedNetwork>,
}

impl Transport for SimulatedTransport {
    fn send(&self, target_device: &str, payload: Vec<u8>) {
        if !self
            .network
            .inner
            .lock()
            .online
            .get(&self.device_id)
            .copied()
            .unwrap_or(false)
        {
            return;
        }
        self.network.enqueue(&self.device_id, target_device, payload);
    }

    fn broadcast(&self, payload: Vec<u8>) {
        if !self
            .network
            .inner
            .lock()
            .online
            .get(&self.device_id)
            .copied()
            .unwrap_or(false)
        {
            return;
        }
        let targets: Vec<String> = {
            let inner = self.network.inner.lock();
            inner.inboxes.keys().cloned().collect()
        };
        for target in targets {
            if target != self.device_id {
                self.network.enqueue(&self.device_id, &target, payload.clone());
            }
        }
    }

    fn active_peers(&self) -> Vec<String> {
        self.network
            .inner
            .lock()
            .inboxes
            .keys()
            .filter(|id| **id != self.device_id)
            .cloned()
            .collect()
    }

    fn set_online(&self, online: bool) {
        self.network.inner.lock().online.insert(self.device_id.clone(), online);
    }

    fn network_stats(&self) -> TransportStats {
        let stats = self.network.stats();
        TransportStats {
            sent: stats.sent,
            delivered: stats.delivered,
            dropped: stats.dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_loss_zero_latency_delivers_immediately() {
        let network = SimulatedNetwork::new(SimulatedNetworkConfig::default());
        let (alice, _alice_rx) = network.register("alice");
        let (_bob, mut bob_rx) = network.register("bob");

        alice.send("bob", b"hi".to_vec());
        network.tick(0);

        let received = bob_rx.try_recv().unwrap();
        assert_eq!(received.bytes, b"hi");
        assert_eq!(network.stats().delivered, 1);
    }

    #[test]
    fn latency_delays_delivery_until_tick_reaches_it() {
        let config = SimulatedNetworkConfig {
            packet_loss: 0.0,
            min_latency_ms: 100,
            max_latency_ms: 100,
            jitter_ms: 0,
        };
        let network = SimulatedNetwork::new(config);
        let (alice, _alice_rx) = network.register("alice");
        let (_bob, mut bob_rx) = network.register("bob");

        alice.send("bob", b"later".to_vec());
        network.tick(50);
        assert!(bob_rx.try_recv().is_err());

        network.tick(100);
        assert_eq!(bob_rx.try_recv().unwrap().bytes, b"later");
    }

    #[test]
    fn full_packet_loss_never_delivers() {
        let config = SimulatedNetworkConfig {
            packet_loss: 1.0,
            min_latency_ms: 0,
            max_latency_ms: 0,
            jitter_ms: 0,
        };
        let network = SimulatedNetwork::new(config);
        let (alice, _alice_rx) = network.register("alice");
        let (_bob, mut bob_rx) = network.register("bob");

        alice.send("bob", b"lost".to_vec());
        network.tick(1000);

        assert!(bob_rx.try_recv().is_err());
        assert_eq!(network.stats().dropped, 1);
    }

    #[test]
    fn offline_target_drops_packet_at_delivery_time() {
        let network = SimulatedNetwork::new(SimulatedNetworkConfig::default());
        let (alice, _alice_rx) = network.register("alice");
        let (bob, mut bob_rx) = network.register("bob");
        bob.set_online(false);

        alice.send("bob", b"hi".to_vec());
        network.tick(0);

        assert!(bob_rx.try_recv().is_err());
        assert_eq!(network.stats().dropped, 1);
    }

    #[test]
    fn broadcast_reaches_all_other_registered_devices() {
        let network = SimulatedNetwork::new(SimulatedNetworkConfig::default());
        let (alice, _alice_rx) = network.register("alice");
        let (_bob, mut bob_rx) = network.register("bob");
        let (_carol, mut carol_rx) = network.register("carol");

        alice.broadcast(b"to everyone".to_vec());
        network.tick(0);

        assert_eq!(bob_rx.try_recv().unwrap().bytes, b"to everyone");
        assert_eq!(carol_rx.try_recv().unwrap().bytes, b"to everyone");
    }

    #[test]
    fn active_peers_excludes_self() {
        let network = SimulatedNetwork::new(SimulatedNetworkConfig::default());
        let (alice, _alice_rx) = network.register("alice");
        let (_bob, _bob_rx) = network.register("bob");
        assert_eq!(alice.active_peers(), vec!["bob".to_string()]);
    }
}
