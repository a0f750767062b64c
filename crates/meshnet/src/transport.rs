//! Transport adapter (component I): the abstract send/broadcast/receive
//! surface the sync engine depends on, with a real UDP-datagram
//! implementation and a deterministic in-process [`crate::simulated`] one.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One inbound datagram, still PSK-encrypted; the caller hands it to packet
/// crypto for decrypt+verify. Deliberately carries no sender address:
/// authenticated identity only exists after decryption (component C), so the
/// transport layer has nothing trustworthy to attach here.
#[derive(Debug, Clone)]
pub struct InboundPacket {
    pub bytes: Vec<u8>,
}

/// Datagram-level counters surfaced through the outer `stats()` API (§6):
/// `network_stats`. Real UDP has no delivery/drop visibility past the local
/// socket, so [`DatagramTransport`] only ever reports `sent`; the simulated
/// network (component J) reports all three from its own broker stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub sent: u64,
    pub delivered: u64,
    pub dropped: u64,
}

/// The engine's view of the network. `send`/`broadcast` are fire-and-forget;
/// delivery is reported, if at all, via the receiver handed back at
/// construction time, not via a return value or callback (§9, §10.6).
pub trait Transport: Send + Sync {
    fn send(&self, target_device: &str, payload: Vec<u8>);
    fn broadcast(&self, payload: Vec<u8>);
    fn active_peers(&self) -> Vec<String>;
    fn set_online(&self, online: bool);

    /// Best-effort send/delivery/drop counters for `stats()` reporting.
    /// Defaults to all-zero for implementations with no visibility.
    fn network_stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

/// A UDP socket bound to one device, addressing peers by static
/// `device_id -> SocketAddr` configuration.
pub struct DatagramTransport {
    socket: Arc<UdpSocket>,
    peers: RwLock<HashMap<String, SocketAddr>>,
    online: AtomicBool,
    sent: std::sync::atomic::AtomicU64,
}

impl DatagramTransport {
    pub async fn bind(
        bind_addr: SocketAddr,
        peers: HashMap<String, SocketAddr>,
    ) -> Result<(Arc<Self>, mpsc::Receiver<InboundPacket>), TransportError> {
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        let (tx, rx) = mpsc::channel(256);
        let transport = Arc::new(Self {
            socket: socket.clone(),
            peers: RwLock::new(peers),
            online: AtomicBool::new(true),
            sent: std::sync::atomic::AtomicU64::new(0),
        });

        tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((n, _addr)) => {
                        let packet = InboundPacket {
                            bytes: buf[..n].to_vec(),
                        };
                        if tx.send(packet).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "datagram transport recv error");
                    }
                }
            }
        });

        Ok((transport, rx))
    }

    pub fn add_peer(&self, device_id: impl Into<String>, addr: SocketAddr) {
        self.peers.write().insert(device_id.into(), addr);
    }

    pub fn remove_peer(&self, device_id: &str) {
        self.peers.write().remove(device_id);
    }
}

impl Transport for DatagramTransport {
    fn send(&self, target_device: &str, payload: Vec<u8>) {
        if !self.online.load(Ordering::Relaxed) {
            return;
        }
        let Some(addr) = self.peers.read().get(target_device).copied() else {
            tracing::warn!(target_device, "send to unknown peer");
            return;
        };
        self.sent.fetch_add(1, Ordering::Relaxed);
        let socket = self.socket.clone();
        tokio::spawn(async move {
            if let Err(e) = socket.send_to(&payload, addr).await {
                tracing::warn!(error = %e, "datagram send failed");
            }
        });
    }

    fn broadcast(&self, payload: Vec<u8>) {
        if !self.online.load(Ordering::Relaxed) {
            return;
        }
        let addrs: Vec<SocketAddr> = self.peers.read().values().copied().collect();
        self.sent.fetch_add(addrs.len() as u64, Ordering::Relaxed);
        let socket = self.socket.clone();
        tokio::spawn(async move {
            for addr in addrs {
                if let Err(e) = socket.send_to(&payload, addr).await {
                    tracing::warn!(error = %e, "datagram broadcast failed");
                }
            }
        });
    }

    fn active_peers(&self) -> Vec<String> {
        self.peers.read().keys().cloned().collect()
    }

    fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
    }

    fn network_stats(&self) -> TransportStats {
        TransportStats {
            sent: self.sent.load(Ordering::Relaxed),
            delivered: 0,
            dropped: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn udp_roundtrip_delivers_datagram() {
        let (alice, _alice_rx) = DatagramTransport::bind("127.0.0.1:0".parse().unwrap(), HashMap::new())
            .await
            .unwrap();
        let (bob, mut bob_rx) = DatagramTransport::bind("127.0.0.1:0".parse().unwrap(), HashMap::new())
            .await
            .unwrap();

        let bob_addr = bob.socket.local_addr().unwrap();
        alice.add_peer("bob", bob_addr);

        alice.send("bob", b"hello bob".to_vec());

        let received = tokio::time::timeout(Duration::from_secs(2), bob_rx.recv())
            .await
            .expect("timed out waiting for datagram")
            .expect("channel closed");
        assert_eq!(received.bytes, b"hello bob");
    }

    #[tokio::test]
    async fn offline_transport_does_not_send() {
        let (alice, _alice_rx) = DatagramTransport::bind("127.0.0.1:0".parse().unwrap(), HashMap::new())
            .await
            .unwrap();
        let (bob, mut bob_rx) = DatagramTransport::bind("127.0.0.1:0".parse().unwrap(), HashMap::new())
            .await
            .unwrap();
        alice.add_peer("bob", bob.socket.local_addr().unwrap());
        alice.set_online(false);

        alice.send("bob", b"should not arrive".to_vec());

        let result = tokio::time::timeout(Duration::from_millis(300), bob_rx.recv()).await;
        assert!(result.is_err(), "expected no datagram to arrive while offline");
    }

    #[tokio::test]
    async fn active_peers_reflects_registered_devices() {
        let (alice, _rx) = DatagramTransport::bind("127.0.0.1:0".parse().unwrap(), HashMap::new())
            .await
            .unwrap();
        alice.add_peer("bob", "127.0.0.1:9000".parse().unwrap());
        alice.add_peer("carol", "127.0.0.1:9001".parse().unwrap());
        let mut names = alice.active_peers();
        names.sort();
        assert_eq!(names, vec!["bob".to_string(), "carol".to_string()]);
    }
}
