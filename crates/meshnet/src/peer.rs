//! Peer identity and addressing.
//!
//! Devices are identified by the operator-assigned `device_id` string rather
//! than a transport keypair; trust is established separately, by the device's
//! Ed25519 public key living in the key store.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// A known peer endpoint, as supplied by static configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerInfo {
    pub device_id: String,
    pub addr: SocketAddr,
    /// Unix millis this peer was last seen sending us any valid packet.
    pub last_seen: u64,
}

impl PeerInfo {
    pub fn new(device_id: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            device_id: device_id.into(),
            addr,
            last_seen: 0,
        }
    }

    pub fn touch(&mut self, now_ms: u64) {
        self.last_seen = now_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_updates_last_seen() {
        let mut p = PeerInfo::new("bob", "127.0.0.1:9000".parse().unwrap());
        assert_eq!(p.last_seen, 0);
        p.touch(12345);
        assert_eq!(p.last_seen, 12345);
    }
}
