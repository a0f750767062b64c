//! Packet crypto, wire framing, and transport adapters for the mesh sync protocol.
//!
//! - [`crypto`]: device Ed25519 signing identity
//! - [`packet`]: sign+encrypt/decrypt+verify envelope with anti-replay (component C)
//! - [`framing`]: SUMMARY/EVENT wire packets (§6)
//! - [`peer`]: static peer endpoint records
//! - [`transport`]: the `Transport` trait and its UDP-datagram implementation (component I)
//! - [`simulated`]: the deterministic in-process broker (component J)

pub mod crypto;
pub mod framing;
pub mod packet;
pub mod peer;
pub mod simulated;
pub mod transport;

pub use crypto::KeyPair;
pub use framing::SyncPacket;
pub use packet::{PacketCrypto, PacketCryptoStatsSnapshot, PacketError, PeerKeyLookup, SignedRecord, VerifiedPacket};
pub use peer::PeerInfo;
pub use simulated::{SimulatedNetwork, SimulatedNetworkConfig, SimulatedTransport};
pub use transport::{DatagramTransport, InboundPacket, Transport, TransportStats};
