//! meshd - peer-to-peer eventually-consistent message and file sync daemon.
//!
//! # Modules
//!
//! - [`config`]: CLI/env configuration (§10.2)
//! - [`storage`]: embedded `sled` persistence (§10.3)
//! - [`keystore`]: device identity and trusted-peer public keys (component B)
//! - [`event_log`]: append-only event store (component D)
//! - [`chunk`]: file chunking, AEAD, and XOR parity (component E)
//! - [`scan_queue`]: recent/older event scan scheduling (component F)
//! - [`peer_knowledge`]: per-peer cumulative Bloom tracking (component G)
//! - [`engine`]: the sync engine and outer message/file API (component H, §6)

pub mod chunk;
pub mod config;
pub mod engine;
pub mod event_log;
pub mod keystore;
pub mod peer_knowledge;
pub mod scan_queue;
pub mod storage;

pub use chunk::ChunkCodec;
pub use config::Config;
pub use engine::{Engine, EngineError, EngineStats};
pub use event_log::EventLog;
pub use keystore::KeyStore;
pub use peer_knowledge::PeerKnowledge;
pub use scan_queue::ScanQueue;
pub use storage::Storage;
