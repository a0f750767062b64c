//! Core event model and Bloom filter for the mesh sync protocol.
//!
//! # Modules
//!
//! - [`bloom`]: fixed-size Bloom filter and the cumulative/ever-growing variant
//! - [`event`]: the stored [`event::Event`] and its decrypted [`event::Payload`] variants
//! - [`crypto`]: content-addressing derivations (event id, file id, PRF tag)
//! - [`error`]: shared error type

pub mod bloom;
pub mod crypto;
pub mod error;
pub mod event;

pub use bloom::{BloomFilter, CumulativeBloom};
pub use error::{Error, Result};
pub use event::{Event, EventId, FileId, Payload};
