//! The atomic sync unit and its decrypted payload variants.

use serde::{Deserialize, Serialize};

/// 16-byte content-addressed event id: `truncate_16(BLAKE3(ciphertext))`.
pub type EventId = [u8; 16];

/// 16-byte file identity: `truncate_16(BLAKE3(name || creation_ts || random))`.
pub type FileId = [u8; 16];

/// An opaque, stored event. The sync layer never looks past `ciphertext`;
/// the file-chunk columns are populated only for chunk events and exist so
/// peers can reason about file membership without decrypting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    pub author_id: String,
    pub authored_ts: u64,
    pub received_ts: u64,
    /// Monotone local insertion counter, used for arrival-order queries.
    pub arrival_seq: u64,
    pub ciphertext: Vec<u8>,
    pub file_id: Option<FileId>,
    pub chunk_no: Option<u32>,
    pub is_parity: Option<bool>,
    pub prf_tag: Option<String>,
    pub covers_chunks: Option<Vec<u32>>,
}

impl Event {
    /// True if this row carries file-chunk columns.
    pub fn is_file_chunk(&self) -> bool {
        self.file_id.is_some()
    }
}

/// Decrypted payload variants. The sync core never inspects beyond the tag;
/// everything above the packet/event layer works exclusively with these.
///
/// Externally tagged (the serde default): `postcard` has no `deserialize_any`
/// and can't support `#[serde(tag = "type")]`'s internally-tagged
/// representation, so the variant discriminant is encoded as a plain varint
/// index rather than a `"type"` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    #[serde(rename = "message")]
    Message {
        content: String,
        author: String,
        authored_ts: u64,
        attachments: Vec<FileId>,
    },
    /// A reaction is its own first-class event; removing one is additive,
    /// never a delete of the original reaction event.
    #[serde(rename = "reaction")]
    Reaction {
        message_id: EventId,
        emoji: String,
        author: String,
        authored_ts: u64,
        remove: bool,
    },
    /// Present only inside events that also carry file columns.
    #[serde(rename = "file_chunk")]
    FileChunk {
        file_id: FileId,
        chunk_no: u32,
        is_parity: bool,
        chunk_bytes: Vec<u8>,
    },
}

impl Payload {
    pub fn author(&self) -> &str {
        match self {
            Payload::Message { author, .. } => author,
            Payload::Reaction { author, .. } => author,
            Payload::FileChunk { .. } => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_tag_roundtrips_through_postcard() {
        let p = Payload::Message {
            content: "hello".into(),
            author: "alice".into(),
            authored_ts: 1,
            attachments: vec![],
        };
        let bytes = postcard::to_allocvec(&p).unwrap();
        let back: Payload = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(p, back);
    }

    #[test]
    fn reaction_removal_is_a_distinct_event_not_a_delete() {
        let add = Payload::Reaction {
            message_id: [1; 16],
            emoji: "👍".into(),
            author: "bob".into(),
            authored_ts: 1,
            remove: false,
        };
        let remove = Payload::Reaction {
            message_id: [1; 16],
            emoji: "👍".into(),
            author: "bob".into(),
            authored_ts: 2,
            remove: true,
        };
        assert_ne!(add, remove);
    }
}
