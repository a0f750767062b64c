//! Wire packets carried inside the PSK envelope (§6): SUMMARY and EVENT.
//!
//! Both are designed to stay within a single UDP-safe datagram; there is no
//! separate CHUNK packet type, file chunks simply travel as EVENT.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

const SUMMARY_TAG: u8 = 0x01;
const EVENT_TAG: u8 = 0x02;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too short")]
    TooShort,
    #[error("unknown frame tag: {0}")]
    UnknownTag(u8),
}

/// A sync-channel packet, already decrypted/verified by the packet-crypto layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPacket {
    Summary {
        filter_bytes: Vec<u8>,
        known_event_count: u32,
    },
    Event {
        event_id: [u8; 16],
        authored_ts: u64,
        author_id: String,
        ciphertext: Vec<u8>,
        /// File-chunk columns (§4.E), carried unencrypted alongside the
        /// ciphertext so a peer can reason about file membership and run
        /// parity recovery without needing to decrypt anything (see
        /// `meshcore::Event`'s own doc comment).
        file_id: Option<[u8; 16]>,
        chunk_no: Option<u32>,
        is_parity: Option<bool>,
        prf_tag: Option<String>,
        covers_chunks: Option<Vec<u32>>,
    },
}

impl SyncPacket {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        match self {
            SyncPacket::Summary {
                filter_bytes,
                known_event_count,
            } => {
                buf.put_u8(SUMMARY_TAG);
                buf.put_slice(filter_bytes);
                buf.put_u32(*known_event_count);
            }
            SyncPacket::Event {
                event_id,
                authored_ts,
                author_id,
                ciphertext,
                file_id,
                chunk_no,
                is_parity,
                prf_tag,
                covers_chunks,
            } => {
                buf.put_u8(EVENT_TAG);
                buf.put_slice(event_id);
                buf.put_u64(*authored_ts);
                let author_bytes = author_id.as_bytes();
                buf.put_u16(author_bytes.len() as u16);
                buf.put_slice(author_bytes);
                buf.put_u32(ciphertext.len() as u32);
                buf.put_slice(ciphertext);
                match file_id {
                    Some(file_id) => {
                        buf.put_u8(1);
                        buf.put_slice(file_id);
                        buf.put_u32(chunk_no.unwrap_or(0));
                        buf.put_u8(is_parity.unwrap_or(false) as u8);
                        let tag_bytes = prf_tag.as_deref().unwrap_or("").as_bytes();
                        buf.put_u16(tag_bytes.len() as u16);
                        buf.put_slice(tag_bytes);
                        let covers = covers_chunks.as_deref().unwrap_or(&[]);
                        buf.put_u16(covers.len() as u16);
                        for c in covers {
                            buf.put_u32(*c);
                        }
                    }
                    None => buf.put_u8(0),
                }
            }
        }
        buf
    }

    pub fn decode(mut bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.is_empty() {
            return Err(FrameError::TooShort);
        }
        let tag = bytes[0];
        bytes.advance(1);
        match tag {
            SUMMARY_TAG => {
                if bytes.len() < 4 {
                    return Err(FrameError::TooShort);
                }
                let split_at = bytes.len() - 4;
                let filter_bytes = bytes[..split_at].to_vec();
                let known_event_count = u32::from_be_bytes(bytes[split_at..].try_into().unwrap());
                Ok(SyncPacket::Summary {
                    filter_bytes,
                    known_event_count,
                })
            }
            EVENT_TAG => {
                if bytes.len() < 16 + 8 + 2 {
                    return Err(FrameError::TooShort);
                }
                let mut event_id = [0u8; 16];
                event_id.copy_from_slice(&bytes[0..16]);
                let authored_ts = u64::from_be_bytes(bytes[16..24].try_into().unwrap());
                let author_id_len = u16::from_be_bytes(bytes[24..26].try_into().unwrap()) as usize;
                let mut rest = &bytes[26..];
                if rest.len() < author_id_len {
                    return Err(FrameError::TooShort);
                }
                let author_id = String::from_utf8_lossy(&rest[..author_id_len]).into_owned();
                rest = &rest[author_id_len..];

                if rest.len() < 4 {
                    return Err(FrameError::TooShort);
                }
                let ciphertext_len = u32::from_be_bytes(rest[0..4].try_into().unwrap()) as usize;
                rest = &rest[4..];
                if rest.len() < ciphertext_len {
                    return Err(FrameError::TooShort);
                }
                let ciphertext = rest[..ciphertext_len].to_vec();
                rest = &rest[ciphertext_len..];

                if rest.is_empty() {
                    return Err(FrameError::TooShort);
                }
                let has_file_meta = rest[0];
                rest = &rest[1..];

                let (file_id, chunk_no, is_parity, prf_tag, covers_chunks) = if has_file_meta == 1 {
                    if rest.len() < 16 + 4 + 1 + 2 {
                        return Err(FrameError::TooShort);
                    }
                    let mut file_id = [0u8; 16];
                    file_id.copy_from_slice(&rest[0..16]);
                    let chunk_no = u32::from_be_bytes(rest[16..20].try_into().unwrap());
                    let is_parity = rest[20] != 0;
                    let tag_len = u16::from_be_bytes(rest[21..23].try_into().unwrap()) as usize;
                    rest = &rest[23..];
                    if rest.len() < tag_len {
                        return Err(FrameError::TooShort);
                    }
                    let prf_tag = String::from_utf8_lossy(&rest[..tag_len]).into_owned();
                    rest = &rest[tag_len..];
                    if rest.len() < 2 {
                        return Err(FrameError::TooShort);
                    }
                    let covers_len = u16::from_be_bytes(rest[0..2].try_into().unwrap()) as usize;
                    rest = &rest[2..];
                    if rest.len() < covers_len * 4 {
                        return Err(FrameError::TooShort);
                    }
                    let covers: Vec<u32> = rest[..covers_len * 4]
                        .chunks_exact(4)
                        .map(|c| u32::from_be_bytes(c.try_into().unwrap()))
                        .collect();
                    (Some(file_id), Some(chunk_no), Some(is_parity), Some(prf_tag), Some(covers))
                } else {
                    (None, None, None, None, None)
                };

                Ok(SyncPacket::Event {
                    event_id,
                    authored_ts,
                    author_id,
                    ciphertext,
                    file_id,
                    chunk_no,
                    is_parity,
                    prf_tag,
                    covers_chunks,
                })
            }
            other => Err(FrameError::UnknownTag(other)),
        }
    }
}
