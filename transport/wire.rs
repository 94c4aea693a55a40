//! Wire format of the reliable datagram backend.
//!
//! Every UDP datagram is one [`Frame`]: a fixed header followed by zero or
//! more [`Chunk`]s. All multi-byte integers are big-endian.
//!
//! ```text
//! header (7 bytes)
//!  0       4          6       7
//! +-------+----------+-------+
//! |  ack  | checksum | flags |
//! +-------+----------+-------+
//!
//! chunk (7 bytes + payload)
//!  0       4        5       7
//! +-------+--------+-------+-------------+
//! |  seq  | cflags |  len  | payload ... |
//! +-------+--------+-------+-------------+
//! ```
//!
//! `ack` is the next chunk number the sender of the frame expects to
//! receive. `checksum` is the RFC 1071 Internet checksum over the whole
//! frame with the checksum field zeroed. A frame without chunks is a pure
//! ack / keep-alive.

use bytes::Bytes;
use thiserror::Error;

pub const HEADER_LEN: usize = 7;
pub const CHUNK_HEADER_LEN: usize = 7;

const OFF_ACK: usize = 0;
const OFF_CHECKSUM: usize = 4;
const OFF_FLAGS: usize = 6;

/// Header `flags` bits.
pub mod frame_flags {
    /// Sender is going away; no more frames follow.
    pub const CLOSE: u8 = 0b0000_0001;
}

/// Chunk `cflags` bits.
pub mod chunk_flags {
    /// The packet continues in the chunk with the next sequence number.
    pub const MORE: u8 = 0b0000_0001;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub seq: u32,
    pub more: bool,
    pub payload: Bytes,
}

impl Chunk {
    pub fn encoded_len(&self) -> usize {
        CHUNK_HEADER_LEN + self.payload.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    pub ack: u32,
    pub flags: u8,
    pub chunks: Vec<Chunk>,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum WireError {
    #[error("datagram too short: {0} bytes")]
    TooShort(usize),
    #[error("chunk length runs past the end of the datagram")]
    LengthMismatch,
    #[error("checksum verification failed")]
    ChecksumFailed,
}

impl Frame {
    pub fn ack_only(ack: u32) -> Self {
        Frame {
            ack,
            flags: 0,
            chunks: Vec::new(),
        }
    }

    pub fn is_close(&self) -> bool {
        self.flags & frame_flags::CLOSE != 0
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.chunks.iter().map(Chunk::encoded_len).sum::<usize>()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.ack.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes());
        buf.push(self.flags);

        for chunk in &self.chunks {
            let cflags = if chunk.more { chunk_flags::MORE } else { 0 };
            buf.extend_from_slice(&chunk.seq.to_be_bytes());
            buf.push(cflags);
            buf.extend_from_slice(&(chunk.payload.len() as u16).to_be_bytes());
            buf.extend_from_slice(&chunk.payload);
        }

        let csum = internet_checksum(&buf);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());
        buf
    }

    /// Parse one datagram. Chunk payloads share `buf`'s allocation.
    pub fn decode(buf: Bytes) -> Result<Self, WireError> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::TooShort(buf.len()));
        }
        // Checksum sits on an even offset, so summing the frame including
        // the stored value yields zero for an intact frame
        if internet_checksum(&buf) != 0 {
            return Err(WireError::ChecksumFailed);
        }

        let ack = read_u32(&buf, OFF_ACK);
        let flags = buf[OFF_FLAGS];

        let mut chunks = Vec::new();
        let mut offset = HEADER_LEN;
        while offset < buf.len() {
            if buf.len() - offset < CHUNK_HEADER_LEN {
                return Err(WireError::LengthMismatch);
            }
            let seq = read_u32(&buf, offset);
            let cflags = buf[offset + 4];
            let len = u16::from_be_bytes([buf[offset + 5], buf[offset + 6]]) as usize;
            let start = offset + CHUNK_HEADER_LEN;
            if start + len > buf.len() {
                return Err(WireError::LengthMismatch);
            }
            chunks.push(Chunk {
                seq,
                more: cflags & chunk_flags::MORE != 0,
                payload: buf.slice(start..start + len),
            });
            offset = start + len;
        }

        Ok(Frame { ack, flags, chunks })
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// RFC 1071: one's-complement of the one's-complement sum of 16-bit words.
fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = words.remainder() {
        sum += u32::from(*last) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}
