// Packet: one immutable unit of transmission
use bytes::Bytes;
use std::fmt;
use std::ops::Deref;

/// An owned, immutable buffer holding one discrete unit of transmission.
///
/// The length is always the length of the underlying buffer. Cloning shares
/// the same immutable bytes, so a clone handed out by `peek` is an
/// equivalent view of the queued packet.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Packet {
    data: Bytes,
}

impl Packet {
    pub fn new(data: Vec<u8>) -> Self {
        Packet { data: Bytes::from(data) }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Packet {
            data: Bytes::copy_from_slice(data),
        }
    }

    /// Build a packet from a buffer plus the length the caller claims it has.
    ///
    /// # Panics
    ///
    /// Panics if `length` differs from `buf.len()`.
    pub fn with_length(buf: Vec<u8>, length: usize) -> Self {
        assert_eq!(
            buf.len(),
            length,
            "packet length {} does not match buffer size {}",
            length,
            buf.len()
        );
        Packet::new(buf)
    }

    pub fn empty() -> Self {
        Packet { data: Bytes::new() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl Deref for Packet {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for Packet {
    fn from(data: Vec<u8>) -> Self {
        Packet::new(data)
    }
}

impl From<&[u8]> for Packet {
    fn from(data: &[u8]) -> Self {
        Packet::from_slice(data)
    }
}

impl From<Bytes> for Packet {
    fn from(data: Bytes) -> Self {
        Packet { data }
    }
}

// Payloads can be large; only show the head
impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = &self.data[..self.data.len().min(16)];
        f.debug_struct("Packet")
            .field("len", &self.data.len())
            .field("head", &head)
            .finish()
    }
}
