//! Receive-side resequencing and reassembly for the datagram backend.
//!
//! Chunks may arrive out of order or more than once. The resequencer keeps
//! those that fall inside the receive window, releases the contiguous run
//! starting at `rcv_nxt`, and glues fragments back together so that only
//! whole packets ever leave it, in sequence order.

use crate::wire::Chunk;
use bytes::{Bytes, BytesMut};
use netcode_core::Packet;
use std::collections::HashMap;

/// Returns `true` when sequence number `a` is strictly before `b` in
/// wrap-around space.
#[inline]
pub fn seq_lt(a: u32, b: u32) -> bool {
    a != b && b.wrapping_sub(a) <= u32::MAX / 2
}

/// What happened to one inbound chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Next expected chunk; it and any buffered successors were released
    Accepted,
    /// Ahead of `rcv_nxt`; held until the gap fills
    Buffered,
    /// Already delivered or already buffered
    Duplicate,
    /// Too far ahead to buffer
    OutOfWindow,
}

#[derive(Debug)]
pub struct Resequencer {
    rcv_nxt: u32,
    window: u32,
    // Keyed by absolute sequence number, all within the window past rcv_nxt
    pending: HashMap<u32, Chunk>,
    // Fragments of the packet currently being reassembled
    partial: Vec<Bytes>,
}

impl Resequencer {
    pub fn new(rcv_nxt: u32, window: usize) -> Self {
        Resequencer {
            rcv_nxt,
            window: window.min(u32::MAX as usize / 2) as u32,
            pending: HashMap::new(),
            partial: Vec::new(),
        }
    }

    /// Cumulative ack: next chunk number expected.
    pub fn ack_number(&self) -> u32 {
        self.rcv_nxt
    }

    /// Chunks waiting for an earlier gap to fill.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Accept one chunk and append any packets it completes to `ready`.
    pub fn on_chunk(&mut self, chunk: Chunk, ready: &mut Vec<Packet>) -> ChunkOutcome {
        if seq_lt(chunk.seq, self.rcv_nxt) {
            return ChunkOutcome::Duplicate;
        }
        let distance = chunk.seq.wrapping_sub(self.rcv_nxt);
        if distance >= self.window {
            return ChunkOutcome::OutOfWindow;
        }
        if distance > 0 {
            if self.pending.contains_key(&chunk.seq) {
                return ChunkOutcome::Duplicate;
            }
            self.pending.insert(chunk.seq, chunk);
            return ChunkOutcome::Buffered;
        }

        self.deliver(chunk, ready);
        // Drain the contiguous run that just became deliverable
        while let Some(next) = self.pending.remove(&self.rcv_nxt) {
            self.deliver(next, ready);
        }
        ChunkOutcome::Accepted
    }

    fn deliver(&mut self, chunk: Chunk, ready: &mut Vec<Packet>) {
        self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
        self.partial.push(chunk.payload);
        if chunk.more {
            return;
        }
        let packet = if self.partial.len() == 1 {
            Packet::from(self.partial.pop().unwrap_or_default())
        } else {
            let total = self.partial.iter().map(Bytes::len).sum();
            let mut joined = BytesMut::with_capacity(total);
            for part in self.partial.drain(..) {
                joined.extend_from_slice(&part);
            }
            Packet::from(joined.freeze())
        };
        ready.push(packet);
    }
}
