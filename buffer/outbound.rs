// Outbound batching buffer: holds sent packets until the backend flushes
use netcode_core::Packet;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// When `flush(false)` is allowed to transmit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Transmit once this many payload bytes are buffered
    pub batch_bytes: usize,
    /// Transmit once the oldest buffered packet is this old
    pub batch_delay: Duration,
}

#[derive(Debug)]
pub struct OutboundBuffer {
    packets: VecDeque<Packet>,
    bytes: usize,
    oldest: Option<Instant>,
    policy: BatchPolicy,
}

impl OutboundBuffer {
    pub fn new(policy: BatchPolicy) -> Self {
        OutboundBuffer {
            packets: VecDeque::new(),
            bytes: 0,
            oldest: None,
            policy,
        }
    }

    pub fn push(&mut self, packet: Packet) {
        if self.packets.is_empty() {
            self.oldest = Some(Instant::now());
        }
        self.bytes += packet.len();
        self.packets.push_back(packet);
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Buffered payload bytes.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Whether a flush with the given `forced` flag should transmit now.
    pub fn should_flush(&self, forced: bool) -> bool {
        if self.packets.is_empty() {
            return false;
        }
        if forced || self.bytes >= self.policy.batch_bytes {
            return true;
        }
        self.oldest
            .map(|t| t.elapsed() >= self.policy.batch_delay)
            .unwrap_or(false)
    }

    /// Take everything buffered, oldest first.
    pub fn drain(&mut self) -> Vec<Packet> {
        self.bytes = 0;
        self.oldest = None;
        self.packets.drain(..).collect()
    }

    /// Take everything if the policy allows it, otherwise nothing.
    pub fn take_batch(&mut self, forced: bool) -> Option<Vec<Packet>> {
        if self.should_flush(forced) {
            Some(self.drain())
        } else {
            None
        }
    }
}
