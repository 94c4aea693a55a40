// Traffic accounting shared by every backend
use std::sync::atomic::{AtomicU64, Ordering};

/// Cumulative application-visible byte counters.
///
/// Both counters only ever grow, once per `send_*` or `get_data` call.
/// Protocol overhead is never counted here.
#[derive(Debug, Default)]
pub struct TrafficCounters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
}

impl TrafficCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self, len: usize) {
        self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self, len: usize) {
        self.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    /// "Sent: N bytes in P packets, Received: ..." line used by every
    /// backend's statistics.
    pub fn summary(&self) -> String {
        format!(
            "Sent: {} bytes in {} packets, Received: {} bytes in {} packets",
            self.bytes_sent(),
            self.packets_sent(),
            self.bytes_received(),
            self.packets_received()
        )
    }
}
