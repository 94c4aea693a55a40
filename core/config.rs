// Connection configuration, overridable from the environment
//
// NETCODE_TIMEOUT_MS:        inactivity before check_timeout() reports true, 0 disables (default: 15000)
// NETCODE_MTU:               largest datagram the UDP backend emits (default: 1400)
// NETCODE_BATCH_BYTES:       buffered bytes that make flush(false) transmit (default: 700)
// NETCODE_BATCH_DELAY_MS:    age of the oldest buffered packet that makes flush(false) transmit (default: 20)
// NETCODE_KEEPALIVE_MS:      idle time before a keep-alive frame is sent, 0 disables (default: 1000)
// NETCODE_INBOUND_CAPACITY:  max queued inbound packets, 0 = unbounded (default: 0)
// NETCODE_SEND_WINDOW:       max unacknowledged UDP chunks in flight (default: 256)
// NETCODE_RECV_WINDOW:       how far ahead out-of-order UDP chunks are buffered (default: 1024)
// NETCODE_INITIAL_RTO_MS:    retransmit timeout before any RTT sample (default: 250)
// NETCODE_MAX_RTO_MS:        retransmit timeout ceiling after back-off (default: 4000)
// NETCODE_POLL_INTERVAL_MS:  background thread tick (default: 10)
// NETCODE_MAX_PACKET_SIZE:   largest stream packet, below u32::MAX (default: 1048576)
// NETCODE_SOCKET_BUFFER:     kernel socket buffer size (default: 65536)
use crate::error::{NetError, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_MTU: usize = 1400;
const DEFAULT_BATCH_BYTES: usize = 700;
const DEFAULT_BATCH_DELAY_MS: u64 = 20;
const DEFAULT_KEEPALIVE_MS: u64 = 1000;
const DEFAULT_SEND_WINDOW: usize = 256;
const DEFAULT_RECV_WINDOW: usize = 1024;
const DEFAULT_INITIAL_RTO_MS: u64 = 250;
const DEFAULT_MAX_RTO_MS: u64 = 4000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 10;
const DEFAULT_MAX_PACKET_SIZE: usize = 1 << 20;
const DEFAULT_SOCKET_BUFFER: usize = 65536;

/// UDP frame header plus one chunk header. An MTU must leave room for at
/// least one payload byte on top of this.
pub const MIN_FRAME_OVERHEAD: usize = 14;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub timeout: Duration,
    pub mtu: usize,
    pub batch_bytes: usize,
    pub batch_delay: Duration,
    pub keepalive_interval: Duration,
    pub inbound_capacity: Option<usize>,
    pub send_window: usize,
    pub recv_window: usize,
    pub initial_rto: Duration,
    pub max_rto: Duration,
    pub poll_interval: Duration,
    pub max_packet_size: usize,
    pub socket_buffer_bytes: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            mtu: DEFAULT_MTU,
            batch_bytes: DEFAULT_BATCH_BYTES,
            batch_delay: Duration::from_millis(DEFAULT_BATCH_DELAY_MS),
            keepalive_interval: Duration::from_millis(DEFAULT_KEEPALIVE_MS),
            inbound_capacity: None,
            send_window: DEFAULT_SEND_WINDOW,
            recv_window: DEFAULT_RECV_WINDOW,
            initial_rto: Duration::from_millis(DEFAULT_INITIAL_RTO_MS),
            max_rto: Duration::from_millis(DEFAULT_MAX_RTO_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            socket_buffer_bytes: DEFAULT_SOCKET_BUFFER,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_millis(name: &str, default: u64) -> Duration {
    Duration::from_millis(env_or(name, default))
}

impl ConnectionConfig {
    /// Defaults overridden by any `NETCODE_*` variables that parse.
    pub fn from_env() -> Self {
        let inbound_capacity = match env_or("NETCODE_INBOUND_CAPACITY", 0usize) {
            0 => None,
            n => Some(n),
        };

        ConnectionConfig {
            timeout: env_millis("NETCODE_TIMEOUT_MS", DEFAULT_TIMEOUT_MS),
            mtu: env_or("NETCODE_MTU", DEFAULT_MTU),
            batch_bytes: env_or("NETCODE_BATCH_BYTES", DEFAULT_BATCH_BYTES),
            batch_delay: env_millis("NETCODE_BATCH_DELAY_MS", DEFAULT_BATCH_DELAY_MS),
            keepalive_interval: env_millis("NETCODE_KEEPALIVE_MS", DEFAULT_KEEPALIVE_MS),
            inbound_capacity,
            send_window: env_or("NETCODE_SEND_WINDOW", DEFAULT_SEND_WINDOW),
            recv_window: env_or("NETCODE_RECV_WINDOW", DEFAULT_RECV_WINDOW),
            initial_rto: env_millis("NETCODE_INITIAL_RTO_MS", DEFAULT_INITIAL_RTO_MS),
            max_rto: env_millis("NETCODE_MAX_RTO_MS", DEFAULT_MAX_RTO_MS),
            poll_interval: env_millis("NETCODE_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS),
            max_packet_size: env_or("NETCODE_MAX_PACKET_SIZE", DEFAULT_MAX_PACKET_SIZE),
            socket_buffer_bytes: env_or("NETCODE_SOCKET_BUFFER", DEFAULT_SOCKET_BUFFER),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.mtu <= MIN_FRAME_OVERHEAD {
            return Err(NetError::Config(format!(
                "mtu {} leaves no room for payload (overhead is {} bytes)",
                self.mtu, MIN_FRAME_OVERHEAD
            )));
        }
        if self.mtu > u16::MAX as usize {
            return Err(NetError::Config(format!("mtu {} exceeds {}", self.mtu, u16::MAX)));
        }
        if self.send_window == 0 || self.recv_window == 0 {
            return Err(NetError::Config("send and receive windows must be non-zero".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(NetError::Config("poll interval must be non-zero".into()));
        }
        // Stream frames carry a u32 length and reserve u32::MAX for keepalives
        if self.max_packet_size as u64 >= u64::from(u32::MAX) {
            return Err(NetError::Config(format!(
                "max packet size {} does not fit a stream frame",
                self.max_packet_size
            )));
        }
        if self.initial_rto > self.max_rto {
            return Err(NetError::Config(format!(
                "initial rto {:?} exceeds max rto {:?}",
                self.initial_rto, self.max_rto
            )));
        }
        Ok(())
    }

    /// Largest packet payload that fits in one UDP chunk.
    pub fn chunk_payload(&self) -> usize {
        self.mtu.saturating_sub(MIN_FRAME_OVERHEAD)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn with_batching(mut self, batch_bytes: usize, batch_delay: Duration) -> Self {
        self.batch_bytes = batch_bytes;
        self.batch_delay = batch_delay;
        self
    }

    pub fn with_keepalive(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    pub fn with_inbound_capacity(mut self, capacity: Option<usize>) -> Self {
        self.inbound_capacity = capacity;
        self
    }

    pub fn with_rto(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_rto = initial;
        self.max_rto = max;
        self
    }
}
