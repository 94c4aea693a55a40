//! In-process loopback connections.
//!
//! Both ends live in the same process: whatever one end sends is pushed
//! straight into the other end's inbound queue, so `flush` has nothing to
//! do. Ends can be created as a pair, or rendezvous by name through
//! [`LocalListener`].

use crate::traits::Listener;
use crossbeam::channel::{unbounded, Receiver, Sender};
use netcode_buffer::{inbound_queue, InboundQueue, QueueFeeder};
use netcode_core::{Connection, ConnectionConfig, NetError, Packet, PeerAddress, Result, TrafficCounters};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

// Names currently bound by a LocalListener
static REGISTRY: Lazy<Mutex<HashMap<String, Sender<LocalConnection>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

pub struct LocalConnection {
    inbound: InboundQueue,
    peer: QueueFeeder,
    counters: TrafficCounters,
}

impl LocalConnection {
    /// Two connected ends.
    pub fn pair(config: &ConnectionConfig) -> (LocalConnection, LocalConnection) {
        let (to_a, a_inbound) = inbound_queue(config.inbound_capacity);
        let (to_b, b_inbound) = inbound_queue(config.inbound_capacity);
        let a = LocalConnection {
            inbound: a_inbound,
            peer: to_b,
            counters: TrafficCounters::new(),
        };
        let b = LocalConnection {
            inbound: b_inbound,
            peer: to_a,
            counters: TrafficCounters::new(),
        };
        (a, b)
    }

    /// Connect to the [`LocalListener`] bound under `name`.
    pub fn connect(name: &str, config: &ConnectionConfig) -> Result<LocalConnection> {
        let registry = REGISTRY.lock().unwrap_or_else(|e| e.into_inner());
        let listener = registry
            .get(name)
            .ok_or_else(|| NetError::ConnectionRefused(format!("no local listener named {name}")))?;

        let (ours, theirs) = LocalConnection::pair(config);
        listener
            .send(theirs)
            .map_err(|_| NetError::ConnectionRefused(format!("local listener {name} is gone")))?;
        debug!(name, "local connection established");
        Ok(ours)
    }

    /// Packets waiting to be read on this end.
    pub fn backlog(&self) -> usize {
        self.inbound.len()
    }
}

impl Connection for LocalConnection {
    fn send_packet(&mut self, packet: Packet) {
        self.counters.record_sent(packet.len());
        // A vanished peer simply loses the data
        self.peer.push(packet);
    }

    fn peek(&self, ahead: usize) -> Option<Packet> {
        self.inbound.peek(ahead)
    }

    fn get_data(&mut self) -> Option<Packet> {
        let packet = self.inbound.pop()?;
        self.counters.record_received(packet.len());
        Some(packet)
    }

    fn flush(&mut self, _forced: bool) {}

    fn check_timeout(&self) -> bool {
        self.peer.is_disconnected()
    }

    fn statistics(&self) -> String {
        format!(
            "Statistics for local connection:\n{}\nBacklog: {} packets, {} dropped",
            self.counters.summary(),
            self.inbound.len(),
            self.inbound.dropped()
        )
    }

    fn peer_name(&self) -> PeerAddress {
        PeerAddress::UNSPECIFIED
    }

    fn counters(&self) -> &TrafficCounters {
        &self.counters
    }
}

/// Accepts [`LocalConnection`]s addressed to a process-wide name.
pub struct LocalListener {
    name: String,
    incoming: Receiver<LocalConnection>,
}

impl LocalListener {
    pub fn bind(name: &str) -> Result<LocalListener> {
        let mut registry = REGISTRY.lock().unwrap_or_else(|e| e.into_inner());
        if registry.contains_key(name) {
            return Err(NetError::AddrInUse(name.to_string()));
        }
        let (tx, incoming) = unbounded();
        registry.insert(name.to_string(), tx);
        info!(name, "local listener bound");
        Ok(LocalListener {
            name: name.to_string(),
            incoming,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Listener for LocalListener {
    fn accept(&mut self) -> Result<Option<Box<dyn Connection>>> {
        Ok(self
            .incoming
            .try_recv()
            .ok()
            .map(|conn| Box::new(conn) as Box<dyn Connection>))
    }

    fn local_addr(&self) -> PeerAddress {
        PeerAddress::UNSPECIFIED
    }
}

impl Drop for LocalListener {
    fn drop(&mut self) {
        let mut registry = REGISTRY.lock().unwrap_or_else(|e| e.into_inner());
        registry.remove(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_delivers_without_flush() {
        let (mut a, mut b) = LocalConnection::pair(&ConnectionConfig::default());
        a.send_data(b"hi");
        assert_eq!(b.backlog(), 1);
        assert_eq!(b.get_data().unwrap().data(), b"hi");
        assert!(a.get_data().is_none());
    }

    #[test]
    fn dropping_one_end_times_out_the_other() {
        let (a, b) = LocalConnection::pair(&ConnectionConfig::default());
        assert!(!a.check_timeout());
        drop(b);
        assert!(a.check_timeout());
    }

    #[test]
    fn listener_rendezvous_by_name() {
        let config = ConnectionConfig::default();
        let mut listener = LocalListener::bind("local-test-rendezvous").unwrap();
        assert!(listener.accept().unwrap().is_none());

        let mut client = LocalConnection::connect("local-test-rendezvous", &config).unwrap();
        let mut server = listener.accept().unwrap().expect("pending connection");
        client.send_data(b"ping");
        assert_eq!(server.get_data().unwrap().data(), b"ping");
        server.send_data(b"pong");
        assert_eq!(client.get_data().unwrap().data(), b"pong");
    }

    #[test]
    fn duplicate_bind_rejected_until_dropped() {
        let first = LocalListener::bind("local-test-dup").unwrap();
        assert!(matches!(
            LocalListener::bind("local-test-dup"),
            Err(NetError::AddrInUse(_))
        ));
        drop(first);
        assert!(LocalListener::bind("local-test-dup").is_ok());
    }

    #[test]
    fn unknown_name_refused() {
        let result = LocalConnection::connect("local-test-nobody", &ConnectionConfig::default());
        assert!(matches!(result, Err(NetError::ConnectionRefused(_))));
    }
}
