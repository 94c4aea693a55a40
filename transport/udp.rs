//! Reliable datagram connection over UDP.
//!
//! Each [`UdpConnection`] runs one worker thread that reads datagrams
//! (either straight from its own connected socket, or from the channel a
//! [`UdpListener`] demultiplexes into), drives the [`ReliableState`] and
//! pushes completed packets into the inbound queue. The application thread
//! only touches the outbound buffer and, on flush, the shared state.

use crate::reliable::ReliableState;
use crate::traits::Listener;
use crate::wire::Frame;
use bytes::Bytes;
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use netcode_buffer::{inbound_queue, BatchPolicy, InboundQueue, OutboundBuffer, QueueFeeder};
use netcode_core::{
    Connection, ConnectionConfig, Liveness, NetError, Packet, PeerAddress, Result, TrafficCounters,
};
use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// Largest possible UDP payload
const RECV_BUFFER_SIZE: usize = 65536;

// How long a closed peer stays ignored when no timeout is configured
const DEFAULT_TOMBSTONE_TTL: Duration = Duration::from_secs(15);

/// Where a connection's datagrams go.
#[derive(Debug)]
enum DatagramSink {
    /// Socket `connect`ed to the peer
    Connected(Arc<UdpSocket>),
    /// Listener socket shared with other peers
    Shared(Arc<UdpSocket>, SocketAddr),
}

impl DatagramSink {
    fn send(&self, datagram: &[u8]) -> io::Result<usize> {
        match self {
            DatagramSink::Connected(socket) => socket.send(datagram),
            DatagramSink::Shared(socket, peer) => socket.send_to(datagram, peer),
        }
    }
}

/// Where a connection's datagrams come from.
enum DatagramSource {
    Socket(Arc<UdpSocket>),
    Channel(Receiver<Bytes>),
}

enum Received {
    Datagram(Bytes),
    Idle,
    Gone,
}

impl DatagramSource {
    fn recv(&self, buf: &mut [u8], wait: Duration) -> Received {
        match self {
            // Read timeout was set to the poll interval at construction
            DatagramSource::Socket(socket) => match socket.recv(buf) {
                Ok(n) => Received::Datagram(Bytes::copy_from_slice(&buf[..n])),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    Received::Idle
                }
                // ICMP port unreachable from a peer that is not up (yet)
                Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                    thread::sleep(wait);
                    Received::Idle
                }
                Err(e) => {
                    warn!("udp receive failed: {}", e);
                    Received::Gone
                }
            },
            DatagramSource::Channel(rx) => match rx.recv_timeout(wait) {
                Ok(datagram) => Received::Datagram(datagram),
                Err(RecvTimeoutError::Timeout) => Received::Idle,
                Err(RecvTimeoutError::Disconnected) => Received::Gone,
            },
        }
    }
}

/// State shared between the application side and the worker thread.
#[derive(Debug)]
struct Session {
    state: Mutex<ReliableState>,
    sink: DatagramSink,
    peer: SocketAddr,
    liveness: Liveness,
    feeder: QueueFeeder,
    closed: AtomicBool,
}

impl Session {
    fn state(&self) -> MutexGuard<'_, ReliableState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send_all(&self, datagrams: Vec<Vec<u8>>) {
        for datagram in datagrams {
            // Loss is the reliability layer's problem; only log
            if let Err(e) = self.sink.send(&datagram) {
                debug!(peer = %self.peer, "udp send failed: {}", e);
            }
        }
    }

    fn on_datagram(&self, datagram: Bytes) {
        let mut state = self.state();
        let delivery = match state.on_datagram(datagram, Instant::now()) {
            Ok(delivery) => delivery,
            Err(e) => {
                debug!(peer = %self.peer, "dropping malformed datagram: {}", e);
                return;
            }
        };
        self.liveness.touch();
        for packet in delivery.packets {
            self.feeder.push(packet);
        }
        if delivery.closed_by_peer {
            info!(peer = %self.peer, "peer closed the connection");
            self.liveness.mark_broken();
        }
    }

    fn tick(&self) {
        let datagrams = self.state().on_tick(Instant::now());
        self.send_all(datagrams);
    }

    fn run(self: Arc<Self>, source: DatagramSource, poll: Duration) {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        while !self.closed.load(Ordering::Acquire) {
            match source.recv(&mut buf, poll) {
                Received::Datagram(datagram) => self.on_datagram(datagram),
                Received::Idle => {}
                Received::Gone => {
                    self.liveness.mark_broken();
                    break;
                }
            }
            self.tick();
        }
        debug!(peer = %self.peer, "udp worker exiting");
    }
}

/// Reliable, ordered packet connection over UDP.
pub struct UdpConnection {
    session: Arc<Session>,
    inbound: InboundQueue,
    outbound: OutboundBuffer,
    counters: TrafficCounters,
    worker: Option<JoinHandle<()>>,
}

impl UdpConnection {
    /// Bind an ephemeral local socket and talk to `peer`.
    pub fn connect<A: ToSocketAddrs>(peer: A, config: ConnectionConfig) -> Result<Self> {
        config.validate()?;
        let peer = peer
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| NetError::InvalidAddress("address resolved to nothing".into()))?;
        let local: SocketAddr = if peer.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local)?;
        socket.connect(peer)?;
        socket.set_read_timeout(Some(config.poll_interval))?;
        size_socket_buffers(&socket, config.socket_buffer_bytes);
        let socket = Arc::new(socket);

        let conn = Self::start(
            DatagramSink::Connected(Arc::clone(&socket)),
            DatagramSource::Socket(socket),
            peer,
            &config,
        )?;
        // Announce ourselves so a listener can hand us out before any data
        let hello = conn.session.state().ack_frame(Instant::now());
        conn.session.send_all(vec![hello]);
        info!(%peer, "udp connection opened");
        Ok(conn)
    }

    fn start(
        sink: DatagramSink,
        source: DatagramSource,
        peer: SocketAddr,
        config: &ConnectionConfig,
    ) -> Result<Self> {
        let (feeder, inbound) = inbound_queue(config.inbound_capacity);
        let session = Arc::new(Session {
            state: Mutex::new(ReliableState::new(config)),
            sink,
            peer,
            liveness: Liveness::new(config.timeout),
            feeder,
            closed: AtomicBool::new(false),
        });

        let poll = config.poll_interval;
        let worker_session = Arc::clone(&session);
        let worker = thread::Builder::new()
            .name("netcode-udp-worker".to_string())
            .spawn(move || worker_session.run(source, poll))?;

        Ok(UdpConnection {
            session,
            inbound,
            outbound: OutboundBuffer::new(BatchPolicy {
                batch_bytes: config.batch_bytes,
                batch_delay: config.batch_delay,
            }),
            counters: TrafficCounters::new(),
            worker: Some(worker),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.session.peer
    }
}

impl Connection for UdpConnection {
    fn send_packet(&mut self, packet: Packet) {
        self.counters.record_sent(packet.len());
        self.outbound.push(packet);
    }

    fn peek(&self, ahead: usize) -> Option<Packet> {
        self.inbound.peek(ahead)
    }

    fn get_data(&mut self) -> Option<Packet> {
        let packet = self.inbound.pop()?;
        self.counters.record_received(packet.len());
        Some(packet)
    }

    fn flush(&mut self, forced: bool) {
        let Some(batch) = self.outbound.take_batch(forced) else {
            return;
        };
        let datagrams = {
            let mut state = self.session.state();
            state.enqueue_packets(batch);
            state.transmit_new(Instant::now())
        };
        self.session.send_all(datagrams);
    }

    fn check_timeout(&self) -> bool {
        self.session.liveness.is_timed_out()
    }

    fn statistics(&self) -> String {
        let state = self.session.state();
        format!(
            "Statistics for UDP connection to {}:\n{}\n{}\n\
             Inbound queue: {} waiting, {} dropped; outbound buffer: {} packets\n\
             Idle for {}ms (timeout {}ms)",
            self.session.peer,
            self.counters.summary(),
            state.describe(),
            self.inbound.len(),
            self.inbound.dropped(),
            self.outbound.len(),
            self.session.liveness.idle_for().as_millis(),
            self.session.liveness.timeout().as_millis()
        )
    }

    fn peer_name(&self) -> PeerAddress {
        PeerAddress::from(self.session.peer)
    }

    fn counters(&self) -> &TrafficCounters {
        &self.counters
    }
}

impl Drop for UdpConnection {
    fn drop(&mut self) {
        let bye = self.session.state().close_frame(Instant::now());
        self.session.send_all(vec![bye]);
        self.session.closed.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        debug!(peer = %self.session.peer, "udp connection dropped");
    }
}

/// Accepts reliable datagram connections from many peers on one socket.
pub struct UdpListener {
    local_addr: SocketAddr,
    accepted: Receiver<UdpConnection>,
    closed: Arc<AtomicBool>,
    demux: Option<JoinHandle<()>>,
}

struct Route {
    tx: Sender<Bytes>,
    session: Weak<Session>,
}

impl Route {
    fn is_dropped(&self) -> bool {
        self.session
            .upgrade()
            .map_or(true, |session| session.closed.load(Ordering::Acquire))
    }
}

struct Demux {
    socket: Arc<UdpSocket>,
    config: ConnectionConfig,
    peers: HashMap<SocketAddr, Route>,
    // Peers whose session the application dropped, with when to forget them
    tombstones: HashMap<SocketAddr, Instant>,
    accepted: Sender<UdpConnection>,
    closed: Arc<AtomicBool>,
}

/// Whether `frame` can start a session: the hello of a fresh connection,
/// or its first data when the hello was lost. Traffic from the middle of
/// an older session never qualifies.
fn opens_session(frame: &Frame) -> bool {
    if frame.is_close() {
        return false;
    }
    match frame.chunks.first() {
        None => frame.ack == 0,
        Some(first) => first.seq == 0,
    }
}

impl Demux {
    fn run(mut self) {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let mut last_sweep = Instant::now();
        while !self.closed.load(Ordering::Acquire) {
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    let datagram = Bytes::copy_from_slice(&buf[..n]);
                    self.route(from, datagram);
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                // Stray ICMP errors from earlier peers; the socket itself is fine
                Err(e) if e.kind() == ErrorKind::ConnectionReset => {}
                Err(e) => {
                    warn!("udp listener receive failed: {}", e);
                    break;
                }
            }
            if last_sweep.elapsed() >= self.config.poll_interval {
                self.sweep(Instant::now());
                last_sweep = Instant::now();
            }
        }
        debug!("udp listener exiting");
    }

    /// Forget sessions the application dropped and tombstones that expired.
    fn sweep(&mut self, now: Instant) {
        let dropped: Vec<SocketAddr> = self
            .peers
            .iter()
            .filter(|(_, route)| route.is_dropped())
            .map(|(addr, _)| *addr)
            .collect();
        for addr in dropped {
            self.bury(addr, now);
        }
        self.tombstones.retain(|_, expires| *expires > now);
    }

    fn bury(&mut self, addr: SocketAddr, now: Instant) {
        self.peers.remove(&addr);
        self.tombstones.insert(addr, now + self.tombstone_ttl());
        debug!(peer = %addr, "udp session closed, ignoring the peer for a while");
    }

    // The remote end gives up after one timeout without hearing from us
    fn tombstone_ttl(&self) -> Duration {
        if self.config.timeout.is_zero() {
            DEFAULT_TOMBSTONE_TTL
        } else {
            self.config.timeout
        }
    }

    fn route(&mut self, from: SocketAddr, datagram: Bytes) {
        if let Some(route) = self.peers.get(&from) {
            if route.tx.send(datagram.clone()).is_ok() && !route.is_dropped() {
                return;
            }
            self.bury(from, Instant::now());
            return;
        }
        if let Some(expires) = self.tombstones.get(&from) {
            if *expires > Instant::now() {
                return;
            }
            self.tombstones.remove(&from);
        }
        self.admit(from, datagram);
    }

    fn admit(&mut self, from: SocketAddr, datagram: Bytes) {
        match Frame::decode(datagram.clone()) {
            Ok(frame) if opens_session(&frame) => {}
            Ok(_) => {
                debug!(peer = %from, "ignoring mid-session traffic from unknown peer");
                return;
            }
            Err(e) => {
                debug!(peer = %from, "ignoring malformed datagram from unknown peer: {}", e);
                return;
            }
        }

        let (tx, rx) = unbounded();
        let conn = match UdpConnection::start(
            DatagramSink::Shared(Arc::clone(&self.socket), from),
            DatagramSource::Channel(rx),
            from,
            &self.config,
        ) {
            Ok(conn) => conn,
            Err(e) => {
                warn!(peer = %from, "failed to start udp session: {}", e);
                return;
            }
        };
        let _ = tx.send(datagram);
        self.peers.insert(
            from,
            Route {
                tx,
                session: Arc::downgrade(&conn.session),
            },
        );
        info!(peer = %from, "udp peer connected");
        if self.accepted.send(conn).is_err() {
            self.peers.remove(&from);
        }
    }
}

impl UdpListener {
    pub fn bind<A: ToSocketAddrs>(addr: A, config: ConnectionConfig) -> Result<Self> {
        config.validate()?;
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(config.poll_interval))?;
        size_socket_buffers(&socket, config.socket_buffer_bytes);
        let local_addr = socket.local_addr()?;

        let (accepted_tx, accepted) = unbounded();
        let closed = Arc::new(AtomicBool::new(false));
        let demux = Demux {
            socket: Arc::new(socket),
            config,
            peers: HashMap::new(),
            tombstones: HashMap::new(),
            accepted: accepted_tx,
            closed: Arc::clone(&closed),
        };
        let demux = thread::Builder::new()
            .name("netcode-udp-listener".to_string())
            .spawn(move || demux.run())?;

        info!(%local_addr, "udp listener bound");
        Ok(UdpListener {
            local_addr,
            accepted,
            closed,
            demux: Some(demux),
        })
    }

    pub fn local_socket_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Listener for UdpListener {
    fn accept(&mut self) -> Result<Option<Box<dyn Connection>>> {
        match self.accepted.try_recv() {
            Ok(conn) => Ok(Some(Box::new(conn))),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(NetError::Io(io::Error::new(
                ErrorKind::BrokenPipe,
                "udp listener thread stopped",
            ))),
        }
    }

    fn local_addr(&self) -> PeerAddress {
        PeerAddress::from(self.local_addr)
    }
}

impl Drop for UdpListener {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
        if let Some(demux) = self.demux.take() {
            let _ = demux.join();
        }
    }
}

fn size_socket_buffers(socket: &UdpSocket, size: usize) {
    #[cfg(unix)]
    crate::unix::size_socket_buffers(socket, size);
    #[cfg(not(unix))]
    let _ = (socket, size);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{frame_flags, Chunk};

    fn data_frame(ack: u32, first_seq: u32) -> Frame {
        Frame {
            ack,
            flags: 0,
            chunks: vec![Chunk {
                seq: first_seq,
                more: false,
                payload: Bytes::from_static(b"x"),
            }],
        }
    }

    #[test]
    fn fresh_hello_and_first_data_open_sessions() {
        assert!(opens_session(&Frame::ack_only(0)));
        assert!(opens_session(&data_frame(0, 0)));
        // Server data already acked, client data starts over
        assert!(opens_session(&data_frame(3, 0)));
    }

    #[test]
    fn mid_session_traffic_does_not_open_sessions() {
        // Keepalive of a peer that already received data
        assert!(!opens_session(&Frame::ack_only(12)));
        // Retransmit from the middle of an older session
        assert!(!opens_session(&data_frame(0, 40)));
        let mut close = Frame::ack_only(0);
        close.flags = frame_flags::CLOSE;
        assert!(!opens_session(&close));
    }
}
