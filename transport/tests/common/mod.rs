//! Shared helpers for transport integration tests

#![allow(dead_code)]

use netcode_core::{Connection, ConnectionConfig, Packet};
use netcode_transport::Listener;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Short timers so failures show up quickly.
pub fn test_config() -> ConnectionConfig {
    ConnectionConfig::default()
        .with_timeout(Duration::from_secs(5))
        .with_rto(Duration::from_millis(50), Duration::from_millis(400))
}

/// Poll `condition` every few milliseconds until it holds or `limit` passes.
pub fn wait_for(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn accept_within(listener: &mut dyn Listener, limit: Duration) -> Box<dyn Connection> {
    let mut accepted = None;
    wait_for(limit, || {
        accepted = listener.accept().expect("accept failed");
        accepted.is_some()
    });
    accepted.expect("no connection accepted in time")
}

/// Drain `count` packets from `conn`, flushing it while waiting so acks and
/// replies get out.
pub fn receive(conn: &mut dyn Connection, count: usize, limit: Duration) -> Vec<Packet> {
    let mut received = Vec::with_capacity(count);
    wait_for(limit, || {
        while let Some(packet) = conn.get_data() {
            received.push(packet);
        }
        conn.flush(true);
        received.len() >= count
    });
    received
}

/// UDP relay between one client and `server` that swallows every
/// `drop_every`-th datagram travelling client to server.
pub struct LossyRelay {
    pub addr: SocketAddr,
    pub dropped: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl LossyRelay {
    pub fn start(server: SocketAddr, drop_every: u64) -> LossyRelay {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();
        let addr = socket.local_addr().unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicU64::new(0));

        let worker = {
            let stop = Arc::clone(&stop);
            let dropped = Arc::clone(&dropped);
            thread::Builder::new()
                .name("lossy-relay".to_string())
                .spawn(move || {
                    let mut buf = vec![0u8; 65536];
                    let mut client = None;
                    let mut upstream = 0u64;
                    while !stop.load(Ordering::Acquire) {
                        let Ok((n, from)) = socket.recv_from(&mut buf) else {
                            continue;
                        };
                        if from == server {
                            if let Some(client) = client {
                                let _ = socket.send_to(&buf[..n], client);
                            }
                            continue;
                        }
                        client = Some(from);
                        upstream += 1;
                        if upstream % drop_every == 0 {
                            dropped.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                        let _ = socket.send_to(&buf[..n], server);
                    }
                })
                .unwrap()
        };

        LossyRelay {
            addr,
            dropped,
            stop,
            worker: Some(worker),
        }
    }
}

impl Drop for LossyRelay {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
