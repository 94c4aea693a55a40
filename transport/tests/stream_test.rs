//! TCP and Unix stream backends

mod common;

use common::{accept_within, init_test_logging, receive, test_config, wait_for};
use netcode_core::{Connection, ConnectionConfig, PeerAddress};
use netcode_transport::{Listener, TcpConnection, TcpConnectionListener};
use std::io::Write;
use std::net::TcpStream;
use std::time::Duration;

const LIMIT: Duration = Duration::from_secs(5);

fn tcp_pair() -> (TcpConnectionListener, TcpConnection, Box<dyn Connection>) {
    let mut listener = TcpConnectionListener::bind("127.0.0.1:0", test_config()).unwrap();
    let client = TcpConnection::connect_tcp(listener.local_socket_addr(), test_config()).unwrap();
    let server = accept_within(&mut listener, LIMIT);
    (listener, client, server)
}

#[test]
fn test_tcp_round_trip_keeps_packet_boundaries() {
    init_test_logging();
    let (listener, mut client, mut server) = tcp_pair();
    assert_eq!(client.peer_name(), listener.local_addr());

    client.send_data(b"first");
    client.send_data(b"");
    client.send_data(&[0xAB; 3000]);
    client.flush(true);

    let received = receive(&mut *server, 3, LIMIT);
    assert_eq!(received.len(), 3);
    assert_eq!(received[0].data(), b"first");
    assert!(received[1].is_empty());
    assert_eq!(received[2].data(), &[0xAB; 3000][..]);

    server.send_data(b"reply");
    server.flush(true);
    let reply = receive(&mut client, 1, LIMIT);
    assert_eq!(reply[0].data(), b"reply");
    assert_eq!(server.data_received(), 3005);
}

#[test]
fn test_tcp_unforced_flush_holds_small_batches() {
    init_test_logging();
    let config = test_config().with_batching(1000, Duration::from_secs(60));
    let mut listener = TcpConnectionListener::bind("127.0.0.1:0", config.clone()).unwrap();
    let mut client = TcpConnection::connect_tcp(listener.local_socket_addr(), config).unwrap();
    let mut server = accept_within(&mut listener, LIMIT);

    client.send_data(b"tiny");
    client.flush(false);
    assert!(!wait_for(Duration::from_millis(100), || server.peek(0).is_some()));

    client.flush(true);
    assert!(wait_for(LIMIT, || server.peek(0).is_some()));
    assert_eq!(server.get_data().unwrap().data(), b"tiny");
}

#[test]
fn test_tcp_peer_drop_times_out() {
    init_test_logging();
    let (_listener, client, server) = tcp_pair();
    assert!(!server.check_timeout());
    drop(client);
    assert!(wait_for(LIMIT, || server.check_timeout()));
    assert!(server.statistics().contains("broken: true"));
}

#[test]
fn test_tcp_oversized_frame_breaks_connection() {
    init_test_logging();
    let config = test_config();
    let mut listener = TcpConnectionListener::bind("127.0.0.1:0", config.clone()).unwrap();
    let mut raw = TcpStream::connect(listener.local_socket_addr()).unwrap();
    let server = accept_within(&mut listener, LIMIT);

    let too_big = (config.max_packet_size as u32 + 1).to_le_bytes();
    raw.write_all(&too_big).unwrap();
    assert!(wait_for(LIMIT, || server.check_timeout()));
    assert!(server.peek(0).is_none());
}

#[test]
fn test_tcp_silent_peer_times_out() {
    init_test_logging();
    let config = test_config().with_timeout(Duration::from_millis(200));
    let mut listener = TcpConnectionListener::bind("127.0.0.1:0", config).unwrap();
    // Connected but never writes, not even keepalives
    let _raw = TcpStream::connect(listener.local_socket_addr()).unwrap();
    let server = accept_within(&mut listener, LIMIT);

    assert!(!server.check_timeout());
    assert!(wait_for(LIMIT, || server.check_timeout()));
}

#[test]
fn test_tcp_idle_pair_is_kept_alive() {
    init_test_logging();
    let config = test_config()
        .with_timeout(Duration::from_millis(300))
        .with_keepalive(Duration::from_millis(50));
    let mut listener = TcpConnectionListener::bind("127.0.0.1:0", config.clone()).unwrap();
    let mut client = TcpConnection::connect_tcp(listener.local_socket_addr(), config).unwrap();
    let mut server = accept_within(&mut listener, LIMIT);

    std::thread::sleep(Duration::from_millis(800));
    assert!(!client.check_timeout());
    assert!(!server.check_timeout());
    // Keepalives never surface as packets
    assert!(server.peek(0).is_none());

    client.send_data(b"still here");
    client.flush(true);
    assert_eq!(receive(&mut *server, 1, LIMIT)[0].data(), b"still here");
    assert!(client.get_data().is_none());
}

#[test]
fn test_tcp_accept_without_peers_returns_none() {
    let mut listener = TcpConnectionListener::bind("127.0.0.1:0", ConnectionConfig::default()).unwrap();
    assert!(listener.accept().unwrap().is_none());
    assert_ne!(listener.local_addr(), PeerAddress::UNSPECIFIED);
}

#[cfg(unix)]
#[test]
fn test_unix_pair_exchanges_packets() {
    use netcode_transport::UnixConnection;
    use std::os::unix::net::UnixStream;

    init_test_logging();
    let (a, b) = UnixStream::pair().unwrap();
    let mut a = UnixConnection::from_unix(a, test_config()).unwrap();
    let mut b = UnixConnection::from_unix(b, test_config()).unwrap();

    a.send_data(b"over unix");
    a.flush(true);
    let received = receive(&mut b, 1, LIMIT);
    assert_eq!(received[0].data(), b"over unix");
    assert_eq!(b.peer_name(), PeerAddress::UNSPECIFIED);

    drop(a);
    assert!(wait_for(LIMIT, || b.check_timeout()));
}

#[cfg(unix)]
#[test]
fn test_unix_connect_by_path() {
    use netcode_transport::UnixConnection;
    use std::os::unix::net::UnixListener;

    init_test_logging();
    let path = std::env::temp_dir().join(format!("netcode-test-{}.sock", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path).unwrap();

    let mut client = UnixConnection::connect_unix(&path, test_config()).unwrap();
    let (stream, _) = listener.accept().unwrap();
    let mut server = UnixConnection::from_unix(stream, test_config()).unwrap();

    client.send_data(b"hello");
    client.flush(true);
    assert_eq!(receive(&mut server, 1, LIMIT)[0].data(), b"hello");
    let _ = std::fs::remove_file(&path);
}
