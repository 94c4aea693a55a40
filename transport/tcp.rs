// TCP stream backend and listener
use crate::stream::{DuplexStream, StreamConnection};
use crate::traits::Listener;
use netcode_core::{Connection, ConnectionConfig, NetError, PeerAddress, Result};
use std::io::{self, ErrorKind};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info};

pub type TcpConnection = StreamConnection<TcpStream>;

impl DuplexStream for TcpStream {
    const KIND: &'static str = "TCP";

    fn try_clone_stream(&self) -> io::Result<Self> {
        self.try_clone()
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_write_timeout(self, timeout)
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }

    fn peer(&self) -> PeerAddress {
        self.peer_addr()
            .map(PeerAddress::from)
            .unwrap_or(PeerAddress::UNSPECIFIED)
    }

    fn size_buffers(&self, bytes: usize) {
        #[cfg(unix)]
        crate::unix::size_socket_buffers(self, bytes);
        #[cfg(not(unix))]
        let _ = bytes;
    }
}

impl StreamConnection<TcpStream> {
    pub fn connect_tcp<A: ToSocketAddrs>(addr: A, config: ConnectionConfig) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Self::from_tcp(stream, config)
    }

    pub fn from_tcp(stream: TcpStream, config: ConnectionConfig) -> Result<Self> {
        // Batching happens in the outbound buffer, not in the kernel
        stream.set_nodelay(true)?;
        Self::from_stream(stream, config)
    }
}

/// Accepts TCP peers without blocking.
pub struct TcpConnectionListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: ConnectionConfig,
}

impl TcpConnectionListener {
    pub fn bind<A: ToSocketAddrs>(addr: A, config: ConnectionConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(addr).map_err(|e| match e.kind() {
            ErrorKind::AddrInUse => NetError::AddrInUse(e.to_string()),
            _ => NetError::Io(e),
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "tcp listener bound");
        Ok(TcpConnectionListener {
            listener,
            local_addr,
            config,
        })
    }

    pub fn local_socket_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Listener for TcpConnectionListener {
    fn accept(&mut self) -> Result<Option<Box<dyn Connection>>> {
        match self.listener.accept() {
            Ok((stream, from)) => {
                // Accepted sockets may inherit the listener's non-blocking mode
                stream.set_nonblocking(false)?;
                debug!(peer = %from, "tcp peer accepted");
                let conn = TcpConnection::from_tcp(stream, self.config.clone())?;
                Ok(Some(Box::new(conn)))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(NetError::Io(e)),
        }
    }

    fn local_addr(&self) -> PeerAddress {
        PeerAddress::from(self.local_addr)
    }
}
