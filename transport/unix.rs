// Unix domain socket backend plus socket buffer sizing shared by all backends
use crate::stream::{DuplexStream, StreamConnection};
use netcode_core::{ConnectionConfig, PeerAddress, Result};
use nix::sys::socket::{setsockopt, sockopt};
use std::io;
use std::net::Shutdown;
use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub type UnixConnection = StreamConnection<UnixStream>;

/// Set SO_SNDBUF and SO_RCVBUF. The kernel may round or cap the values.
pub(crate) fn size_socket_buffers<F: AsFd>(socket: &F, size: usize) {
    if let Err(e) = setsockopt(socket, sockopt::SndBuf, &size) {
        debug!("failed to set SO_SNDBUF: {}", e);
    }
    if let Err(e) = setsockopt(socket, sockopt::RcvBuf, &size) {
        debug!("failed to set SO_RCVBUF: {}", e);
    }
}

impl DuplexStream for UnixStream {
    const KIND: &'static str = "Unix";

    fn try_clone_stream(&self) -> io::Result<Self> {
        self.try_clone()
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        UnixStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        UnixStream::set_write_timeout(self, timeout)
    }

    fn shutdown(&self) -> io::Result<()> {
        UnixStream::shutdown(self, Shutdown::Both)
    }

    // Unix peers have no IPv4 identity
    fn peer(&self) -> PeerAddress {
        PeerAddress::UNSPECIFIED
    }

    fn size_buffers(&self, bytes: usize) {
        size_socket_buffers(self, bytes);
    }
}

impl StreamConnection<UnixStream> {
    pub fn connect_unix<P: AsRef<Path>>(path: P, config: ConnectionConfig) -> Result<Self> {
        let stream = UnixStream::connect(path)?;
        Self::from_unix(stream, config)
    }

    pub fn from_unix(stream: UnixStream, config: ConnectionConfig) -> Result<Self> {
        Self::from_stream(stream, config)
    }
}
