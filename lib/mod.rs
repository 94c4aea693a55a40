// netcode: packet connections for real-time peers behind one trait object.
// Pick a backend with an endpoint string, then talk through Box<dyn Connection>.

// Re-export the contract and value types
pub use netcode_core::*;

// Re-export queues and backends
pub use netcode_buffer::{inbound_queue, BatchPolicy, InboundQueue, OutboundBuffer, QueueFeeder};
pub use netcode_transport::*;

use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Backend plus address, written `scheme://address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Udp(String),
    Tcp(String),
    Unix(String),
    Local(String),
}

impl Endpoint {
    pub fn scheme(&self) -> &'static str {
        match self {
            Endpoint::Udp(_) => "udp",
            Endpoint::Tcp(_) => "tcp",
            Endpoint::Unix(_) => "unix",
            Endpoint::Local(_) => "local",
        }
    }

    pub fn address(&self) -> &str {
        match self {
            Endpoint::Udp(a) | Endpoint::Tcp(a) | Endpoint::Unix(a) | Endpoint::Local(a) => a,
        }
    }
}

impl FromStr for Endpoint {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self> {
        let (scheme, address) = s
            .split_once("://")
            .ok_or_else(|| NetError::InvalidAddress(format!("missing scheme in {s:?}")))?;
        if address.is_empty() {
            return Err(NetError::InvalidAddress(format!("empty address in {s:?}")));
        }
        let address = address.to_string();
        match scheme {
            "udp" => Ok(Endpoint::Udp(address)),
            "tcp" => Ok(Endpoint::Tcp(address)),
            "unix" => Ok(Endpoint::Unix(address)),
            "local" => Ok(Endpoint::Local(address)),
            other => Err(NetError::InvalidAddress(format!("unknown scheme {other:?}"))),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme(), self.address())
    }
}

/// Open a connection to `endpoint`.
pub fn connect(endpoint: &Endpoint, config: ConnectionConfig) -> Result<Box<dyn Connection>> {
    debug!(%endpoint, "connecting");
    let conn: Box<dyn Connection> = match endpoint {
        Endpoint::Udp(addr) => Box::new(UdpConnection::connect(addr.as_str(), config)?),
        Endpoint::Tcp(addr) => Box::new(TcpConnection::connect_tcp(addr.as_str(), config)?),
        #[cfg(unix)]
        Endpoint::Unix(path) => Box::new(UnixConnection::connect_unix(path, config)?),
        #[cfg(not(unix))]
        Endpoint::Unix(_) => {
            return Err(NetError::InvalidAddress("unix sockets are not available".into()))
        }
        Endpoint::Local(name) => Box::new(LocalConnection::connect(name, &config)?),
    };
    Ok(conn)
}

/// Start accepting connections on `endpoint`.
pub fn listen(endpoint: &Endpoint, config: ConnectionConfig) -> Result<Box<dyn Listener>> {
    debug!(%endpoint, "listening");
    let listener: Box<dyn Listener> = match endpoint {
        Endpoint::Udp(addr) => Box::new(UdpListener::bind(addr.as_str(), config)?),
        Endpoint::Tcp(addr) => Box::new(TcpConnectionListener::bind(addr.as_str(), config)?),
        Endpoint::Unix(_) => {
            return Err(NetError::InvalidAddress(format!("cannot listen on {endpoint}")))
        }
        Endpoint::Local(name) => Box::new(LocalListener::bind(name)?),
    };
    Ok(listener)
}
