// Remote endpoint identification
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Remote endpoint of a connection: 32-bit host identifier plus port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PeerAddress {
    pub host: u32,
    pub port: u16,
}

impl PeerAddress {
    /// Reported by backends whose peer has no IP address (loopback, Unix sockets)
    pub const UNSPECIFIED: PeerAddress = PeerAddress { host: 0, port: 0 };

    pub const fn new(host: u32, port: u16) -> Self {
        PeerAddress { host, port }
    }

    pub fn ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.host)
    }

    pub fn is_unspecified(&self) -> bool {
        *self == PeerAddress::UNSPECIFIED
    }
}

impl From<SocketAddrV4> for PeerAddress {
    fn from(addr: SocketAddrV4) -> Self {
        PeerAddress::new(u32::from(*addr.ip()), addr.port())
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => v4.into(),
            // Only IPv4-mapped addresses fit in 32 bits
            SocketAddr::V6(v6) => {
                let host = v6.ip().to_ipv4_mapped().map(u32::from).unwrap_or(0);
                PeerAddress::new(host, v6.port())
            }
        }
    }
}

impl From<PeerAddress> for SocketAddrV4 {
    fn from(addr: PeerAddress) -> Self {
        SocketAddrV4::new(addr.ip(), addr.port)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.ip(), self.port)
    }
}
