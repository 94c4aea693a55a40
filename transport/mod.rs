// Transport backends behind the Connection contract
pub mod local;
pub mod reliable;
pub mod resequencer;
pub mod stream;
pub mod tcp;
pub mod timer;
pub mod traits;
pub mod udp;
#[cfg(unix)]
pub mod unix;
pub mod wire;

pub use local::{LocalConnection, LocalListener};
pub use stream::{DuplexStream, StreamConnection};
pub use tcp::{TcpConnection, TcpConnectionListener};
pub use traits::*;
pub use udp::{UdpConnection, UdpListener};
#[cfg(unix)]
pub use unix::UnixConnection;
