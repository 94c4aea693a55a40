// Listener abstraction - accepts connections from any backend
use netcode_core::{Connection, PeerAddress, Result};

pub trait Listener: Send {
    /// Next connection that completed setup, or `None` if nobody is
    /// waiting. Never blocks.
    fn accept(&mut self) -> Result<Option<Box<dyn Connection>>>;

    fn local_addr(&self) -> PeerAddress;
}
