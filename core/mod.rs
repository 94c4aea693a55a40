// Core module: connection contract and value types (NO I/O dependencies)
pub mod address;
pub mod config;
pub mod connection;
pub mod counters;
pub mod error;
pub mod liveness;
pub mod packet;

pub use address::*;
pub use config::*;
pub use connection::*;
pub use counters::*;
pub use error::*;
pub use liveness::*;
pub use packet::*;
