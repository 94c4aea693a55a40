// Buffer module: packet queues shared by all backends
pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;
