// Errors raised while setting up connections; the data path never fails
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Address already in use: {0}")]
    AddrInUse(String),

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, NetError>;
