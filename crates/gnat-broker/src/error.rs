//! Broker error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrokerError>;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(#[from] gnat_transport::TransportError),

    #[error("core protocol error: {0}")]
    Core(#[from] gnat_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
