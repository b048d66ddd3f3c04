//! Transport trait definitions

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;

use crate::error::Result;

/// Events that can occur on a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Connection closed (clean or error)
    Disconnected { reason: Option<String> },
    /// A chunk of bytes, exactly as read
    Data(Bytes),
    /// Error occurred
    Error(String),
}

/// Trait for sending data
#[async_trait]
pub trait TransportSender: Send + Sync {
    /// Send data, waiting for room in the outbound queue
    async fn send(&self, data: Bytes) -> Result<()>;

    /// Queue data without waiting
    fn try_send(&self, data: Bytes) -> Result<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Flush queued data and close the connection
    async fn close(&self) -> Result<()>;
}

/// Trait for receiving data
#[async_trait]
pub trait TransportReceiver: Send {
    /// Receive the next event
    async fn recv(&mut self) -> Option<TransportEvent>;
}

/// Trait for transport servers (listeners)
#[async_trait]
pub trait TransportServer: Send + Sync {
    /// The sender type for accepted connections
    type Sender: TransportSender;
    /// The receiver type for accepted connections
    type Receiver: TransportReceiver;

    /// Accept a new connection
    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)>;

    /// Get the local address
    fn local_addr(&self) -> Result<SocketAddr>;
}
