//! gnat Transport Layer
//!
//! Transports deliver raw byte chunks exactly as they were read from the
//! wire; message framing is the job of the protocol decoder. The TCP
//! transport is the only one the broker ships with.

pub mod error;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use tcp::{connect, TcpReceiver, TcpSender, TcpServer};
pub use traits::{TransportEvent, TransportReceiver, TransportSender, TransportServer};
