//! gnat Core
//!
//! Core types and protocol primitives for gnat, a subject-based
//! publish/subscribe broker speaking a line-oriented text protocol.
//!
//! This crate provides:
//! - The protocol fault taxonomy ([`Error`], [`ErrorKind`])
//! - Subject tokenization and wildcard rules ([`Subject`])
//! - Wire frames and JSON documents ([`protocol`])

pub mod error;
pub mod protocol;
pub mod subject;

pub use error::{Error, ErrorKind, Result};
pub use protocol::{ConnectOptions, ServerInfo};
pub use subject::Subject;

/// Crate version, reported in the `INFO` line
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default listening port
pub const DEFAULT_PORT: u16 = 4222;

/// Default per-connection argument/payload buffer capacity in bytes
pub const DEFAULT_BUFFER_CAPACITY: usize = 5 * 1024;

/// Default server name announced in `INFO`
pub const DEFAULT_SERVER_NAME: &str = "gnat-server";
