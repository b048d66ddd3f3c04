//! gnat Broker
//!
//! The broker is the server side of gnat:
//! - Decodes each connection's byte stream into protocol operations
//! - Gates operations on the CONNECT / PING / PONG handshake
//! - Indexes subscriptions in a subject trie
//! - Routes published payloads to every matching subscriber
//!
//! # Example
//!
//! ```no_run
//! use gnat_broker::{Broker, BrokerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = Broker::new(BrokerConfig::default());
//!     broker.serve("0.0.0.0:4222").await?;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod config;
pub mod error;
pub mod parser;
pub mod session;
pub mod subscription;
pub mod watcher;

pub use broker::Broker;
pub use config::BrokerConfig;
pub use error::{BrokerError, Result};
pub use parser::{decode, ParseState, ParserState, SessionHandler};
pub use session::{Connection, ConnectionId, Operation, Session};
pub use subscription::{SubjectTrie, Subscription};
pub use watcher::PongWatcher;
