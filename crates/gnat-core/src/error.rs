//! Error types for gnat
//!
//! Every protocol fault a connection can raise is a variant of [`Error`].
//! Faults are split in two classes:
//!
//! - **fatal**: the peer violated the protocol; a diagnostic is written and
//!   the connection is closed
//! - **non-fatal**: an application-level rejection; an error line is written,
//!   the parser is reset and the connection stays usable

use thiserror::Error;

/// Result type alias for gnat operations
pub type Result<T> = std::result::Result<T, Error>;

/// gnat protocol faults
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A byte did not continue any known operation keyword
    #[error("Unknown Protocol Operation")]
    UnknownProtocolOperation,

    /// An operation arrived before the initial CONNECT
    #[error("Expected CONNECT Operation")]
    ConnectionOperationExpected,

    /// An operation arrived while the initial PONG was still outstanding
    #[error("Expected PONG Operation")]
    PongOperationExpected,

    /// Argument line exceeded the per-connection buffer
    #[error("Maximum argument size reached")]
    MaximumArgumentSizeReached,

    /// Payload exceeded the per-connection buffer
    #[error("Maximum message size reached")]
    MaximumMessageSizeReached,

    /// CONNECT options were not valid JSON
    #[error("Invalid JSON provided")]
    JsonParse,

    /// Argument line could not be split into its fields
    #[error("Invalid arguments provided")]
    ArgumentParse,

    /// Payload framing was broken
    #[error("Invalid message framing")]
    MessageParse,

    /// Payload length differed from the size declared on the PUB line
    #[error("Payload size mismatch: declared {expected}, received {actual}")]
    PayloadSizeMismatch { expected: usize, actual: usize },

    /// Publish subject was empty, had empty tokens or contained wildcards
    #[error("Invalid publish subject")]
    InvalidPublishSubject,

    /// Subscribe subject had empty tokens or a non-terminal `>`
    #[error("Invalid subscribe subject")]
    InvalidSubscribeSubject,

    /// The subscriber id is already used on this connection
    #[error("Subscription id {0} already exists")]
    ExistingSubscriptionId(u32),

    /// The subscriber id is not registered on this connection
    #[error("No subscription with id {0}")]
    NoSuchSubscriptionId(u32),

    /// Anything outside the taxonomy above
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Fieldless discriminant of [`Error`], convenient for matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnknownProtocolOperation,
    ConnectionOperationExpected,
    PongOperationExpected,
    MaximumArgumentSizeReached,
    MaximumMessageSizeReached,
    JsonParse,
    ArgumentParse,
    MessageParse,
    PayloadSizeMismatch,
    InvalidPublishSubject,
    InvalidSubscribeSubject,
    ExistingSubscriptionId,
    NoSuchSubscriptionId,
    Unexpected,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownProtocolOperation => ErrorKind::UnknownProtocolOperation,
            Error::ConnectionOperationExpected => ErrorKind::ConnectionOperationExpected,
            Error::PongOperationExpected => ErrorKind::PongOperationExpected,
            Error::MaximumArgumentSizeReached => ErrorKind::MaximumArgumentSizeReached,
            Error::MaximumMessageSizeReached => ErrorKind::MaximumMessageSizeReached,
            Error::JsonParse => ErrorKind::JsonParse,
            Error::ArgumentParse => ErrorKind::ArgumentParse,
            Error::MessageParse => ErrorKind::MessageParse,
            Error::PayloadSizeMismatch { .. } => ErrorKind::PayloadSizeMismatch,
            Error::InvalidPublishSubject => ErrorKind::InvalidPublishSubject,
            Error::InvalidSubscribeSubject => ErrorKind::InvalidSubscribeSubject,
            Error::ExistingSubscriptionId(_) => ErrorKind::ExistingSubscriptionId,
            Error::NoSuchSubscriptionId(_) => ErrorKind::NoSuchSubscriptionId,
            Error::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    /// Whether this fault terminates the connection
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::InvalidPublishSubject
                | Error::InvalidSubscribeSubject
                | Error::ExistingSubscriptionId(_)
                | Error::NoSuchSubscriptionId(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(_: serde_json::Error) -> Self {
        Error::JsonParse
    }
}
