//! Error hierarchy for the relay.
//!
//! - [`ProtocolError`]: a frame could not be decoded or encoded
//! - [`RelayError`]: a routed event failed (protocol or registry rule)
//! - [`TransportError`]: the underlying connection failed
//!
//! None of these is process-fatal; each is scoped to one connection. Every
//! variant carries a stable machine-readable code that is sent to clients in
//! `error` events.

use thiserror::Error;

/// Envelope or payload encoding failure.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Malformed envelope or payload JSON.
    #[error("malformed {what}: {source}")]
    Decode {
        /// Which part of the frame failed (`"envelope"` or the event tag).
        what: String,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The envelope's `type` tag has no inbound handler.
    #[error("there is no such event type: {0}")]
    UnknownEventType(String),

    /// An outbound payload could not be serialised.
    #[error("failed to encode event: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ProtocolError {
    /// Decode failure for the part of the frame named `what`.
    pub fn decode(what: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            what: what.into(),
            source,
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Decode { .. } => "DECODE_ERROR",
            Self::UnknownEventType(_) => "UNKNOWN_EVENT_TYPE",
            Self::Encode(_) => "ENCODE_ERROR",
        }
    }
}

/// Failure of a routed event.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Frame-level failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Another live client already holds this name.
    #[error("username already taken: {0}")]
    NameTaken(String),

    /// No live client holds this name.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// The client must log in before sending messages.
    #[error("login required before sending messages")]
    NotLoggedIn,

    /// The requested display name is not acceptable.
    #[error("invalid username: {0}")]
    InvalidName(String),

    /// The client was deregistered before the operation completed.
    #[error("client connection is closed")]
    ClientClosed,
}

impl RelayError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Protocol(e) => e.code(),
            Self::NameTaken(_) => "NAME_TAKEN",
            Self::UserNotFound(_) => "USER_NOT_FOUND",
            Self::NotLoggedIn => "NOT_LOGGED_IN",
            Self::InvalidName(_) => "INVALID_NAME",
            Self::ClientClosed => "CLIENT_CLOSED",
        }
    }
}

/// Failure of the underlying full-duplex connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Read or write failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Nothing arrived from the peer before the read deadline.
    #[error("read deadline exceeded")]
    Timeout,

    /// The connection is already closed.
    #[error("connection closed")]
    Closed,
}

impl TransportError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "CONNECTION_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Closed => "CLOSED",
        }
    }
}
