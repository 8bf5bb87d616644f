//! Wire protocol: a JSON envelope `{ "type": ..., "payload": ... }` carried
//! in WebSocket text frames.
//!
//! Decoding is two-phase. [`Event::decode`] parses only the envelope and
//! keeps the payload as an unparsed [`RawValue`]; the payload is decoded
//! into its concrete shape by [`Event::decode_payload`] once the handler for
//! the tag is known. An unknown tag therefore never pays for payload
//! parsing, and a malformed payload for a known tag fails on its own.

use chrono::Local;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::errors::{ProtocolError, RelayError};

/// Prefix applied to the text of private messages.
pub const PRIVATE_PREFIX: &str = "[Private] ";

/// `strftime` format of the `sent` field.
pub const SENT_FORMAT: &str = "%H:%M:%S";

/// Closed set of event tags understood by the relay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Client claims a display name.
    Login,
    /// Client broadcasts a message to everyone.
    SendMessage,
    /// Client sends a message to one named user.
    PrivateMessage,
    /// Server delivers a message.
    NewMessage,
    /// Server reports a failed frame to its sender.
    Error,
}

impl EventType {
    /// Every tag, inbound and outbound.
    pub const ALL: [Self; 5] = [
        Self::Login,
        Self::SendMessage,
        Self::PrivateMessage,
        Self::NewMessage,
        Self::Error,
    ];

    /// Wire tag.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::SendMessage => "send_message",
            Self::PrivateMessage => "private_message",
            Self::NewMessage => "new_message",
            Self::Error => "error",
        }
    }

    /// Parse a wire tag. Returns `None` for anything unrecognised.
    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == tag)
    }

    /// Whether clients may send this event to the server.
    pub const fn is_inbound(self) -> bool {
        matches!(self, Self::Login | Self::SendMessage | Self::PrivateMessage)
    }
}

/// Wire-level envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    /// Tag selecting the handler and the payload shape.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Undecoded payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<RawValue>>,
}

impl Event {
    /// Build an outbound event from a typed payload.
    pub fn new<T: Serialize>(event_type: EventType, payload: &T) -> Result<Self, ProtocolError> {
        let payload = serde_json::value::to_raw_value(payload).map_err(ProtocolError::Encode)?;
        Ok(Self {
            event_type: event_type.as_str().to_owned(),
            payload: Some(payload),
        })
    }

    /// `new_message` event.
    pub fn new_message(payload: &NewMessagePayload) -> Result<Self, ProtocolError> {
        Self::new(EventType::NewMessage, payload)
    }

    /// `error` event describing a failed frame.
    pub fn error_notice(err: &RelayError) -> Result<Self, ProtocolError> {
        Self::new(
            EventType::Error,
            &ErrorPayload {
                code: err.code().to_owned(),
                message: err.to_string(),
            },
        )
    }

    /// Decode the envelope only; the payload stays raw.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(|e| ProtocolError::decode("envelope", e))
    }

    /// Serialise the envelope for a text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Parsed tag, if recognised.
    pub fn kind(&self) -> Option<EventType> {
        EventType::parse(&self.event_type)
    }

    /// Decode the payload into its concrete shape.
    ///
    /// A missing payload decodes as JSON `null`.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        let raw = self.payload.as_deref().map_or("null", RawValue::get);
        serde_json::from_str(raw).map_err(|e| ProtocolError::decode(self.event_type.clone(), e))
    }
}

/// `login` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginPayload {
    /// Requested display name.
    pub username: String,
}

/// `send_message` payload.
///
/// `from` is informational; the sender is the name claimed by the
/// originating connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessagePayload {
    /// Message text.
    pub message: String,
    /// Sender as claimed by the client.
    #[serde(default)]
    pub from: String,
}

/// `private_message` payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateMessagePayload {
    /// Message text.
    pub message: String,
    /// Sender as claimed by the client.
    #[serde(default)]
    pub from: String,
    /// Recipient display name.
    pub to: String,
}

/// `new_message` payload (server → client).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessagePayload {
    /// Message text, prefixed with [`PRIVATE_PREFIX`] for private messages.
    pub message: String,
    /// Display name of the sender.
    pub from: String,
    /// Local wall-clock send time, `HH:MM:SS`.
    pub sent: String,
}

impl NewMessagePayload {
    /// Message stamped with the current local time.
    pub fn now(message: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            from: from.into(),
            sent: Local::now().format(SENT_FORMAT).to_string(),
        }
    }

    /// Private message stamped with the current local time.
    pub fn private(message: &str, from: impl Into<String>) -> Self {
        Self::now(format!("{PRIVATE_PREFIX}{message}"), from)
    }
}

/// `error` payload (server → client).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Machine-readable code, e.g. `NAME_TAKEN`.
    pub code: String,
    /// Human-readable description.
    pub message: String,
}
