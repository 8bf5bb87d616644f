//! Dispatch of inbound events to their handlers.
//!
//! The envelope tag is matched against the closed set of inbound
//! [`EventType`]s; each arm decodes its own payload shape, so an unknown tag
//! is rejected before any payload parsing happens.

use std::sync::Arc;

use metrics::counter;
use relay_core::protocol::{LoginPayload, NewMessagePayload, PrivateMessagePayload, SendMessagePayload};
use relay_core::{Event, EventType, ProtocolError, RelayError};
use tracing::{debug, info};

use crate::metrics::EVENTS_TOTAL;
use crate::registry::ConnectionRegistry;
use crate::websocket::connection::ClientHandle;

/// Longest accepted display name, in characters.
pub const MAX_USERNAME_CHARS: usize = 32;

/// Stateless dispatch table for inbound events.
#[derive(Clone, Copy, Debug)]
pub struct EventRouter {
    require_login: bool,
}

impl EventRouter {
    /// Create a router. With `require_login`, messages from unnamed clients
    /// fail with [`RelayError::NotLoggedIn`].
    pub fn new(require_login: bool) -> Self {
        Self { require_login }
    }

    /// Whether senders must claim a name first.
    pub fn require_login(&self) -> bool {
        self.require_login
    }

    /// Run the handler registered for `event`'s tag.
    pub fn route(
        &self,
        registry: &ConnectionRegistry,
        event: &Event,
        client: &ClientHandle,
    ) -> Result<(), RelayError> {
        let kind = event
            .kind()
            .filter(|kind| kind.is_inbound())
            .ok_or_else(|| ProtocolError::UnknownEventType(event.event_type.clone()))?;
        counter!(EVENTS_TOTAL, "type" => kind.as_str()).increment(1);

        match kind {
            EventType::Login => {
                let payload: LoginPayload = event.decode_payload()?;
                validate_username(&payload.username)?;
                registry.claim_name(client, &payload.username)?;
                info!(client_id = %client.id(), username = %payload.username, "client logged in");
                Ok(())
            }
            EventType::SendMessage => {
                let payload: SendMessagePayload = event.decode_payload()?;
                let from = self.sender_name(client)?;
                let outbound = Event::new_message(&NewMessagePayload::now(payload.message, from))?;
                let delivered = registry.broadcast(outbound);
                debug!(client_id = %client.id(), delivered, "message broadcast");
                Ok(())
            }
            EventType::PrivateMessage => {
                let payload: PrivateMessagePayload = event.decode_payload()?;
                let from = self.sender_name(client)?;
                let to_self = client.name().as_deref() == Some(payload.to.as_str());
                let outbound = Arc::new(Event::new_message(&NewMessagePayload::private(
                    &payload.message,
                    from,
                ))?);
                registry.send_direct(&payload.to, Arc::clone(&outbound))?;
                if !to_self {
                    let _ = registry.deliver(client, outbound);
                }
                debug!(client_id = %client.id(), to = %payload.to, "private message sent");
                Ok(())
            }
            EventType::NewMessage | EventType::Error => {
                Err(ProtocolError::UnknownEventType(event.event_type.clone()).into())
            }
        }
    }

    /// Authoritative sender name. The payload's `from` is never trusted.
    fn sender_name(&self, client: &ClientHandle) -> Result<String, RelayError> {
        match client.name() {
            Some(name) => Ok(name),
            None if self.require_login => Err(RelayError::NotLoggedIn),
            None => Ok(String::new()),
        }
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Reject names that are empty, too long, or contain control characters.
pub fn validate_username(name: &str) -> Result<(), RelayError> {
    if name.trim().is_empty() {
        return Err(RelayError::InvalidName("must not be empty".into()));
    }
    if name.chars().count() > MAX_USERNAME_CHARS {
        return Err(RelayError::InvalidName(format!(
            "longer than {MAX_USERNAME_CHARS} characters"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(RelayError::InvalidName("contains control characters".into()));
    }
    Ok(())
}
