//! Registry of live connections and claimed display names.
//!
//! All mutations (register, deregister, claim) are short synchronous
//! critical sections under one write lock, so a name claim checks and binds
//! atomically and a deregistration removes the client from both maps at
//! once. Fan-out never holds the lock while delivering: targets are
//! snapshotted under the read lock, the lock is released, then each target's
//! queue is offered the event with a non-blocking send.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::RwLock;
use relay_core::{ClientId, Event, RelayError};
use tracing::{debug, info, warn};

use crate::metrics::{
    CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL, DISCONNECTIONS_TOTAL, NAMED_CLIENTS, SLOW_CLIENTS_TOTAL,
};
use crate::router::EventRouter;
use crate::websocket::connection::ClientHandle;

#[derive(Default)]
struct RegistryState {
    clients: HashMap<ClientId, Arc<ClientHandle>>,
    names: HashMap<String, ClientId>,
}

impl RegistryState {
    fn record_gauges(&self) {
        gauge!(CONNECTIONS_ACTIVE).set(self.clients.len() as f64);
        gauge!(NAMED_CLIENTS).set(self.names.len() as f64);
    }
}

/// Shared set of live clients plus the name → client index.
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
    router: EventRouter,
    max_dropped_messages: u64,
}

impl ConnectionRegistry {
    /// Create an empty registry dispatching through `router`.
    pub fn new(router: EventRouter) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            router,
            max_dropped_messages: u64::MAX,
        }
    }

    /// Disconnect clients once their cumulative dropped deliveries reach `limit`.
    #[must_use]
    pub fn with_max_dropped_messages(mut self, limit: u64) -> Self {
        self.max_dropped_messages = limit.max(1);
        self
    }

    /// Add a client. Unnamed clients are registered too.
    pub fn register(&self, client: Arc<ClientHandle>) {
        let mut state = self.state.write();
        let id = client.id().clone();
        if state.clients.insert(id.clone(), client).is_none() {
            counter!(CONNECTIONS_TOTAL).increment(1);
        }
        state.record_gauges();
        debug!(client_id = %id, total = state.clients.len(), "client registered");
    }

    /// Remove a client and its name binding, then close it.
    ///
    /// Returns `false` if the client was already gone.
    pub fn deregister(&self, id: &ClientId) -> bool {
        let removed = {
            let mut state = self.state.write();
            let Some(client) = state.clients.remove(id) else {
                return false;
            };
            if let Some(name) = client.name() {
                if state.names.get(&name) == Some(id) {
                    let _ = state.names.remove(&name);
                }
            }
            state.record_gauges();
            client
        };
        removed.close();
        counter!(DISCONNECTIONS_TOTAL).increment(1);
        info!(
            client_id = %id,
            username = removed.name().as_deref().unwrap_or(""),
            "client deregistered"
        );
        true
    }

    /// Bind `name` to `client`.
    ///
    /// Fails with [`RelayError::NameTaken`] if another registered client
    /// holds the name. Claiming the name already held is a no-op; claiming a
    /// new one releases the old binding.
    pub fn claim_name(&self, client: &ClientHandle, name: &str) -> Result<(), RelayError> {
        let mut state = self.state.write();
        if !state.clients.contains_key(client.id()) {
            return Err(RelayError::ClientClosed);
        }
        match state.names.get(name) {
            Some(holder) if holder == client.id() => return Ok(()),
            Some(_) => return Err(RelayError::NameTaken(name.to_owned())),
            None => {}
        }
        if let Some(previous) = client.name() {
            let _ = state.names.remove(&previous);
        }
        let _ = state.names.insert(name.to_owned(), client.id().clone());
        client.set_name(Some(name.to_owned()));
        state.record_gauges();
        Ok(())
    }

    /// Offer `event` to every registered client.
    ///
    /// Returns how many queues accepted it.
    pub fn broadcast(&self, event: Event) -> usize {
        let event = Arc::new(event);
        let targets: Vec<Arc<ClientHandle>> = self.state.read().clients.values().cloned().collect();
        let delivered = targets
            .iter()
            .filter(|client| self.deliver(client, Arc::clone(&event)))
            .count();
        debug!(
            event_type = %event.event_type,
            recipients = targets.len(),
            delivered,
            "broadcast event"
        );
        delivered
    }

    /// Deliver `event` to the one client bound to `name`.
    pub fn send_direct(&self, name: &str, event: Arc<Event>) -> Result<(), RelayError> {
        let target = self
            .lookup(name)
            .ok_or_else(|| RelayError::UserNotFound(name.to_owned()))?;
        if !self.deliver(&target, event) {
            warn!(client_id = %target.id(), username = name, "direct message dropped");
        }
        Ok(())
    }

    /// Offer `event` to one client's queue, disconnecting it if it has
    /// dropped too many deliveries.
    pub fn deliver(&self, client: &ClientHandle, event: Arc<Event>) -> bool {
        if client.enqueue(event) {
            return true;
        }
        if client.is_closed() {
            return false;
        }
        let drops = client.drop_count();
        if drops < self.max_dropped_messages {
            warn!(client_id = %client.id(), total_drops = drops, "outbound queue full, event dropped");
        } else if self.deregister(client.id()) {
            counter!(SLOW_CLIENTS_TOTAL).increment(1);
            warn!(client_id = %client.id(), drops, "disconnecting slow client");
        }
        false
    }

    /// Route an inbound event from `client` to its handler.
    pub fn dispatch(&self, event: &Event, client: &ClientHandle) -> Result<(), RelayError> {
        self.router.route(self, event, client)
    }

    /// Client currently bound to `name`.
    pub fn lookup(&self, name: &str) -> Option<Arc<ClientHandle>> {
        let state = self.state.read();
        state
            .names
            .get(name)
            .and_then(|id| state.clients.get(id))
            .cloned()
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &ClientId) -> bool {
        self.state.read().clients.contains_key(id)
    }

    /// Number of registered clients.
    pub fn connection_count(&self) -> usize {
        self.state.read().clients.len()
    }

    /// Number of claimed names.
    pub fn named_count(&self) -> usize {
        self.state.read().names.len()
    }

    /// Claimed names (sorted).
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().names.keys().cloned().collect();
        names.sort();
        names
    }

    /// Deregister every client. Used at shutdown.
    pub fn close_all(&self) -> usize {
        let ids: Vec<ClientId> = self.state.read().clients.keys().cloned().collect();
        let closed = ids.iter().filter(|id| self.deregister(id)).count();
        info!(closed, "closed all clients");
        closed
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(EventRouter::default())
    }
}
