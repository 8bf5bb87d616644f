//! Per-connection session state shared between the registry and the
//! connection's read/write loops.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use metrics::counter;
use parking_lot::Mutex;
use relay_core::{ClientId, Event};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::metrics::OUTBOUND_DROPS_TOTAL;

/// Lifecycle of a connected client as seen by the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientState {
    /// Connected, no display name claimed yet.
    Unnamed,
    /// Connected with a claimed display name.
    Named,
    /// Close signalled; the loops are exiting or have exited.
    Closed,
}

/// Handle to one live connection.
///
/// Owns the sending half of the client's bounded outbound queue. The write
/// loop is the only consumer of that queue and the only writer to the
/// underlying connection.
pub struct ClientHandle {
    id: ClientId,
    /// Claimed display name. Written only by the registry under its write lock.
    name: Mutex<Option<String>>,
    tx: mpsc::Sender<Arc<Event>>,
    closed: CancellationToken,
    connected_at: Instant,
    last_seen: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl ClientHandle {
    /// Create a handle feeding the given outbound queue.
    pub fn new(id: ClientId, tx: mpsc::Sender<Arc<Event>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            name: Mutex::new(None),
            tx,
            closed: CancellationToken::new(),
            connected_at: now,
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Registry key.
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Claimed display name, if any.
    pub fn name(&self) -> Option<String> {
        self.name.lock().clone()
    }

    pub(crate) fn set_name(&self, name: Option<String>) {
        *self.name.lock() = name;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        if self.is_closed() {
            ClientState::Closed
        } else if self.name.lock().is_some() {
            ClientState::Named
        } else {
            ClientState::Unnamed
        }
    }

    /// Queue an event for delivery without waiting.
    ///
    /// Returns `false` if the client is closed or its queue is full; a full
    /// or disconnected queue also counts as a dropped message.
    pub fn enqueue(&self, event: Arc<Event>) -> bool {
        if self.is_closed() {
            return false;
        }
        if self.tx.try_send(event).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            counter!(OUTBOUND_DROPS_TOTAL).increment(1);
            false
        }
    }

    /// Total messages dropped for this client.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Signal both loops to stop. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the client is closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Record inbound activity from the peer.
    pub fn mark_seen(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last inbound frame (or connection establishment).
    pub fn idle(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
