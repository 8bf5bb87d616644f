//! # relay-server
//!
//! Connection registry, event routing, and the Axum `WebSocket` gateway.
//!
//! - `ConnectionRegistry`: live clients plus the unique name index
//! - `EventRouter`: dispatch of `login` / `send_message` / `private_message`
//! - Per-client read and write loops with ping/pong liveness
//! - HTTP endpoints: `/ws` upgrade, `/health`, `/metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod health;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use registry::ConnectionRegistry;
pub use router::EventRouter;
pub use server::RelayServer;
