//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

use crate::registry::ConnectionRegistry;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"shutting_down"` once shutdown has begun.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered connections.
    pub connections: usize,
    /// Connections with a claimed name.
    pub named_clients: usize,
}

/// Build a health response from the registry's live counts.
pub fn health_check(
    start_time: Instant,
    registry: &ConnectionRegistry,
    shutting_down: bool,
) -> HealthResponse {
    HealthResponse {
        status: if shutting_down { "shutting_down" } else { "ok" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: registry.connection_count(),
        named_clients: registry.named_count(),
    }
}
