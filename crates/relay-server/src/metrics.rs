//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

// Metric name constants to avoid typos across modules.

/// Connections registered total (counter).
pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
/// Connections deregistered total (counter).
pub const DISCONNECTIONS_TOTAL: &str = "relay_disconnections_total";
/// Currently registered connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
/// Currently claimed names (gauge).
pub const NAMED_CLIENTS: &str = "relay_named_clients";
/// Connection lifetime seconds (histogram).
pub const CONNECTION_DURATION_SECONDS: &str = "relay_connection_duration_seconds";
/// Outbound deliveries dropped on a full or closed queue (counter).
pub const OUTBOUND_DROPS_TOTAL: &str = "relay_outbound_drops_total";
/// Clients disconnected for exceeding the drop limit (counter).
pub const SLOW_CLIENTS_TOTAL: &str = "relay_slow_clients_total";
/// Inbound events routed (counter, labels: type).
pub const EVENTS_TOTAL: &str = "relay_events_total";
/// Inbound events that failed (counter, labels: code).
pub const EVENT_ERRORS_TOTAL: &str = "relay_event_errors_total";
/// Connections closed by the heartbeat deadline (counter).
pub const HEARTBEAT_TIMEOUTS_TOTAL: &str = "relay_heartbeat_timeouts_total";
