//! Settings type definitions.
//!
//! Field names are camelCase in JSON. Every struct is `#[serde(default)]`
//! so a partial file only overrides what it names.

use std::time::Duration;

use relay_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Network and per-connection limits.
    pub server: ServerSettings,
    /// Liveness probing.
    pub heartbeat: HeartbeatSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat.pong_wait_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "heartbeat.pongWaitMs must be positive".into(),
            ));
        }
        if self.server.outbound_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.outboundQueueCapacity must be positive".into(),
            ));
        }
        if self.server.max_message_size == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxMessageSize must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Server network settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Inbound frame size limit in bytes.
    pub max_message_size: usize,
    /// Capacity of each client's outbound queue.
    pub outbound_queue_capacity: usize,
    /// Cumulative dropped deliveries after which a client is disconnected.
    pub max_dropped_messages: u64,
    /// Permitted `Origin` header values; `None` permits every origin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_origins: Option<Vec<String>>,
    /// Whether `send_message` / `private_message` need a prior `login`.
    pub require_login: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            max_message_size: 512,
            outbound_queue_capacity: 256,
            max_dropped_messages: 64,
            allowed_origins: None,
            require_login: true,
        }
    }
}

/// Heartbeat settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// Maximum peer silence before the connection is considered dead.
    pub pong_wait_ms: u64,
}

impl HeartbeatSettings {
    /// `pong_wait_ms` as a [`Duration`].
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            pong_wait_ms: 10_000,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Compact,
        }
    }
}
