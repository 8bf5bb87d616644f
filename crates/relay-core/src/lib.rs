//! # relay-core
//!
//! Foundation types shared by every relay crate:
//!
//! - **Wire protocol**: the `{ type, payload }` envelope, the closed set of
//!   event tags, and the typed payload for each tag
//! - **Errors**: `RelayError` / `ProtocolError` / `TransportError` via `thiserror`,
//!   each with a stable wire code
//! - **Branded IDs**: `ClientId` keys the registry independently of display names
//! - **Logging**: `tracing` subscriber initialisation

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod protocol;

pub use errors::{ProtocolError, RelayError, TransportError};
pub use ids::ClientId;
pub use protocol::{Event, EventType};
