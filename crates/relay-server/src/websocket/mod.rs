//! Per-client session: handle, transport, heartbeat, and the read/write loops.

pub mod connection;
pub mod heartbeat;
pub mod origin;
pub mod session;
pub mod transport;
