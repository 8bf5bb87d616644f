//! Client lifecycle: registration, the read and write loops, teardown.
//!
//! Each connection runs exactly two tasks. The read loop owns the
//! [`FrameReader`] and dispatches inbound events; the write loop owns the
//! [`FrameWriter`] and is the only code that writes to the connection, pings
//! included. Either loop exiting deregisters the client, which fires its
//! close signal and stops the other loop.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use relay_core::{ClientId, Event, RelayError, TransportError};
use relay_settings::RelaySettings;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, error, info, instrument, trace, warn};

use super::connection::ClientHandle;
use super::heartbeat::{HeartbeatConfig, ReadDeadline};
use super::transport::{Frame, FrameReader, FrameWriter};
use crate::metrics::{CONNECTION_DURATION_SECONDS, EVENT_ERRORS_TOTAL, HEARTBEAT_TIMEOUTS_TOTAL};
use crate::registry::ConnectionRegistry;

/// Per-connection tuning.
#[derive(Clone, Copy, Debug)]
pub struct ClientOptions {
    /// Liveness timing.
    pub heartbeat: HeartbeatConfig,
    /// Capacity of the outbound queue.
    pub queue_capacity: usize,
}

impl ClientOptions {
    /// Options derived from loaded settings.
    pub fn from_settings(settings: &RelaySettings) -> Self {
        Self {
            heartbeat: HeartbeatConfig::from(&settings.heartbeat),
            queue_capacity: settings.server.outbound_queue_capacity.max(1),
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from_settings(&RelaySettings::default())
    }
}

/// Deregisters the client when a loop exits, on every path.
struct DeregisterOnDrop {
    registry: Arc<ConnectionRegistry>,
    id: ClientId,
}

impl DeregisterOnDrop {
    fn new(registry: &Arc<ConnectionRegistry>, id: &ClientId) -> Self {
        Self {
            registry: Arc::clone(registry),
            id: id.clone(),
        }
    }
}

impl Drop for DeregisterOnDrop {
    fn drop(&mut self) {
        let _ = self.registry.deregister(&self.id);
    }
}

/// Serve one connection until either side ends it.
///
/// Returns after the read loop has exited and the write loop has flushed its
/// close frame, or after `pong_wait` if the write loop is stuck.
pub async fn run_client<R, W>(
    reader: R,
    writer: W,
    registry: Arc<ConnectionRegistry>,
    options: ClientOptions,
) where
    R: FrameReader + 'static,
    W: FrameWriter + 'static,
{
    let (tx, rx) = mpsc::channel(options.queue_capacity);
    let client = Arc::new(ClientHandle::new(ClientId::new(), tx));
    registry.register(Arc::clone(&client));
    info!(client_id = %client.id(), "client connected");

    let writer_task = tokio::spawn(write_loop(
        writer,
        rx,
        Arc::clone(&client),
        Arc::clone(&registry),
        options.heartbeat,
    ));
    let writer_abort = writer_task.abort_handle();

    read_loop(reader, Arc::clone(&client), Arc::clone(&registry), options.heartbeat).await;

    if time::timeout(options.heartbeat.pong_wait, writer_task).await.is_err() {
        warn!(client_id = %client.id(), "write loop did not finish, aborting");
        writer_abort.abort();
    }

    histogram!(CONNECTION_DURATION_SECONDS).record(client.age().as_secs_f64());
    info!(
        client_id = %client.id(),
        username = client.name().as_deref().unwrap_or(""),
        "client disconnected"
    );
}

#[instrument(skip_all, fields(client_id = %client.id()))]
async fn read_loop<R: FrameReader>(
    mut reader: R,
    client: Arc<ClientHandle>,
    registry: Arc<ConnectionRegistry>,
    heartbeat: HeartbeatConfig,
) {
    let _guard = DeregisterOnDrop::new(&registry, client.id());
    let mut deadline = ReadDeadline::start(heartbeat.pong_wait);

    loop {
        let next = tokio::select! {
            () = client.closed() => break,
            next = deadline.read(&mut reader) => next,
        };
        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(TransportError::Timeout)) => {
                counter!(HEARTBEAT_TIMEOUTS_TOTAL).increment(1);
                warn!(pong_wait = ?heartbeat.pong_wait, "heartbeat timeout");
                break;
            }
            Some(Err(e)) => {
                warn!(error = %e, "read failed");
                break;
            }
            None => {
                debug!("peer disconnected");
                break;
            }
        };

        deadline.reset();
        client.mark_seen();

        match frame {
            Frame::Text(text) => handle_frame(&text, &client, &registry),
            Frame::Binary(data) => match String::from_utf8(data) {
                Ok(text) => handle_frame(&text, &client, &registry),
                Err(e) => info!(len = e.as_bytes().len(), "skipping non-UTF-8 binary frame"),
            },
            Frame::Ping(_) | Frame::Pong(_) => trace!("liveness frame"),
            Frame::Close => {
                debug!("peer sent close frame");
                break;
            }
        }
    }
}

/// Decode and dispatch one data frame. Failures are reported to the sender
/// and never end the connection.
fn handle_frame(text: &str, client: &ClientHandle, registry: &ConnectionRegistry) {
    let result = Event::decode(text)
        .map_err(RelayError::from)
        .and_then(|event| registry.dispatch(&event, client));
    let Err(err) = result else {
        return;
    };

    counter!(EVENT_ERRORS_TOTAL, "code" => err.code()).increment(1);
    warn!(code = err.code(), error = %err, "event failed");
    match Event::error_notice(&err) {
        Ok(notice) => {
            let _ = registry.deliver(client, Arc::new(notice));
        }
        Err(e) => error!(error = %e, "failed to encode error notice"),
    }
}

#[instrument(skip_all, fields(client_id = %client.id()))]
async fn write_loop<W: FrameWriter>(
    mut writer: W,
    mut queue: mpsc::Receiver<Arc<Event>>,
    client: Arc<ClientHandle>,
    registry: Arc<ConnectionRegistry>,
    heartbeat: HeartbeatConfig,
) {
    let _guard = DeregisterOnDrop::new(&registry, client.id());
    let mut ticker = heartbeat.ping_ticker();
    let wait = heartbeat.pong_wait;

    loop {
        tokio::select! {
            biased;
            () = client.closed() => {
                let _ = write_frame(&mut writer, Frame::Close, wait).await;
                break;
            }
            next = queue.recv() => {
                let Some(event) = next else {
                    let _ = write_frame(&mut writer, Frame::Close, wait).await;
                    break;
                };
                let text = match event.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        error!(event_type = %event.event_type, error = %e, "failed to encode event");
                        continue;
                    }
                };
                if let Err(e) = write_frame(&mut writer, Frame::Text(text), wait).await {
                    warn!(error = %e, "write failed");
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = write_frame(&mut writer, Frame::Ping(Vec::new()), wait).await {
                    warn!(error = %e, "ping failed");
                    break;
                }
                trace!("ping sent");
            }
        }
    }

    if let Err(e) = writer.close().await {
        debug!(error = %e, "close failed");
    }
}

/// Write one frame, giving up after `wait`.
async fn write_frame<W: FrameWriter>(
    writer: &mut W,
    frame: Frame,
    wait: Duration,
) -> Result<(), TransportError> {
    time::timeout(wait, writer.write_frame(frame))
        .await
        .unwrap_or(Err(TransportError::Timeout))
}
