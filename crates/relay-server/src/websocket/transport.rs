//! Frame-level transport seam between a client's loops and the socket.
//!
//! The read loop owns a [`FrameReader`], the write loop owns the matching
//! [`FrameWriter`]; nothing else touches the connection. Axum's WebSocket is
//! the production implementation.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use relay_core::TransportError;

/// One transport frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 data frame.
    Text(String),
    /// Binary data frame.
    Binary(Vec<u8>),
    /// Liveness probe.
    Ping(Vec<u8>),
    /// Liveness reply.
    Pong(Vec<u8>),
    /// Close handshake.
    Close,
}

/// Receiving half of a connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Next frame, or `None` once the peer has gone away.
    async fn read_frame(&mut self) -> Option<Result<Frame, TransportError>>;
}

/// Sending half of a connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Write one frame.
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Flush and shut the sending half.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Reading half of an Axum WebSocket.
pub struct WsReader(SplitStream<WebSocket>);

/// Writing half of an Axum WebSocket.
pub struct WsWriter(SplitSink<WebSocket, Message>);

/// Split an upgraded socket into its two halves.
pub fn split(ws: WebSocket) -> (WsReader, WsWriter) {
    let (sink, stream) = ws.split();
    (WsReader(stream), WsWriter(sink))
}

#[async_trait]
impl FrameReader for WsReader {
    async fn read_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        let msg = match self.0.next().await? {
            Ok(msg) => msg,
            Err(e) => return Some(Err(TransportError::Connection(e.to_string()))),
        };
        Some(Ok(match msg {
            Message::Text(text) => Frame::Text(text.to_string()),
            Message::Binary(data) => Frame::Binary(data.to_vec()),
            Message::Ping(data) => Frame::Ping(data.to_vec()),
            Message::Pong(data) => Frame::Pong(data.to_vec()),
            Message::Close(_) => Frame::Close,
        }))
    }
}

#[async_trait]
impl FrameWriter for WsWriter {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        let msg = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data.into()),
            Frame::Ping(data) => Message::Ping(data.into()),
            Frame::Pong(data) => Message::Pong(data.into()),
            Frame::Close => Message::Close(None),
        };
        self.0
            .send(msg)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.0
            .close()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))
    }
}

/// Channel-backed transport for driving the client loops in tests.
#[cfg(test)]
pub(crate) mod memory {
    use super::{Frame, FrameReader, FrameWriter, TransportError, async_trait};
    use tokio::sync::mpsc;

    /// Test-side end of the connection.
    pub(crate) struct Peer {
        /// Frames the server will read.
        pub(crate) inbound: mpsc::UnboundedSender<Frame>,
        /// Frames the server wrote.
        pub(crate) outbound: mpsc::UnboundedReceiver<Frame>,
    }

    pub(crate) struct MemoryReader(mpsc::UnboundedReceiver<Frame>);

    pub(crate) struct MemoryWriter {
        tx: mpsc::UnboundedSender<Frame>,
        closed: bool,
    }

    pub(crate) fn pair() -> (MemoryReader, MemoryWriter, Peer) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        (
            MemoryReader(in_rx),
            MemoryWriter {
                tx: out_tx,
                closed: false,
            },
            Peer {
                inbound: in_tx,
                outbound: out_rx,
            },
        )
    }

    #[async_trait]
    impl FrameReader for MemoryReader {
        async fn read_frame(&mut self) -> Option<Result<Frame, TransportError>> {
            self.0.recv().await.map(Ok)
        }
    }

    #[async_trait]
    impl FrameWriter for MemoryWriter {
        async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
            if self.closed {
                return Err(TransportError::Closed);
            }
            self.tx.send(frame).map_err(|_| TransportError::Closed)
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.closed = true;
            Ok(())
        }
    }
}
