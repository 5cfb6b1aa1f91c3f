//! The persistent channel.
//!
//! `Transport` opens links; a `Link` is one live connection. The connection
//! manager only sees these traits, so tests swap in an in-memory transport.

use std::fmt;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::{debug, info};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::backend::types::{InboundEvent, OutboundSignal};

#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Could not establish the connection. Retried with backoff.
    Connect(String),
    /// The connection failed while in use. Retried with backoff.
    Io(String),
    /// A frame could not be decoded. The frame is dropped; the link stays up.
    Decode(String),
    /// An outbound signal could not be serialized. Nothing was written.
    Encode(String),
}

impl TransportError {
    /// Codec errors affect one frame; everything else ends the link.
    pub fn is_fatal_to_link(&self) -> bool {
        !matches!(self, TransportError::Decode(_) | TransportError::Encode(_))
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Connect(msg) => write!(f, "connect failed: {msg}"),
            TransportError::Io(msg) => write!(f, "channel I/O error: {msg}"),
            TransportError::Decode(msg) => write!(f, "undecodable frame: {msg}"),
            TransportError::Encode(msg) => write!(f, "unencodable signal: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// One established connection.
#[async_trait]
pub trait Link: Send {
    async fn send(&mut self, signal: &OutboundSignal) -> Result<(), TransportError>;

    /// Next inbound event. `None` once the peer closed the connection.
    /// Must be cancel-safe: it is raced against other work.
    async fn recv(&mut self) -> Option<Result<InboundEvent, TransportError>>;

    async fn close(&mut self);
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Link>, TransportError>;
}

pub fn encode_frame(signal: &OutboundSignal) -> Result<String, TransportError> {
    serde_json::to_string(signal).map_err(|e| TransportError::Encode(e.to_string()))
}

pub fn decode_frame(text: &str) -> Result<InboundEvent, TransportError> {
    serde_json::from_str(text).map_err(|e| TransportError::Decode(e.to_string()))
}

// ============================================================================
// WebSocket
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self) -> Result<Box<dyn Link>, TransportError> {
        info!("Connecting to {}", self.url);
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (sink, stream) = stream.split();
        Ok(Box::new(WebSocketLink { sink, stream }))
    }
}

struct WebSocketLink {
    sink: SplitSink<WsStream, Frame>,
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl Link for WebSocketLink {
    async fn send(&mut self, signal: &OutboundSignal) -> Result<(), TransportError> {
        let text = encode_frame(signal)?;
        self.sink
            .send(Frame::Text(text.into()))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<InboundEvent, TransportError>> {
        loop {
            let frame = match self.stream.next().await? {
                Ok(frame) => frame,
                Err(e) => return Some(Err(TransportError::Io(e.to_string()))),
            };
            match frame {
                Frame::Text(text) => return Some(decode_frame(text.as_str())),
                Frame::Close(reason) => {
                    debug!("Channel closed by server: {:?}", reason);
                    return None;
                }
                // Ping/pong handled by tungstenite; binary frames aren't part of the protocol.
                other => debug!("Ignoring non-text frame ({} bytes)", other.len()),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.sink.send(Frame::Close(None)).await;
        let _ = self.sink.close().await;
    }
}
