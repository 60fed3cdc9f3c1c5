//! Transport abstraction under the gateway channel: a shared sending half
//! and an owned receiving half. Two implementations: an in-process duplex
//! pair for tests and embedding, and newline-delimited JSON over any
//! `AsyncRead`/`AsyncWrite` split (used for TCP).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::error::GatewayError;
use crate::protocol::WireMessage;

#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, message: WireMessage) -> Result<(), GatewayError>;
}

#[async_trait]
pub trait MessageStream: Send {
    /// The next inbound message, or `None` once the peer has gone away.
    async fn recv(&mut self) -> Result<Option<WireMessage>, GatewayError>;
}

/// One side of an established gateway channel.
pub struct GatewayEndpoint {
    pub sink: Arc<dyn MessageSink>,
    pub stream: Box<dyn MessageStream>,
}

/// An in-process endpoint pair wired back-to-back. What one side sends, the
/// other receives.
pub fn duplex_pair() -> (GatewayEndpoint, GatewayEndpoint) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();

    let a = GatewayEndpoint {
        sink: Arc::new(ChannelSink { tx: a_tx }),
        stream: Box::new(ChannelStream { rx: b_rx }),
    };
    let b = GatewayEndpoint {
        sink: Arc::new(ChannelSink { tx: b_tx }),
        stream: Box::new(ChannelStream { rx: a_rx }),
    };
    (a, b)
}

struct ChannelSink {
    tx: mpsc::UnboundedSender<WireMessage>,
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn send(&self, message: WireMessage) -> Result<(), GatewayError> {
        self.tx
            .send(message)
            .map_err(|_| GatewayError::ChannelClosed)
    }
}

struct ChannelStream {
    rx: mpsc::UnboundedReceiver<WireMessage>,
}

#[async_trait]
impl MessageStream for ChannelStream {
    async fn recv(&mut self) -> Result<Option<WireMessage>, GatewayError> {
        Ok(self.rx.recv().await)
    }
}

/// Sending half of a newline-delimited JSON framing.
pub struct JsonLineSink<W> {
    writer: tokio::sync::Mutex<W>,
}

impl<W> JsonLineSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(writer),
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> MessageSink for JsonLineSink<W> {
    async fn send(&self, message: WireMessage) -> Result<(), GatewayError> {
        let mut line = serde_json::to_string(&message)?;
        line.push('\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Receiving half of a newline-delimited JSON framing.
pub struct JsonLineStream<R> {
    lines: Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> JsonLineStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> MessageStream for JsonLineStream<R> {
    async fn recv(&mut self) -> Result<Option<WireMessage>, GatewayError> {
        loop {
            match self.lines.next_line().await? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return Ok(Some(serde_json::from_str(&line)?)),
                None => return Ok(None),
            }
        }
    }
}

/// Wrap an accepted or connected TCP stream as a gateway endpoint.
pub fn tcp_endpoint(stream: TcpStream) -> GatewayEndpoint {
    let (reader, writer) = stream.into_split();
    GatewayEndpoint {
        sink: Arc::new(JsonLineSink::new(writer)),
        stream: Box::new(JsonLineStream::new(reader)),
    }
}
