//! Client transports.
//!
//! A [`Transport`] is the write half of one client connection. The live
//! implementation, [`WsTransport`], hands frames to a writer task that owns
//! the socket sink; every write is acknowledged so a reset is reported to the
//! caller that attempted it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message};
use futures::{Sink, SinkExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::errors::TransportError;

/// Outbound queue depth per connection.
const WRITER_QUEUE: usize = 256;

/// Maximum close-reason length allowed by RFC 6455.
const MAX_CLOSE_REASON: usize = 123;

/// Close code and reason sent to the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseReason {
    /// WebSocket close code.
    pub code: u16,
    /// Human-readable reason, truncated to fit a close frame.
    pub reason: String,
}

impl CloseReason {
    /// Normal closure (1000) with no reason.
    pub fn normal() -> Self {
        Self::new(1000, "")
    }

    /// Server going away (1001).
    pub fn going_away() -> Self {
        Self::new(1001, "server shutting down")
    }

    /// A close frame with `code` and `reason`.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        let mut reason = reason.into();
        if reason.len() > MAX_CLOSE_REASON {
            let mut end = MAX_CLOSE_REASON;
            while !reason.is_char_boundary(end) {
                end -= 1;
            }
            reason.truncate(end);
        }
        Self { code, reason }
    }
}

/// How text payloads are framed on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Framing {
    /// Payload is the frame.
    Raw,
    /// Payload is wrapped as `{"event": "data", "data": payload}`.
    Event,
}

impl Framing {
    fn frame(self, text: &str) -> String {
        match self {
            Self::Raw => text.to_owned(),
            Self::Event => serde_json::json!({"event": "data", "data": text}).to_string(),
        }
    }
}

/// Write half of a client connection.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Write a text payload.
    async fn send_text(&self, text: &str) -> Result<(), TransportError>;

    /// Close the connection. Closing twice yields [`TransportError::Closed`].
    async fn close(&self, reason: Option<CloseReason>) -> Result<(), TransportError>;
}

enum Command {
    Text(String, oneshot::Sender<Result<(), TransportError>>),
    Close(Option<CloseReason>),
}

/// A WebSocket connection driven by a writer task.
pub struct WsTransport {
    tx: mpsc::Sender<Command>,
    framing: Framing,
    closed: AtomicBool,
}

impl fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsTransport")
            .field("framing", &self.framing)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl WsTransport {
    /// Take ownership of `sink` and spawn its writer task.
    pub fn spawn<S>(sink: S, framing: Framing) -> (Arc<Self>, JoinHandle<()>)
    where
        S: Sink<Message, Error = axum::Error> + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(WRITER_QUEUE);
        let writer = tokio::spawn(run_writer(sink, rx));
        let transport = Arc::new(Self {
            tx,
            framing,
            closed: AtomicBool::new(false),
        });
        (transport, writer)
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Command::Text(self.framing.frame(text), ack_tx))
            .await
            .map_err(|_| TransportError::Reset)?;
        ack_rx.await.map_err(|_| TransportError::Reset)?
    }

    async fn close(&self, reason: Option<CloseReason>) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(TransportError::Closed);
        }
        self.tx
            .send(Command::Close(reason))
            .await
            .map_err(|_| TransportError::Closed)
    }
}

async fn run_writer<S>(mut sink: S, mut rx: mpsc::Receiver<Command>)
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    while let Some(command) = rx.recv().await {
        match command {
            Command::Text(text, ack) => {
                let result = sink
                    .send(Message::Text(text.into()))
                    .await
                    .map_err(|e| {
                        debug!(error = %e, "socket write failed");
                        TransportError::Reset
                    });
                let failed = result.is_err();
                let _ = ack.send(result);
                if failed {
                    break;
                }
            }
            Command::Close(reason) => {
                let frame = reason.map(|r| CloseFrame {
                    code: r.code,
                    reason: r.reason.into(),
                });
                let _ = sink.send(Message::Close(frame)).await;
                let _ = sink.close().await;
                break;
            }
        }
    }
}


// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;
    use futures::StreamExt;

    fn sink_pair() -> (
        impl Sink<Message, Error = axum::Error> + Unpin + Send + 'static,
        fmpsc::UnboundedReceiver<Message>,
    ) {
        let (tx, rx) = fmpsc::unbounded::<Message>();
        (tx.sink_map_err(axum::Error::new), rx)
    }

    #[test]
    fn event_framing_wraps_payload() {
        let framed = Framing::Event.frame("pong");
        let v: serde_json::Value = serde_json::from_str(&framed).unwrap();
        assert_eq!(v["event"], "data");
        assert_eq!(v["data"], "pong");
        assert_eq!(Framing::Raw.frame("pong"), "pong");
    }

    #[test]
    fn close_reason_is_truncated_on_char_boundary() {
        let long = "é".repeat(100);
        let reason = CloseReason::new(1000, long);
        assert!(reason.reason.len() <= MAX_CLOSE_REASON);
        assert!(reason.reason.chars().all(|c| c == 'é'));
    }

    #[tokio::test]
    async fn writes_reach_the_sink() {
        let (sink, mut frames) = sink_pair();
        let (transport, writer) = WsTransport::spawn(sink, Framing::Raw);
        transport.send_text("hello").await.unwrap();
        assert!(matches!(frames.next().await, Some(Message::Text(t)) if t.as_str() == "hello"));

        transport.close(Some(CloseReason::new(1000, "bye"))).await.unwrap();
        assert!(matches!(
            frames.next().await,
            Some(Message::Close(Some(frame))) if frame.code == 1000 && frame.reason.as_str() == "bye"
        ));
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn write_to_vanished_peer_is_a_reset() {
        let (sink, frames) = sink_pair();
        drop(frames);
        let (transport, _writer) = WsTransport::spawn(sink, Framing::Raw);
        assert_eq!(transport.send_text("x").await, Err(TransportError::Reset));
        assert_eq!(transport.send_text("y").await, Err(TransportError::Reset));
    }

    #[tokio::test]
    async fn closing_twice_reports_closed() {
        let (sink, _frames) = sink_pair();
        let (transport, _writer) = WsTransport::spawn(sink, Framing::Event);
        transport.close(None).await.unwrap();
        assert_eq!(transport.close(None).await, Err(TransportError::Closed));
        assert_eq!(transport.send_text("late").await, Err(TransportError::Closed));
    }
}
