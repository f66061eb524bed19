//! The consumer's inbound envelope queue.
//!
//! Bounded or unbounded; a bounded queue applies backpressure (enqueue waits)
//! rather than dropping. Closing the inbox wakes every blocked `receive` and
//! `enqueue` and makes further calls fail fast.

use relay_protocol::Envelope;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::errors::{ChannelError, Result};

enum Sender {
    Bounded(mpsc::Sender<Envelope>),
    Unbounded(mpsc::UnboundedSender<Envelope>),
}

enum Receiver {
    Bounded(mpsc::Receiver<Envelope>),
    Unbounded(mpsc::UnboundedReceiver<Envelope>),
}

impl Receiver {
    async fn recv(&mut self) -> Option<Envelope> {
        match self {
            Self::Bounded(rx) => rx.recv().await,
            Self::Unbounded(rx) => rx.recv().await,
        }
    }
}

/// Why [`Inbox::try_enqueue`] did not queue.
#[derive(Debug)]
pub enum TryEnqueueError {
    /// No room right now; the envelope is handed back.
    Full(Box<Envelope>),
    /// The inbox is closed.
    Closed,
}

/// Envelopes waiting for the consumer.
pub struct Inbox {
    tx: Sender,
    rx: Mutex<Receiver>,
    closed: CancellationToken,
}

impl Inbox {
    /// A new inbox; `capacity == 0` means unbounded.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = if capacity == 0 {
            let (tx, rx) = mpsc::unbounded_channel();
            (Sender::Unbounded(tx), Receiver::Unbounded(rx))
        } else {
            let (tx, rx) = mpsc::channel(capacity);
            (Sender::Bounded(tx), Receiver::Bounded(rx))
        };
        Self {
            tx,
            rx: Mutex::new(rx),
            closed: CancellationToken::new(),
        }
    }

    /// Queue an envelope, waiting for room if the inbox is bounded and full.
    pub async fn enqueue(&self, envelope: Envelope) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(ChannelError::NotConnected);
        }
        match &self.tx {
            Sender::Unbounded(tx) => tx.send(envelope).map_err(|_| ChannelError::NotConnected),
            Sender::Bounded(tx) => tokio::select! {
                sent = tx.send(envelope) => sent.map_err(|_| ChannelError::NotConnected),
                () = self.closed.cancelled() => Err(ChannelError::NotConnected),
            },
        }
    }

    /// Queue an envelope without waiting; a full bounded inbox hands it back.
    pub fn try_enqueue(&self, envelope: Envelope) -> std::result::Result<(), TryEnqueueError> {
        if self.closed.is_cancelled() {
            return Err(TryEnqueueError::Closed);
        }
        match &self.tx {
            Sender::Unbounded(tx) => tx.send(envelope).map_err(|_| TryEnqueueError::Closed),
            Sender::Bounded(tx) => tx.try_send(envelope).map_err(|error| match error {
                mpsc::error::TrySendError::Full(envelope) => TryEnqueueError::Full(Box::new(envelope)),
                mpsc::error::TrySendError::Closed(_) => TryEnqueueError::Closed,
            }),
        }
    }

    /// Next envelope, or `None` once the inbox is closed.
    pub async fn receive(&self) -> Option<Envelope> {
        let mut rx = tokio::select! {
            rx = self.rx.lock() => rx,
            () = self.closed.cancelled() => return None,
        };
        tokio::select! {
            biased;
            () = self.closed.cancelled() => None,
            envelope = rx.recv() => envelope,
        }
    }

    /// Close the inbox, releasing queued envelopes and blocked callers.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
