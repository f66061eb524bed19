//! The consumer-facing connection.
//!
//! [`WebSocketServerConnection`] is what an agent runtime holds: it starts and
//! stops the listener, takes envelopes from the consumer and hands envelopes
//! back. Everything else lives in [`SessionChannel`].

use std::net::SocketAddr;
use std::sync::Arc;

use relay_core::Address;
use relay_protocol::Envelope;
use relay_settings::{RelaySettings, ServerSettings};

use crate::channel::{ChannelState, SessionChannel};
use crate::errors::{ChannelError, Result};
use crate::spec::SpecValidator;

/// A WebSocket server exposed as an envelope connection.
pub struct WebSocketServerConnection {
    channel: SessionChannel,
}

impl WebSocketServerConnection {
    /// Build from listener settings, loading the API spec if one is named.
    pub fn new(settings: ServerSettings) -> Result<Self> {
        Ok(Self {
            channel: SessionChannel::new(settings)?,
        })
    }

    /// Build from the full settings tree.
    pub fn from_settings(settings: &RelaySettings) -> Result<Self> {
        Self::new(settings.server.clone())
    }

    /// Build with an explicit request validator.
    pub fn with_validator(settings: ServerSettings, validator: Arc<dyn SpecValidator>) -> Self {
        Self {
            channel: SessionChannel::with_validator(settings, validator),
        }
    }

    /// Address envelopes from this connection are signed with.
    pub fn address(&self) -> &Address {
        self.channel.core().address()
    }

    /// Address of the consumer.
    pub fn target(&self) -> &Address {
        self.channel.core().target()
    }

    /// Whether the listener is up.
    pub fn is_connected(&self) -> bool {
        self.channel.state() == ChannelState::Running
    }

    /// Bound address while connected.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.channel.local_addr().await
    }

    /// Start listening. Returns the bound address.
    pub async fn connect(&self) -> Result<SocketAddr> {
        self.channel.connect().await
    }

    /// Stop listening and drop every session.
    pub async fn disconnect(&self) {
        self.channel.disconnect().await;
    }

    /// Hand an envelope from the consumer to the bridge.
    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        self.channel.send(envelope).await
    }

    /// Wait for the next envelope for the consumer.
    ///
    /// Returns `None` when not connected, or once disconnected.
    pub async fn receive(&self) -> Option<Envelope> {
        self.channel.receive().await
    }

    /// Live transport sessions.
    pub fn live_sessions(&self) -> usize {
        self.channel.core().live_sessions()
    }

    /// Tracked initial-leg requests.
    pub fn pending_requests(&self) -> usize {
        self.channel.core().pending_requests()
    }
}
