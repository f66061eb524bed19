//! Routing wrapper around a protocol message.

use std::borrow::Cow;
use std::fmt;

use relay_core::Address;
use serde::{Deserialize, Serialize};

use crate::http::HttpMessage;
use crate::websockets::WebsocketsMessage;

/// Identifier of a message protocol (`author/name:version`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolId(Cow<'static, str>);

impl ProtocolId {
    /// The HTTP request/response protocol.
    pub const HTTP: Self = Self(Cow::Borrowed("relay/http:0.1.0"));
    /// The websockets session protocol.
    pub const WEBSOCKETS: Self = Self(Cow::Borrowed("relay/websockets:0.1.0"));

    /// Any other protocol id, e.g. one received from a misbehaving consumer.
    pub fn other(id: impl Into<String>) -> Self {
        Self(Cow::Owned(id.into()))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The message an envelope carries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol", content = "message", rename_all = "snake_case")]
pub enum Payload {
    /// An HTTP protocol message.
    Http(HttpMessage),
    /// A websockets protocol message.
    Websockets(WebsocketsMessage),
}

impl Payload {
    /// Protocol the payload belongs to.
    pub fn protocol_id(&self) -> ProtocolId {
        match self {
            Self::Http(_) => ProtocolId::HTTP,
            Self::Websockets(_) => ProtocolId::WEBSOCKETS,
        }
    }
}

impl From<HttpMessage> for Payload {
    fn from(msg: HttpMessage) -> Self {
        Self::Http(msg)
    }
}

impl From<WebsocketsMessage> for Payload {
    fn from(msg: WebsocketsMessage) -> Self {
        Self::Websockets(msg)
    }
}

/// A message plus routing metadata. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    to: Address,
    sender: Address,
    protocol_id: ProtocolId,
    message: Payload,
}

impl Envelope {
    /// Wrap `message`, taking the protocol id from the payload.
    pub fn new(to: Address, sender: Address, message: impl Into<Payload>) -> Self {
        let message = message.into();
        Self {
            to,
            sender,
            protocol_id: message.protocol_id(),
            message,
        }
    }

    /// Wrap `message` under an explicit protocol id.
    ///
    /// The id need not agree with the payload; receivers dispatch on the id.
    pub fn with_protocol_id(
        to: Address,
        sender: Address,
        protocol_id: ProtocolId,
        message: impl Into<Payload>,
    ) -> Self {
        Self {
            to,
            sender,
            protocol_id,
            message: message.into(),
        }
    }

    /// Recipient address.
    pub fn to(&self) -> &Address {
        &self.to
    }

    /// Sender address.
    pub fn sender(&self) -> &Address {
        &self.sender
    }

    /// Declared protocol.
    pub fn protocol_id(&self) -> &ProtocolId {
        &self.protocol_id
    }

    /// The carried message.
    pub fn message(&self) -> &Payload {
        &self.message
    }

    /// Consume the envelope, returning the carried message.
    pub fn into_message(self) -> Payload {
        self.message
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
