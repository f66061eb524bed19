//! # relay-protocol
//!
//! The typed message vocabulary of the bridge.
//!
//! - **Messages**: [`Message`] carries a dialogue reference, a message id, a
//!   target and protocol-specific content; content enums are closed sum types
//!   over their performatives
//! - **Protocols**: [`websockets`] (the session protocol: CONNECT, SEND,
//!   DISCONNECT, ...) and [`http`] (the initial request/response leg)
//! - **Dialogues**: [`Dialogues`] enforces legal performative transitions and
//!   assigns every conversation a stable [`DialogueLabel`]
//! - **Envelopes**: [`Envelope`] adds sender/recipient/protocol routing
//! - **Codec**: [`JsonCodec`] encodes messages to bytes and back, rejecting
//!   unknown performatives and content that does not match the schema

#![deny(unsafe_code)]

pub mod codec;
pub mod dialogue;
pub mod envelope;
pub mod errors;
pub mod http;
pub mod message;
pub mod websockets;

pub use codec::{Codec, JsonCodec};
pub use dialogue::{Dialogue, DialogueLabel, Dialogues, Role};
pub use envelope::{Envelope, Payload, ProtocolId};
pub use errors::{CodecError, DialogueError, MessageError};
pub use http::{HttpContent, HttpMessage, HttpPerformative};
pub use message::{Content, ContentSchema, DialogueReference, Message, Performative};
pub use websockets::{ErrorCode, WebsocketsContent, WebsocketsMessage, WebsocketsPerformative};
