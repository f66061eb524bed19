//! # relay-server
//!
//! A WebSocket server that turns client sockets into dialogues for an agent
//! consumer, and the consumer's replies back into socket traffic.
//!
//! - Upgrade requests on any path are checked against an optional API spec,
//!   then forwarded as an HTTP REQUEST followed by a websockets CONNECT
//! - Client frames become SEND; consumer SEND becomes a socket write
//! - The first consumer answer (HTTP RESPONSE, CONNECTION_ACK or ERROR)
//!   resolves the request and closes the socket; otherwise a response timeout
//!   closes it
//! - `/socket.io/` serves a multiplexed JSON event variant of the same flow
//! - Optional TLS and a `/health` endpoint

#![deny(unsafe_code)]

pub mod channel;
pub mod connection;
pub mod correlation;
pub mod errors;
pub mod health;
pub mod inbox;
pub mod server;
pub mod sessions;
pub mod spec;
pub mod tls;
pub mod transport;

pub use channel::{ChannelCore, ChannelState, SessionChannel, SessionEvent, SessionOutcome};
pub use connection::WebSocketServerConnection;
pub use errors::{ChannelError, CorrelationError, Result, SpecError, TlsError, TransportError};
pub use spec::{AllowAll, ApiSpec, ParsedRequest, SpecValidator};
pub use transport::{CloseReason, Transport};
