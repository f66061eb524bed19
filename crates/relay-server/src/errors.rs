//! Error types for the session channel and its collaborators.

use std::io;

use relay_protocol::{DialogueError, ProtocolId};
use thiserror::Error;

/// Errors raised to callers of the channel.
///
/// Only logic and configuration faults surface here. Transport faults are
/// absorbed by the channel and reported to the consumer as DISCONNECT.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel is stopped (never connected, or disconnected).
    #[error("channel not connected")]
    NotConnected,

    /// The envelope names a protocol the channel does not bridge.
    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(ProtocolId),

    /// The envelope's declared protocol disagrees with its payload.
    #[error("envelope declares {declared} but carries a {carried} message")]
    ProtocolMismatch {
        /// Protocol id on the envelope.
        declared: ProtocolId,
        /// Protocol of the payload.
        carried: ProtocolId,
    },

    /// A locally produced message broke the dialogue rules.
    #[error(transparent)]
    Dialogue(#[from] DialogueError),

    /// A correlation entry could not be created.
    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    /// The listener could not bind.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O failure.
        source: io::Error,
    },

    /// TLS material could not be loaded.
    #[error(transparent)]
    Tls(#[from] TlsError),

    /// The API spec could not be loaded.
    #[error(transparent)]
    Spec(#[from] SpecError),
}

/// Result type for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Failures writing to or closing a client transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The peer went away mid-write.
    #[error("connection reset by peer")]
    Reset,
    /// The transport was already closed locally.
    #[error("transport already closed")]
    Closed,
    /// Any other write failure.
    #[error("transport error: {0}")]
    Other(String),
}

/// Correlation table misuse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrelationError {
    /// An entry already exists for this identity.
    #[error("identity {0} is already registered")]
    Duplicate(String),
}

/// TLS setup failures.
#[derive(Debug, Error)]
pub enum TlsError {
    /// A PEM file could not be read or parsed.
    #[error("failed to read PEM from {path}: {source}")]
    Pem {
        /// File that failed.
        path: String,
        /// Parser error.
        source: rustls_pki_types::pem::Error,
    },
    /// The certificate file held no certificates.
    #[error("no certificates found in {0}")]
    NoCertificates(String),
    /// rustls rejected the configuration.
    #[error("invalid TLS configuration: {0}")]
    Config(#[from] rustls::Error),
}

/// API spec loading failures.
#[derive(Debug, Error)]
pub enum SpecError {
    /// The spec file could not be read.
    #[error("failed to read API spec: {0}")]
    Io(#[from] io::Error),
    /// The spec is not valid JSON.
    #[error("failed to parse API spec: {0}")]
    Json(#[from] serde_json::Error),
    /// The spec has no usable `paths` object.
    #[error("invalid API spec: {0}")]
    Invalid(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
