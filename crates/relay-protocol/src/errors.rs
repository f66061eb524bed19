//! Error types for messages, dialogues, and the codec.

use thiserror::Error;

/// A message violates the structural rules every message must satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    /// The starter half of the dialogue reference is empty.
    #[error("dialogue reference has an empty starter nonce")]
    EmptyStarterReference,

    /// Message ids are never zero.
    #[error("message id must not be 0")]
    ZeroMessageId,

    /// The opening message (id 1) must not target anything.
    #[error("opening message must have target 0, found {target}")]
    OpeningTarget {
        /// The offending target.
        target: i64,
    },

    /// A non-opening message must target an earlier message.
    #[error("message {message_id} must target an earlier message")]
    MissingTarget {
        /// The offending message id.
        message_id: i64,
    },

    /// Content-level validation failed.
    #[error("invalid content: {0}")]
    InvalidContent(String),
}

/// A message cannot be applied to (or produced by) a dialogue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DialogueError {
    /// The message itself is malformed.
    #[error(transparent)]
    Message(#[from] MessageError),

    /// Only initial performatives may open a dialogue.
    #[error("performative {0} cannot open a dialogue")]
    NotInitial(String),

    /// No dialogue matches the message's reference and counterparty.
    #[error("no dialogue for reference {0}")]
    NotFound(String),

    /// An opening message reused the reference of a live dialogue.
    #[error("dialogue {0} already exists")]
    Duplicate(String),

    /// The responder half of the reference disagrees with the stored one.
    #[error("responder reference mismatch: expected {expected}, found {found}")]
    ReferenceMismatch {
        /// The responder nonce held by the dialogue.
        expected: String,
        /// The responder nonce carried by the message.
        found: String,
    },

    /// The message id is not the next one for its side.
    #[error("unexpected message id: expected {expected}, found {found}")]
    UnexpectedId {
        /// The id the dialogue expected.
        expected: i64,
        /// The id the message carried.
        found: i64,
    },

    /// The target does not name a message in this dialogue.
    #[error("target {0} is not a message of this dialogue")]
    UnknownTarget(i64),

    /// The performative is not a legal reply to its target.
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition {
        /// Performative of the targeted message.
        from: String,
        /// Performative of the reply.
        to: String,
    },

    /// The dialogue already reached a terminal performative.
    #[error("dialogue already terminated")]
    Terminated,
}

/// Encoding or decoding failed.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Bytes are not valid JSON or do not match the message shape.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The content object has no `performative` discriminant.
    #[error("content has no performative")]
    MissingPerformative,

    /// The discriminant does not name a performative of the protocol.
    #[error("unknown performative: {0}")]
    UnknownPerformative(String),

    /// The content carries a field its performative does not define.
    #[error("unexpected field `{field}` for performative {performative}")]
    UnexpectedField {
        /// Performative being decoded.
        performative: &'static str,
        /// The extra field.
        field: String,
    },

    /// A required content field is absent.
    #[error("missing field `{field}` for performative {performative}")]
    MissingField {
        /// Performative being decoded.
        performative: &'static str,
        /// The absent field.
        field: &'static str,
    },

    /// The decoded message is structurally inconsistent.
    #[error(transparent)]
    Inconsistent(#[from] MessageError),

    /// JSON serialization failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
