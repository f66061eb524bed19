//! Generic message shape and the traits protocols implement.
//!
//! A protocol is a closed set of performatives ([`Performative`]) plus a
//! content sum type ([`Content`]) with one variant per performative. The
//! transition table lives on the performative; the dialogue layer consults
//! it, this module only checks per-message structure.

use std::fmt;
use std::hash::Hash;

use relay_core::DialogueNonce;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::envelope::ProtocolId;
use crate::errors::MessageError;

/// Content fields a performative defines, excluding the discriminant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContentSchema {
    /// Fields that must be present.
    pub required: &'static [&'static str],
    /// Fields that may be present.
    pub optional: &'static [&'static str],
}

impl ContentSchema {
    /// Whether `field` is defined (required or optional).
    pub fn defines(&self, field: &str) -> bool {
        self.required.contains(&field) || self.optional.contains(&field)
    }
}

/// Discriminant of a protocol's content, with its transition table.
pub trait Performative:
    Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// Ways a dialogue of this protocol can end.
    type EndState: Copy + Eq + fmt::Debug + Send + Sync + 'static;

    /// Every performative of the protocol.
    const ALL: &'static [Self];

    /// Wire name (snake case).
    fn as_str(self) -> &'static str;

    /// Whether this performative may open a dialogue.
    fn is_initial(self) -> bool;

    /// Performatives that may reply to this one.
    fn valid_replies(self) -> &'static [Self];

    /// End state reached when a dialogue's last message has this performative.
    fn end_state(self) -> Option<Self::EndState>;

    /// Content fields this performative carries.
    fn schema(self) -> ContentSchema;

    /// Terminal performatives admit no reply.
    fn is_terminal(self) -> bool {
        self.valid_replies().is_empty()
    }

    /// Whether `next` is a legal reply to a message with this performative.
    fn accepts_reply(self, next: Self) -> bool {
        self.valid_replies().contains(&next)
    }

    /// Parse a wire name.
    fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.as_str() == name)
    }
}

/// Protocol-specific message content.
pub trait Content:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// The protocol's performative type.
    type Performative: Performative;

    /// Identifier of the protocol this content belongs to.
    const PROTOCOL_ID: ProtocolId;

    /// Discriminant of this content.
    fn performative(&self) -> Self::Performative;

    /// Value-level checks beyond what the type system enforces.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// `(starter, responder)` nonce pair identifying a dialogue.
///
/// The responder half is empty until the responding side first replies.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DialogueReference {
    /// Nonce chosen by the side that opened the dialogue.
    pub starter: DialogueNonce,
    /// Nonce chosen by the responding side, or empty.
    pub responder: DialogueNonce,
}

impl DialogueReference {
    /// A fresh reference with a new starter nonce and no responder nonce.
    #[must_use]
    pub fn fresh() -> Self {
        Self {
            starter: DialogueNonce::new(),
            responder: DialogueNonce::empty(),
        }
    }

    /// The same reference with the responder half cleared.
    #[must_use]
    pub fn incomplete(&self) -> Self {
        Self {
            starter: self.starter.clone(),
            responder: DialogueNonce::empty(),
        }
    }

    /// Whether both halves are assigned.
    pub fn is_complete(&self) -> bool {
        !self.starter.is_unset() && !self.responder.is_unset()
    }
}

impl fmt::Display for DialogueReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.starter, self.responder)
    }
}

/// One message of a dialogue.
///
/// Ids of the side that opened the dialogue count up from 1; ids of the
/// responding side count down from -1. `target` names the message being
/// replied to and is 0 only for the opening message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "C: Content")]
pub struct Message<C> {
    /// Dialogue this message belongs to.
    pub dialogue_reference: DialogueReference,
    /// Position of this message within its side of the dialogue.
    pub message_id: i64,
    /// Id of the message this one replies to.
    pub target: i64,
    /// Protocol content.
    pub content: C,
}

impl<C: Content> Message<C> {
    /// Build a message without checking it.
    pub fn new(dialogue_reference: DialogueReference, message_id: i64, target: i64, content: C) -> Self {
        Self {
            dialogue_reference,
            message_id,
            target,
            content,
        }
    }

    /// The opening message of a new dialogue.
    pub fn opening(dialogue_reference: DialogueReference, content: C) -> Self {
        Self::new(dialogue_reference, 1, 0, content)
    }

    /// Discriminant of the content.
    pub fn performative(&self) -> C::Performative {
        self.content.performative()
    }

    /// Check the structural rules every message must satisfy.
    pub fn check_consistency(&self) -> Result<(), MessageError> {
        if self.dialogue_reference.starter.is_unset() {
            return Err(MessageError::EmptyStarterReference);
        }
        match (self.message_id, self.target) {
            (0, _) => return Err(MessageError::ZeroMessageId),
            (1, 0) => {}
            (1, target) => return Err(MessageError::OpeningTarget { target }),
            (message_id, 0) => return Err(MessageError::MissingTarget { message_id }),
            _ => {}
        }
        self.content.validate().map_err(MessageError::InvalidContent)
    }

    /// Like [`check_consistency`](Self::check_consistency), logging the failure.
    pub fn is_consistent(&self) -> bool {
        match self.check_consistency() {
            Ok(()) => true,
            Err(error) => {
                warn!(
                    protocol = %C::PROTOCOL_ID,
                    performative = %self.performative(),
                    message_id = self.message_id,
                    %error,
                    "inconsistent message"
                );
                false
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
