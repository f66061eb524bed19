//! Dialogue bookkeeping.
//!
//! A [`Dialogues`] store tracks every conversation one endpoint takes part
//! in. Messages enter either by being produced locally ([`Dialogues::create`],
//! [`Dialogues::reply`]) or by arriving from the counterparty
//! ([`Dialogues::update`]); both paths run the same checks:
//!
//! - the message id is the next one for its side (starter ids count up from
//!   1, responder ids count down from -1)
//! - the target names an existing message of the dialogue
//! - the performative is a legal reply to the target's performative
//!
//! Dialogues are keyed by their *incomplete* label (responder nonce cleared),
//! which never changes once the dialogue exists. A dialogue whose last message
//! is terminal is dropped from the store.

use std::collections::HashMap;
use std::fmt;

use relay_core::{Address, DialogueNonce};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::DialogueError;
use crate::message::{Content, DialogueReference, Message, Performative};

/// Which side of a protocol an endpoint plays in a dialogue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The endpoint acting as client.
    Client,
    /// The endpoint acting as server.
    Server,
}

/// Assigns this endpoint's role from a dialogue's opening message and the
/// counterparty address.
pub type RoleFn<C> = fn(&Message<C>, &Address) -> Role;

/// Identity of a dialogue.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DialogueLabel {
    /// The nonce pair.
    pub reference: DialogueReference,
    /// The other party.
    pub opponent: Address,
    /// Whoever sent the opening message.
    pub starter: Address,
}

impl DialogueLabel {
    /// This label with the responder nonce cleared.
    #[must_use]
    pub fn incomplete(&self) -> Self {
        Self {
            reference: self.reference.incomplete(),
            opponent: self.opponent.clone(),
            starter: self.starter.clone(),
        }
    }
}

impl fmt::Display for DialogueLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.reference, self.opponent, self.starter)
    }
}

/// One conversation and its message history.
#[derive(Clone, Debug)]
pub struct Dialogue<C> {
    label: DialogueLabel,
    self_address: Address,
    role: Role,
    messages: Vec<Message<C>>,
    last_starter_id: i64,
    last_responder_id: i64,
}

impl<C: Content> Dialogue<C> {
    fn new(label: DialogueLabel, self_address: Address, role: Role) -> Self {
        Self {
            label,
            self_address,
            role,
            messages: Vec::new(),
            last_starter_id: 0,
            last_responder_id: 0,
        }
    }

    /// Label as currently known (responder nonce may still be empty).
    pub fn label(&self) -> &DialogueLabel {
        &self.label
    }

    /// Stable key of this dialogue.
    pub fn incomplete_label(&self) -> DialogueLabel {
        self.label.incomplete()
    }

    /// This endpoint's role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether this endpoint sent the opening message.
    pub fn is_self_initiated(&self) -> bool {
        self.label.starter == self.self_address
    }

    /// All messages in the order they were recorded.
    pub fn messages(&self) -> &[Message<C>] {
        &self.messages
    }

    /// Most recent message.
    pub fn last_message(&self) -> Option<&Message<C>> {
        self.messages.last()
    }

    /// Performative of the most recent message.
    pub fn last_performative(&self) -> Option<C::Performative> {
        self.messages.last().map(Message::performative)
    }

    /// End state reached by the most recent message, if any.
    pub fn end_state(&self) -> Option<<C::Performative as Performative>::EndState> {
        self.last_performative().and_then(Performative::end_state)
    }

    /// Whether a terminal performative has been recorded.
    pub fn is_terminated(&self) -> bool {
        self.messages.iter().any(|m| m.performative().is_terminal())
    }

    fn next_own_id(&self) -> i64 {
        if self.is_self_initiated() {
            self.last_starter_id + 1
        } else {
            self.last_responder_id - 1
        }
    }

    fn validate_next(&self, msg: &Message<C>, from_self: bool) -> Result<(), DialogueError> {
        msg.check_consistency()?;
        let performative = msg.performative();

        if self.messages.is_empty() {
            if msg.message_id != 1 {
                return Err(DialogueError::UnexpectedId {
                    expected: 1,
                    found: msg.message_id,
                });
            }
            if !performative.is_initial() {
                return Err(DialogueError::NotInitial(performative.to_string()));
            }
            return Ok(());
        }

        if self.is_terminated() {
            return Err(DialogueError::Terminated);
        }

        let starter_side = from_self == self.is_self_initiated();
        let expected = if starter_side {
            self.last_starter_id + 1
        } else {
            self.last_responder_id - 1
        };
        if msg.message_id != expected {
            return Err(DialogueError::UnexpectedId {
                expected,
                found: msg.message_id,
            });
        }

        let target = self
            .messages
            .iter()
            .find(|m| m.message_id == msg.target)
            .ok_or(DialogueError::UnknownTarget(msg.target))?;
        if !target.performative().accepts_reply(performative) {
            return Err(DialogueError::IllegalTransition {
                from: target.performative().to_string(),
                to: performative.to_string(),
            });
        }
        Ok(())
    }

    fn push(&mut self, msg: Message<C>) {
        if msg.message_id > 0 {
            self.last_starter_id = msg.message_id;
        } else {
            self.last_responder_id = msg.message_id;
        }
        self.messages.push(msg);
    }

    /// Whether `found` fits this dialogue; `Ok(true)` means the counterparty's
    /// nonce is new and should be adopted once the message is accepted.
    fn check_responder_reference(&self, found: &DialogueNonce) -> Result<bool, DialogueError> {
        let stored = &self.label.reference.responder;
        if found == stored {
            return Ok(false);
        }
        if self.is_self_initiated() && stored.is_unset() && !found.is_unset() {
            return Ok(true);
        }
        if !self.is_self_initiated() && found.is_unset() {
            return Ok(false);
        }
        Err(DialogueError::ReferenceMismatch {
            expected: stored.to_string(),
            found: found.to_string(),
        })
    }
}

/// Every dialogue of one endpoint.
#[derive(Debug)]
pub struct Dialogues<C> {
    self_address: Address,
    role_from_first_message: RoleFn<C>,
    dialogues: HashMap<DialogueLabel, Dialogue<C>>,
}

impl<C: Content> Dialogues<C> {
    /// An empty store for the endpoint at `self_address`.
    pub fn new(self_address: Address, role_from_first_message: RoleFn<C>) -> Self {
        Self {
            self_address,
            role_from_first_message,
            dialogues: HashMap::new(),
        }
    }

    /// Open a dialogue with `counterparty`, returning the opening message and
    /// the dialogue's stable label.
    pub fn create(
        &mut self,
        counterparty: &Address,
        content: C,
    ) -> Result<(Message<C>, DialogueLabel), DialogueError> {
        let performative = content.performative();
        if !performative.is_initial() {
            return Err(DialogueError::NotInitial(performative.to_string()));
        }
        let msg = Message::opening(DialogueReference::fresh(), content);
        msg.check_consistency()?;

        let label = DialogueLabel {
            reference: msg.dialogue_reference.clone(),
            opponent: counterparty.clone(),
            starter: self.self_address.clone(),
        };
        let role = (self.role_from_first_message)(&msg, counterparty);
        let mut dialogue = Dialogue::new(label.clone(), self.self_address.clone(), role);
        dialogue.push(msg.clone());
        let _ = self.dialogues.insert(label.clone(), dialogue);
        debug!(dialogue = %label, %performative, "dialogue created");
        Ok((msg, label))
    }

    /// Record a message received from `sender`, returning the stable label of
    /// the dialogue it belongs to.
    pub fn update(&mut self, msg: Message<C>, sender: &Address) -> Result<DialogueLabel, DialogueError> {
        msg.check_consistency()?;
        let reference = msg.dialogue_reference.incomplete();

        if msg.message_id == 1 {
            let key = DialogueLabel {
                reference,
                opponent: sender.clone(),
                starter: sender.clone(),
            };
            if self.dialogues.contains_key(&key) {
                return Err(DialogueError::Duplicate(key.to_string()));
            }
            let mut label = key.clone();
            label.reference.responder = DialogueNonce::new();
            let role = (self.role_from_first_message)(&msg, sender);
            let mut dialogue = Dialogue::new(label, self.self_address.clone(), role);
            dialogue.validate_next(&msg, false)?;
            dialogue.push(msg);
            let _ = self.dialogues.insert(key.clone(), dialogue);
            debug!(dialogue = %key, "dialogue opened by counterparty");
            return Ok(key);
        }

        let own = DialogueLabel {
            reference: reference.clone(),
            opponent: sender.clone(),
            starter: self.self_address.clone(),
        };
        let theirs = DialogueLabel {
            reference,
            opponent: sender.clone(),
            starter: sender.clone(),
        };
        let key = if self.dialogues.contains_key(&own) { own } else { theirs };
        let dialogue = self
            .dialogues
            .get_mut(&key)
            .ok_or_else(|| DialogueError::NotFound(msg.dialogue_reference.to_string()))?;

        let adopt = dialogue.check_responder_reference(&msg.dialogue_reference.responder)?;
        dialogue.validate_next(&msg, false)?;
        if adopt {
            dialogue.label.reference.responder = msg.dialogue_reference.responder.clone();
        }
        dialogue.push(msg);
        self.drop_if_terminated(&key);
        Ok(key)
    }

    /// Reply within the dialogue labelled `label`, targeting its latest message.
    pub fn reply(&mut self, label: &DialogueLabel, content: C) -> Result<Message<C>, DialogueError> {
        let key = label.incomplete();
        let target = self
            .dialogues
            .get(&key)
            .and_then(Dialogue::last_message)
            .map_or(0, |m| m.message_id);
        self.reply_to(label, target, content)
    }

    /// Reply within the dialogue labelled `label`, targeting message `target`.
    pub fn reply_to(
        &mut self,
        label: &DialogueLabel,
        target: i64,
        content: C,
    ) -> Result<Message<C>, DialogueError> {
        let key = label.incomplete();
        let dialogue = self
            .dialogues
            .get_mut(&key)
            .ok_or_else(|| DialogueError::NotFound(key.to_string()))?;

        let msg = Message::new(
            dialogue.label.reference.clone(),
            dialogue.next_own_id(),
            target,
            content,
        );
        dialogue.validate_next(&msg, true)?;
        dialogue.push(msg.clone());
        self.drop_if_terminated(&key);
        Ok(msg)
    }

    /// Look up a dialogue by any form of its label.
    pub fn get(&self, label: &DialogueLabel) -> Option<&Dialogue<C>> {
        self.dialogues.get(&label.incomplete())
    }

    /// Forget a dialogue.
    pub fn remove(&mut self, label: &DialogueLabel) -> Option<Dialogue<C>> {
        self.dialogues.remove(&label.incomplete())
    }

    /// Number of live dialogues.
    pub fn len(&self) -> usize {
        self.dialogues.len()
    }

    /// Whether no dialogue is live.
    pub fn is_empty(&self) -> bool {
        self.dialogues.is_empty()
    }

    fn drop_if_terminated(&mut self, key: &DialogueLabel) {
        if self.dialogues.get(key).is_some_and(Dialogue::is_terminated) {
            let _ = self.dialogues.remove(key);
            debug!(dialogue = %key, "dialogue terminated");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
