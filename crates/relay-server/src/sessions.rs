//! Live-session registry.
//!
//! A [`Session`] ties a transport to the dialogues it serves: the websockets
//! dialogue, and for upgraded connections the HTTP initial-leg dialogue whose
//! label is the session's request identity. The registry indexes sessions by
//! transport key and by every dialogue label, under one lock so that
//! registration and removal are atomic across both indexes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use relay_core::SessionKey;
use relay_protocol::DialogueLabel;

use crate::errors::CorrelationError;
use crate::transport::Transport;

/// One live client connection.
#[derive(Debug)]
pub struct Session {
    key: SessionKey,
    dialogue: DialogueLabel,
    request_id: Option<DialogueLabel>,
    transport: Arc<dyn Transport>,
    handled: AtomicBool,
}

impl Session {
    /// A session for `transport`, serving the websockets `dialogue`.
    pub fn new(
        key: SessionKey,
        dialogue: DialogueLabel,
        request_id: Option<DialogueLabel>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            key,
            dialogue,
            request_id,
            transport,
            handled: AtomicBool::new(false),
        }
    }

    /// Transport key.
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Stable label of the websockets dialogue.
    pub fn dialogue(&self) -> &DialogueLabel {
        &self.dialogue
    }

    /// Stable label of the HTTP initial leg, for upgraded connections.
    pub fn request_id(&self) -> Option<&DialogueLabel> {
        self.request_id.as_ref()
    }

    /// The connection's write half.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Record that the consumer addressed this session.
    pub fn mark_handled(&self) {
        self.handled.store(true, Ordering::Release);
    }

    /// Whether the consumer ever addressed this session.
    pub fn was_handled(&self) -> bool {
        self.handled.load(Ordering::Acquire)
    }
}

#[derive(Default)]
struct Indexes {
    by_key: HashMap<SessionKey, Arc<Session>>,
    by_dialogue: HashMap<DialogueLabel, SessionKey>,
}

/// Sessions indexed by key and by dialogue label.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<Indexes>,
}

impl SessionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session. Fails if its key or any of its dialogues is taken.
    pub fn register(&self, session: Session) -> Result<Arc<Session>, CorrelationError> {
        let mut inner = self.inner.lock();
        if inner.by_key.contains_key(&session.key) {
            return Err(CorrelationError::Duplicate(session.key.to_string()));
        }
        let labels: Vec<DialogueLabel> = std::iter::once(session.dialogue.clone())
            .chain(session.request_id.clone())
            .collect();
        if let Some(taken) = labels.iter().find(|l| inner.by_dialogue.contains_key(*l)) {
            return Err(CorrelationError::Duplicate(taken.to_string()));
        }
        let session = Arc::new(session);
        for label in labels {
            let _ = inner.by_dialogue.insert(label, session.key.clone());
        }
        let _ = inner.by_key.insert(session.key.clone(), session.clone());
        Ok(session)
    }

    /// Session with transport key `key`.
    pub fn get(&self, key: &SessionKey) -> Option<Arc<Session>> {
        self.inner.lock().by_key.get(key).cloned()
    }

    /// Session serving the dialogue labelled `label` (either protocol).
    pub fn find_by_dialogue(&self, label: &DialogueLabel) -> Option<Arc<Session>> {
        let inner = self.inner.lock();
        let key = inner.by_dialogue.get(&label.incomplete())?;
        inner.by_key.get(key).cloned()
    }

    /// Deregister a session. Returns it if it was present.
    pub fn remove(&self, key: &SessionKey) -> Option<Arc<Session>> {
        let mut inner = self.inner.lock();
        let session = inner.by_key.remove(key)?;
        let _ = inner.by_dialogue.remove(&session.dialogue);
        if let Some(request_id) = &session.request_id {
            let _ = inner.by_dialogue.remove(request_id);
        }
        Some(session)
    }

    /// Deregister every session.
    pub fn drain(&self) -> Vec<Arc<Session>> {
        let mut inner = self.inner.lock();
        inner.by_dialogue.clear();
        inner.by_key.drain().map(|(_, s)| s).collect()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.inner.lock().by_key.len()
    }

    /// Whether no session is live.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().by_key.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
