//! Correlation of asynchronous replies with the request that caused them.
//!
//! [`CorrelationTable`] maps an identity to a one-shot completion handle.
//! Registration is atomic (check-then-insert under one shard lock), so two
//! racing registrations for the same identity cannot both succeed. A resolved
//! entry stays in the table, marked spent, until it is removed; this keeps a
//! second resolution distinguishable from a resolution of an unknown identity.

use std::fmt;
use std::hash::Hash;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::errors::CorrelationError;

/// What happened to a resolution attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The waiter was handed the value.
    Resolved,
    /// The entry had already been resolved; the value was dropped.
    AlreadyResolved,
    /// No entry exists for the identity; the value was dropped.
    Unknown,
}

/// Concurrent identity → pending-completion map.
pub struct CorrelationTable<K, V> {
    entries: DashMap<K, Option<oneshot::Sender<V>>>,
}

impl<K, V> CorrelationTable<K, V>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    /// An empty table.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Register `id`, returning the receiver its resolution will arrive on.
    pub fn register(&self, id: K) -> Result<oneshot::Receiver<V>, CorrelationError> {
        match self.entries.entry(id) {
            Entry::Occupied(occupied) => Err(CorrelationError::Duplicate(occupied.key().to_string())),
            Entry::Vacant(vacant) => {
                let (tx, rx) = oneshot::channel();
                debug!(identity = %vacant.key(), "correlation registered");
                let _ = vacant.insert(Some(tx));
                Ok(rx)
            }
        }
    }

    /// Hand `value` to the waiter registered under `id`.
    pub fn resolve(&self, id: &K, value: V) -> ResolveOutcome {
        let Some(mut slot) = self.entries.get_mut(id) else {
            warn!(identity = %id, "no pending request matches this reply");
            return ResolveOutcome::Unknown;
        };
        match slot.take() {
            Some(tx) => {
                if tx.send(value).is_err() {
                    debug!(identity = %id, "waiter already gone");
                }
                ResolveOutcome::Resolved
            }
            None => {
                debug!(identity = %id, "already resolved, ignoring");
                ResolveOutcome::AlreadyResolved
            }
        }
    }

    /// Drop the entry for `id`. Returns whether one existed.
    pub fn remove(&self, id: &K) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Whether an entry exists for `id`.
    pub fn contains(&self, id: &K) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of entries (resolved or not).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry; waiters observe a closed channel.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl<K, V> Default for CorrelationTable<K, V>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
