//! Confirmation broker: pending delete-confirmations and their resolution.
//!
//! A firing thread parks on the receiver returned by [`ConfirmationBroker::begin`]
//! until the user answers, the timeout elapses, or shutdown resolves everything
//! as keep.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;

use crate::store::entity::EntityId;

/// How many opener names a confirmation prompt shows before eliding.
const DISPLAY_LIST_CAP: usize = 3;

/// User decision on a pending confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmDecision {
    Delete,
    Keep,
}

/// Snapshot of one pending confirmation, for status displays.
#[derive(Debug, Clone)]
pub struct PendingConfirmation {
    pub entity_id: EntityId,
    pub openers: Vec<String>,
    pub requested_at: DateTime<Utc>,
    pub timeout: Duration,
}

struct Pending {
    tx: Sender<ConfirmDecision>,
    openers: Vec<String>,
    requested_at: DateTime<Utc>,
    timeout: Duration,
}

#[derive(Default)]
pub struct ConfirmationBroker {
    pending: Mutex<HashMap<EntityId, Pending>>,
}

impl ConfirmationBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a confirmation and return the receiver the firing thread
    /// should park on. A second `begin` for the same entity replaces the
    /// first; the abandoned receiver sees a disconnect.
    pub fn begin(
        &self,
        entity_id: EntityId,
        openers: Vec<String>,
        timeout: Duration,
    ) -> Receiver<ConfirmDecision> {
        let (tx, rx) = bounded(1);
        self.pending.lock().insert(
            entity_id,
            Pending {
                tx,
                openers,
                requested_at: Utc::now(),
                timeout,
            },
        );
        rx
    }

    /// Deliver a user decision. Returns false when nothing was pending, so
    /// callers can report a stale answer instead of silently dropping it.
    pub fn resolve(&self, entity_id: EntityId, decision: ConfirmDecision) -> bool {
        let Some(pending) = self.pending.lock().remove(&entity_id) else {
            return false;
        };
        // The firing thread may have timed out already; a dead receiver is fine.
        let _ = pending.tx.send(decision);
        true
    }

    /// Drop the entry after the firing thread has taken its decision.
    pub fn clear(&self, entity_id: EntityId) {
        self.pending.lock().remove(&entity_id);
    }

    /// Shutdown path: every outstanding confirmation resolves as keep.
    pub fn resolve_all_keep(&self) {
        let drained: Vec<Pending> = self.pending.lock().drain().map(|(_, p)| p).collect();
        for pending in drained {
            let _ = pending.tx.send(ConfirmDecision::Keep);
        }
    }

    #[must_use]
    pub fn pending(&self) -> Vec<PendingConfirmation> {
        self.pending
            .lock()
            .iter()
            .map(|(id, p)| PendingConfirmation {
                entity_id: *id,
                openers: p.openers.clone(),
                requested_at: p.requested_at,
                timeout: p.timeout,
            })
            .collect()
    }

    #[must_use]
    pub fn is_pending(&self, entity_id: EntityId) -> bool {
        self.pending.lock().contains_key(&entity_id)
    }
}

/// Render an opener list for prompts: first three names, then "and N more".
#[must_use]
pub fn display_list(openers: &[String]) -> String {
    if openers.is_empty() {
        return String::new();
    }
    let shown = openers
        .iter()
        .take(DISPLAY_LIST_CAP)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    let hidden = openers.len().saturating_sub(DISPLAY_LIST_CAP);
    if hidden == 0 {
        shown
    } else {
        format!("{shown} and {hidden} more")
    }
}

// ──────────────────── tests ────────────────────
