//! Engine event fan-out and the UI visibility seam.

#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use serde::Serialize;

use crate::store::entity::{EntityId, QueueEntity};

// ──────────────────── events ────────────────────

/// Events emitted by the watcher and deletion engine, consumed by the daemon
/// loop for notifications and by any attached front end for refreshes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A new file settled in the watched directory and is now tracked.
    NewFile { entity: QueueEntity },
    /// An entity reached `deleted`, by us or by an external removal.
    Deleted { entity: QueueEntity },
    /// A firing found the file in use and deferred it.
    InUse {
        entity: QueueEntity,
        /// Suppressed when a visible front end already shows the state.
        notify: bool,
    },
    /// A deletion needs a user decision before proceeding.
    ConfirmDelete {
        entity: QueueEntity,
        /// Capped display list of window titles holding the file open.
        openers: Vec<String>,
        timeout_secs: u64,
        requested_at: DateTime<Utc>,
    },
    /// Retry budget exhausted; the entity is parked as failed.
    Failed { entity: QueueEntity },
    /// Queue contents changed in a way that only needs a redraw.
    QueueRefresh,
}

impl EngineEvent {
    #[must_use]
    pub const fn entity_id(&self) -> Option<EntityId> {
        match self {
            Self::NewFile { entity }
            | Self::Deleted { entity }
            | Self::InUse { entity, .. }
            | Self::Failed { entity }
            | Self::ConfirmDelete { entity, .. } => Some(entity.id),
            Self::QueueRefresh => None,
        }
    }
}

// ──────────────────── bus ────────────────────

/// Broadcast channel: every subscriber receives every event.
///
/// Subscribers that drop their receiver are pruned on the next emit.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<EngineEvent>>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn emit(&self, event: &EngineEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

// ──────────────────── ui seam ────────────────────

/// Visibility hooks for an attached front end.
///
/// The engine consults these to decide whether an in-use notification is
/// redundant and whether a confirmation needs the window raised first.
pub trait UiHandle: Send + Sync {
    fn is_window_visible(&self) -> bool {
        false
    }

    fn bring_to_front(&self) {}
}

/// No front end attached. Never visible, nothing to raise.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessUi;

impl UiHandle for HeadlessUi {}

// ──────────────────── tests ────────────────────
