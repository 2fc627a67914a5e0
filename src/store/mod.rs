//! Entity persistence: the [`EntityStore`] trait and its backends.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::errors::Result;
use crate::store::entity::{EntityId, EntityPatch, QueueEntity};

pub mod entity;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

// ──────────────────── store trait ────────────────────

/// Persistence seam for queue entities.
///
/// Implementations must be safe to share across the watcher, scheduler,
/// and deletion threads.
pub trait EntityStore: Send + Sync {
    /// All entities, newest detection first.
    fn all(&self) -> Result<Vec<QueueEntity>>;

    fn get(&self, id: EntityId) -> Result<Option<QueueEntity>>;

    /// Insert or fully replace an entity.
    fn upsert(&self, entity: &QueueEntity) -> Result<()>;

    /// Apply a partial update; returns the updated entity, or `None` when the
    /// id is unknown.
    fn patch(&self, id: EntityId, patch: &EntityPatch) -> Result<Option<QueueEntity>>;

    /// Remove the record entirely. Returns whether it existed.
    fn remove(&self, id: EntityId) -> Result<bool>;

    /// Highest id ever stored, 0 when empty. Seeds the id generator.
    fn max_id(&self) -> Result<EntityId>;
}

// ──────────────────── id generation ────────────────────

/// Monotonic entity id source, seeded from the store on startup.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Seed from the store's highest known id.
    pub fn from_store(store: &dyn EntityStore) -> Result<Self> {
        Ok(Self {
            next: AtomicU64::new(store.max_id()?.saturating_add(1)),
        })
    }

    #[must_use]
    pub fn starting_at(first: EntityId) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn next_id(&self) -> EntityId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
