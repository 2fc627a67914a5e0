//! In-memory store backend for tests and ephemeral runs.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::core::errors::Result;
use crate::store::EntityStore;
use crate::store::entity::{EntityId, EntityPatch, QueueEntity};

/// `HashMap`-backed store. No persistence across restarts.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entities: RwLock<HashMap<EntityId, QueueEntity>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntityStore for MemoryStore {
    fn all(&self) -> Result<Vec<QueueEntity>> {
        let mut entities: Vec<QueueEntity> = self.entities.read().values().cloned().collect();
        // Newest first, id as tiebreaker for entities detected the same instant.
        entities.sort_by(|a, b| {
            b.detected_at
                .cmp(&a.detected_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(entities)
    }

    fn get(&self, id: EntityId) -> Result<Option<QueueEntity>> {
        Ok(self.entities.read().get(&id).cloned())
    }

    fn upsert(&self, entity: &QueueEntity) -> Result<()> {
        self.entities.write().insert(entity.id, entity.clone());
        Ok(())
    }

    fn patch(&self, id: EntityId, patch: &EntityPatch) -> Result<Option<QueueEntity>> {
        let mut entities = self.entities.write();
        let Some(entity) = entities.get_mut(&id) else {
            return Ok(None);
        };
        patch.apply(entity);
        Ok(Some(entity.clone()))
    }

    fn remove(&self, id: EntityId) -> Result<bool> {
        Ok(self.entities.write().remove(&id).is_some())
    }

    fn max_id(&self) -> Result<EntityId> {
        Ok(self.entities.read().keys().max().copied().unwrap_or(0))
    }
}
