//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use deletion_queue_helper::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{DqhError, Result};

// Store
pub use crate::store::entity::{
    EntityId, EntityPatch, EntityStatus, QueueEntity, WhitelistAction, WhitelistMatch,
    WhitelistRule,
};
pub use crate::store::memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use crate::store::sqlite::SqliteStore;
pub use crate::store::{EntityStore, IdGenerator};

// Engine
pub use crate::engine::confirm::{ConfirmDecision, ConfirmationBroker};
pub use crate::engine::deletion::{DeletionEngine, EngineDeps};
pub use crate::engine::events::{EngineEvent, EventBus, HeadlessUi, UiHandle};
pub use crate::engine::sched::Scheduler;
pub use crate::engine::watcher::{Watcher, WatcherDeps, WatcherHooks};

// Probes and platform seams
pub use crate::platform::trash::{SystemTrash, TrashBin};
pub use crate::probe::lock::{LockProber, SystemLockProber};
pub use crate::probe::window::{SystemWindowProbe, WindowTitleProbe};
