//! Deletion engine: fires entity deadlines through the liveness checks,
//! confirmation broker, and trash, and owns the manual queue operations.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use crate::core::config::DeletionPolicyConfig;
use crate::core::errors::{DqhError, Result};
use crate::engine::confirm::{ConfirmDecision, ConfirmationBroker, display_list};
use crate::engine::events::{EngineEvent, EventBus, UiHandle};
use crate::engine::sched::Scheduler;
use crate::engine::watcher::WatcherHooks;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::probe::lock::LockProber;
use crate::probe::window::WindowTitleProbe;
use crate::store::EntityStore;
use crate::store::entity::{EntityId, EntityPatch, EntityStatus, QueueEntity};
use crate::platform::trash::TrashBin;

// ──────────────────── wiring ────────────────────

/// Everything the engine needs, injected so tests can substitute fakes.
pub struct EngineDeps {
    pub store: Arc<dyn EntityStore>,
    pub scheduler: Scheduler,
    pub fired: Receiver<EntityId>,
    pub lock_probe: Arc<dyn LockProber>,
    pub window_probe: Arc<dyn WindowTitleProbe>,
    pub trash: Arc<dyn TrashBin>,
    pub bus: Arc<EventBus>,
    pub ui: Arc<dyn UiHandle>,
    pub activity: ActivityLoggerHandle,
    pub policy: DeletionPolicyConfig,
}

pub struct DeletionEngine {
    store: Arc<dyn EntityStore>,
    scheduler: Scheduler,
    lock_probe: Arc<dyn LockProber>,
    window_probe: Arc<dyn WindowTitleProbe>,
    trash: Arc<dyn TrashBin>,
    bus: Arc<EventBus>,
    ui: Arc<dyn UiHandle>,
    activity: ActivityLoggerHandle,
    policy: DeletionPolicyConfig,
    broker: ConfirmationBroker,
    ops: OpGuard,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl DeletionEngine {
    /// Start the engine: spawns the dispatch thread that turns fired
    /// scheduler ids into per-firing worker threads.
    pub fn start(deps: EngineDeps) -> Result<Arc<Self>> {
        let engine = Arc::new(Self {
            store: deps.store,
            scheduler: deps.scheduler,
            lock_probe: deps.lock_probe,
            window_probe: deps.window_probe,
            trash: deps.trash,
            bus: deps.bus,
            ui: deps.ui,
            activity: deps.activity,
            policy: deps.policy,
            broker: ConfirmationBroker::new(),
            ops: OpGuard::default(),
            dispatch: Mutex::new(None),
        });

        let fired = deps.fired;
        let for_dispatch = Arc::clone(&engine);
        let handle = thread::Builder::new()
            .name("dqh-fire-dispatch".to_string())
            .spawn(move || {
                while let Ok(id) = fired.recv() {
                    let for_firing = Arc::clone(&for_dispatch);
                    let spawned = thread::Builder::new()
                        .name(format!("dqh-fire-{id}"))
                        .spawn(move || for_firing.fire_now(id));
                    if spawned.is_err() {
                        // Thread spawn failure: run inline rather than drop
                        // the firing.
                        for_dispatch.fire_now(id);
                    }
                }
            })
            .map_err(|e| DqhError::Runtime {
                details: format!("failed to spawn dispatch thread: {e}"),
            })?;
        *engine.dispatch.lock() = Some(handle);

        Ok(engine)
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn broker(&self) -> &ConfirmationBroker {
        &self.broker
    }

    // ──────────────────── firing pipeline ────────────────────

    /// Run the full firing pipeline for one entity, synchronously.
    ///
    /// Normally invoked from a per-firing thread, but callable directly for
    /// deterministic tests. Errors are absorbed into the entity's state.
    pub fn fire_now(&self, id: EntityId) {
        if let Err(e) = self.run_firing(id) {
            self.activity.log(ActivityEvent::EngineError {
                entity_id: Some(id),
                code: e.code().to_string(),
                message: e.to_string(),
            });
        }
    }

    fn run_firing(&self, id: EntityId) -> Result<()> {
        let Some(entity) = self.store.get(id)? else {
            return Ok(());
        };
        // Only fire-eligible states proceed. Pending means a cancel or keep
        // won since the job was armed; Confirming/Deleting are crash leftovers
        // that are safe to re-run.
        if !matches!(
            entity.status,
            EntityStatus::Scheduled
                | EntityStatus::Snoozed
                | EntityStatus::Confirming
                | EntityStatus::Deleting
        ) {
            return Ok(());
        }
        // The stored deadline is authoritative; a job armed before an
        // out-of-band deadline change re-arms instead of firing early.
        match entity.deadline {
            None => return Ok(()),
            Some(deadline) if deadline > Utc::now() + ChronoDuration::seconds(1) => {
                self.scheduler.schedule(id, deadline)?;
                return Ok(());
            }
            Some(_) => {}
        }

        // The file may have been removed behind our back; the rename window
        // normally catches this, but a deadline can land inside the window.
        if !entity.path.exists() {
            self.finalize_deleted(&entity, "already-removed")?;
            return Ok(());
        }

        // Tier 1: hard lock check.
        let lock_timeout = Duration::from_secs(self.policy.lock_probe_timeout_secs);
        if self.lock_probe.is_locked(&entity.path, lock_timeout) {
            self.snooze_or_fail(&entity, "file is held open")?;
            return Ok(());
        }

        // Tier 2: window heuristic, fail-open.
        let window_timeout = Duration::from_secs(self.policy.window_probe_timeout_secs);
        let openers = self.window_probe.openers(&entity.file_name, window_timeout);
        if openers.is_empty() {
            return self.trash_entity(&entity);
        }

        self.confirm_then_act(&entity, openers)
    }

    fn confirm_then_act(&self, entity: &QueueEntity, openers: Vec<String>) -> Result<()> {
        let timeout = Duration::from_secs(self.policy.confirm_timeout_secs);
        self.store
            .patch(entity.id, &EntityPatch::status(EntityStatus::Confirming))?;

        if !self.ui.is_window_visible() {
            self.ui.bring_to_front();
        }
        let rx = self.broker.begin(entity.id, openers.clone(), timeout);
        self.bus.emit(&EngineEvent::ConfirmDelete {
            entity: entity.clone(),
            openers: openers.clone(),
            timeout_secs: self.policy.confirm_timeout_secs,
            requested_at: Utc::now(),
        });
        self.activity.log(ActivityEvent::ConfirmRequested {
            entity_id: entity.id,
            openers: display_list(&openers),
        });

        // No answer within the timeout means delete: the queue's default
        // action is always the deletion it promised.
        let decision = rx.recv_timeout(timeout).unwrap_or(ConfirmDecision::Delete);
        self.broker.clear(entity.id);

        match decision {
            ConfirmDecision::Keep => {
                self.store.patch(
                    entity.id,
                    &EntityPatch::status(EntityStatus::Pending).with_deadline(None),
                )?;
                self.activity.log(ActivityEvent::ConfirmResolved {
                    entity_id: entity.id,
                    kept: true,
                });
                self.bus.emit(&EngineEvent::QueueRefresh);
                Ok(())
            }
            ConfirmDecision::Delete => {
                // A cancel through the database may have raced the timeout;
                // only an entity still in confirming goes to the trash.
                if !matches!(
                    self.store.get(entity.id)?,
                    Some(QueueEntity {
                        status: EntityStatus::Confirming,
                        ..
                    })
                ) {
                    self.activity.log(ActivityEvent::ConfirmResolved {
                        entity_id: entity.id,
                        kept: true,
                    });
                    return Ok(());
                }
                self.activity.log(ActivityEvent::ConfirmResolved {
                    entity_id: entity.id,
                    kept: false,
                });
                self.trash_entity(entity)
            }
        }
    }

    fn trash_entity(&self, entity: &QueueEntity) -> Result<()> {
        self.store
            .patch(entity.id, &EntityPatch::status(EntityStatus::Deleting))?;
        self.bus.emit(&EngineEvent::QueueRefresh);

        match self.trash.move_to_trash(&entity.path) {
            Ok(()) => self.finalize_deleted(entity, "trashed"),
            Err(e) => {
                // EPERM and friends usually mean a late lock grab; treat the
                // failure like a lock hit and come back later.
                self.snooze_or_fail(entity, &e.to_string())
            }
        }
    }

    fn finalize_deleted(&self, entity: &QueueEntity, reason: &str) -> Result<()> {
        let updated = self.store.patch(
            entity.id,
            &EntityPatch::status(EntityStatus::Deleted)
                .with_deadline(None)
                .with_error(None),
        )?;
        self.scheduler.cancel(entity.id)?;
        self.activity.log(ActivityEvent::Deleted {
            entity_id: entity.id,
            path: entity.path.display().to_string(),
            reason: reason.to_string(),
        });
        if let Some(updated) = updated {
            self.bus.emit(&EngineEvent::Deleted { entity: updated });
        }
        Ok(())
    }

    fn snooze_or_fail(&self, entity: &QueueEntity, details: &str) -> Result<()> {
        let retries = entity.retry_count + 1;
        if retries > self.policy.max_retries {
            let err = DqhError::RetriesExhausted {
                attempts: entity.retry_count,
                details: details.to_string(),
            };
            let updated = self.store.patch(
                entity.id,
                &EntityPatch::status(EntityStatus::Failed)
                    .with_deadline(None)
                    .with_retry_count(retries)
                    .with_error(Some(err.to_string())),
            )?;
            self.scheduler.cancel(entity.id)?;
            self.activity.log(ActivityEvent::EngineError {
                entity_id: Some(entity.id),
                code: err.code().to_string(),
                message: err.to_string(),
            });
            if let Some(updated) = updated {
                self.bus.emit(&EngineEvent::Failed { entity: updated });
            }
            return Ok(());
        }

        let deadline = Utc::now() + ChronoDuration::minutes(self.policy.snooze_minutes as i64);
        let updated = self.store.patch(
            entity.id,
            &EntityPatch::status(EntityStatus::Snoozed)
                .with_deadline(Some(deadline))
                .with_retry_count(retries),
        )?;
        self.scheduler.schedule(entity.id, deadline)?;
        self.activity.log(ActivityEvent::Snoozed {
            entity_id: entity.id,
            until: deadline,
            attempt: retries,
        });
        if let Some(updated) = updated {
            // A visible front end already shows the snooze; skip the toast.
            self.bus.emit(&EngineEvent::InUse {
                entity: updated,
                notify: !self.ui.is_window_visible(),
            });
        }
        Ok(())
    }

    // ──────────────────── manual operations ────────────────────

    /// Cancel the pending deletion: job removed, any confirmation resolves
    /// as keep, status back to `pending`. The retry counter is preserved.
    pub fn cancel(&self, id: EntityId) -> Result<QueueEntity> {
        let _op = self.ops.acquire("cancel", id)?;
        self.require(id)?;

        self.scheduler.cancel(id)?;
        self.broker.resolve(id, ConfirmDecision::Keep);
        let updated = self
            .store
            .patch(
                id,
                &EntityPatch::status(EntityStatus::Pending).with_deadline(None),
            )?
            .ok_or(DqhError::EntityNotFound { id })?;
        self.activity.log(ActivityEvent::Cancelled { entity_id: id });
        self.bus.emit(&EngineEvent::QueueRefresh);
        Ok(updated)
    }

    /// Push the deadline out by the configured snooze interval, measured
    /// from the current deadline or now, whichever is later.
    pub fn snooze(&self, id: EntityId) -> Result<QueueEntity> {
        let _op = self.ops.acquire("snooze", id)?;
        let entity = self.require(id)?;

        let now = Utc::now();
        let base = entity.deadline.map_or(now, |d| d.max(now));
        let deadline = base + ChronoDuration::minutes(self.policy.snooze_minutes as i64);

        let updated = self
            .store
            .patch(
                id,
                &EntityPatch::status(EntityStatus::Snoozed)
                    .with_deadline(Some(deadline))
                    .with_retry_count(entity.retry_count + 1),
            )?
            .ok_or(DqhError::EntityNotFound { id })?;
        self.scheduler.schedule(id, deadline)?;
        self.activity.log(ActivityEvent::Snoozed {
            entity_id: id,
            until: deadline,
            attempt: entity.retry_count + 1,
        });
        self.bus.emit(&EngineEvent::QueueRefresh);
        Ok(updated)
    }

    /// Set or clear the deadline. A new deadline resets the retry counter;
    /// clearing parks the entity as `pending`.
    pub fn set_deadline(&self, id: EntityId, deadline: Option<DateTime<Utc>>) -> Result<QueueEntity> {
        let _op = self.ops.acquire("set-deadline", id)?;
        self.require(id)?;

        let patch = match deadline {
            Some(at) => EntityPatch::status(EntityStatus::Scheduled)
                .with_deadline(Some(at))
                .with_retry_count(0)
                .with_error(None),
            None => EntityPatch::status(EntityStatus::Pending).with_deadline(None),
        };
        let updated = self
            .store
            .patch(id, &patch)?
            .ok_or(DqhError::EntityNotFound { id })?;
        match deadline {
            Some(at) => self.scheduler.schedule(id, at)?,
            None => self.scheduler.cancel(id)?,
        }
        self.activity.log(ActivityEvent::DeadlineSet {
            entity_id: id,
            deadline,
        });
        self.bus.emit(&EngineEvent::QueueRefresh);
        Ok(updated)
    }

    /// Deliver a user's confirmation answer. Returns false for a stale answer
    /// (the firing already timed out or resolved).
    pub fn resolve_confirmation(&self, id: EntityId, decision: ConfirmDecision) -> bool {
        self.broker.resolve(id, decision)
    }

    /// Drop the entity record entirely. The file on disk is untouched.
    pub fn remove_entry(&self, id: EntityId) -> Result<()> {
        let _op = self.ops.acquire("remove", id)?;
        self.scheduler.cancel(id)?;
        self.broker.resolve(id, ConfirmDecision::Keep);
        if !self.store.remove(id)? {
            return Err(DqhError::EntityNotFound { id });
        }
        self.activity.log(ActivityEvent::Removed { entity_id: id });
        self.bus.emit(&EngineEvent::QueueRefresh);
        Ok(())
    }

    fn require(&self, id: EntityId) -> Result<QueueEntity> {
        self.store.get(id)?.ok_or(DqhError::EntityNotFound { id })
    }

    // ──────────────────── startup / shutdown ────────────────────

    /// Re-install scheduler jobs after a restart.
    ///
    /// Future deadlines are re-armed as-is. Deadlines that passed while the
    /// daemon was down fire with a growing stagger so a backlog does not
    /// stampede the probes.
    pub fn reconcile_on_startup(&self) -> Result<usize> {
        let stagger = ChronoDuration::milliseconds(self.policy.startup_stagger_ms as i64);
        let now = Utc::now();
        let mut overdue: i32 = 0;
        let mut restored = 0usize;

        for entity in self.store.all()? {
            if entity.status.is_terminal() {
                continue;
            }
            let Some(deadline) = entity.deadline else {
                continue;
            };
            let fire_at = if deadline <= now {
                // First overdue slot is immediate, each later one a stagger
                // apart.
                let slot = overdue;
                overdue += 1;
                now + stagger * slot
            } else {
                deadline
            };
            self.scheduler.schedule(entity.id, fire_at)?;
            restored += 1;
        }
        self.activity.log(ActivityEvent::Reconciled {
            restored,
            overdue: overdue as usize,
        });
        Ok(restored)
    }

    /// Align scheduler jobs with the store.
    ///
    /// Another process (the CLI) mutates entities through the database; the
    /// daemon calls this periodically so those edits take effect without a
    /// restart. Overdue entities without a job are left for
    /// [`Self::reconcile_on_startup`], since a missing job can also mean a
    /// firing is in flight right now.
    pub fn resync_jobs(&self) -> Result<()> {
        let now = Utc::now();
        for entity in self.store.all()? {
            if entity.status.is_terminal()
                || matches!(
                    entity.status,
                    EntityStatus::Confirming | EntityStatus::Deleting
                )
            {
                continue;
            }
            let job = self.scheduler.scheduled_at(entity.id);
            match (entity.status, entity.deadline) {
                (EntityStatus::Scheduled | EntityStatus::Snoozed, Some(deadline)) => {
                    if job != Some(deadline) && deadline > now {
                        self.scheduler.schedule(entity.id, deadline)?;
                    }
                }
                _ => {
                    if job.is_some() {
                        self.scheduler.cancel(entity.id)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Graceful stop: no more firings, outstanding confirmations keep their
    /// files.
    pub fn shutdown(&self) {
        self.broker.resolve_all_keep();
        self.scheduler.shutdown();
        if let Some(handle) = self.dispatch.lock().take() {
            // The scheduler's sender side is gone, so the dispatch loop ends.
            let _ = handle.join();
        }
    }
}

impl WatcherHooks for DeletionEngine {
    fn cancel_job(&self, id: EntityId) {
        let _ = self.scheduler.cancel(id);
        self.broker.resolve(id, ConfirmDecision::Keep);
    }

    fn schedule_job(&self, id: EntityId, fire_at: DateTime<Utc>) {
        let _ = self.scheduler.schedule(id, fire_at);
    }
}

// ──────────────────── operation guard ────────────────────

/// Per-entity, per-operation re-entrancy guard for the manual commands.
#[derive(Default)]
struct OpGuard {
    active: Arc<Mutex<HashSet<(&'static str, EntityId)>>>,
}

impl OpGuard {
    fn acquire(&self, op: &'static str, id: EntityId) -> Result<OpToken> {
        let mut active = self.active.lock();
        if !active.insert((op, id)) {
            return Err(DqhError::OperationInProgress { op, id });
        }
        Ok(OpToken {
            active: Arc::clone(&self.active),
            key: (op, id),
        })
    }
}

struct OpToken {
    active: Arc<Mutex<HashSet<(&'static str, EntityId)>>>,
    key: (&'static str, EntityId),
}

impl Drop for OpToken {
    fn drop(&mut self) {
        self.active.lock().remove(&self.key);
    }
}
