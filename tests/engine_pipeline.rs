//! End-to-end firing pipeline scenarios driven through fake probes and a
//! recording trash, so every branch of the deadline handling is exercised
//! deterministically.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{Duration as ChronoDuration, Utc};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tempfile::TempDir;

use deletion_queue_helper::core::config::DeletionPolicyConfig;
use deletion_queue_helper::core::errors::{DqhError, Result};
use deletion_queue_helper::engine::confirm::ConfirmDecision;
use deletion_queue_helper::engine::deletion::{DeletionEngine, EngineDeps};
use deletion_queue_helper::engine::events::{EngineEvent, EventBus, HeadlessUi};
use deletion_queue_helper::engine::sched::Scheduler;
use deletion_queue_helper::logger::activity::ActivityLoggerHandle;
use deletion_queue_helper::platform::trash::TrashBin;
use deletion_queue_helper::probe::lock::LockProber;
use deletion_queue_helper::probe::window::WindowTitleProbe;
use deletion_queue_helper::store::entity::{EntityId, EntityPatch, EntityStatus, QueueEntity};
use deletion_queue_helper::store::memory::MemoryStore;
use deletion_queue_helper::store::EntityStore;

// ──────────────────── fakes ────────────────────

#[derive(Default)]
struct FakeLock {
    locked: AtomicBool,
}

impl LockProber for FakeLock {
    fn is_locked(&self, _path: &Path, _timeout: Duration) -> bool {
        self.locked.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct FakeWindows {
    titles: Mutex<Vec<String>>,
}

impl WindowTitleProbe for FakeWindows {
    fn openers(&self, _file_name: &str, _timeout: Duration) -> Vec<String> {
        self.titles.lock().clone()
    }
}

#[derive(Default)]
struct RecordingTrash {
    calls: Mutex<Vec<PathBuf>>,
    fail: AtomicBool,
}

impl TrashBin for RecordingTrash {
    fn move_to_trash(&self, path: &Path) -> Result<()> {
        self.calls.lock().push(path.to_path_buf());
        if self.fail.load(Ordering::SeqCst) {
            return Err(DqhError::Trash {
                path: path.to_path_buf(),
                details: "simulated failure".to_string(),
            });
        }
        let _ = fs::remove_file(path);
        Ok(())
    }
}

// ──────────────────── harness ────────────────────

struct Harness {
    dir: TempDir,
    store: Arc<MemoryStore>,
    lock: Arc<FakeLock>,
    windows: Arc<FakeWindows>,
    trash: Arc<RecordingTrash>,
    engine: Arc<DeletionEngine>,
    events: Receiver<EngineEvent>,
}

impl Harness {
    fn new(policy: DeletionPolicyConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let lock = Arc::new(FakeLock::default());
        let windows = Arc::new(FakeWindows::default());
        let trash = Arc::new(RecordingTrash::default());
        let bus = Arc::new(EventBus::new());
        let events = bus.subscribe();
        let (scheduler, fired) = Scheduler::spawn().unwrap();

        let engine = DeletionEngine::start(EngineDeps {
            store: Arc::clone(&store) as Arc<dyn EntityStore>,
            scheduler,
            fired,
            lock_probe: Arc::clone(&lock) as Arc<dyn LockProber>,
            window_probe: Arc::clone(&windows) as Arc<dyn WindowTitleProbe>,
            trash: Arc::clone(&trash) as Arc<dyn TrashBin>,
            bus,
            ui: Arc::new(HeadlessUi),
            activity: ActivityLoggerHandle::disabled(),
            policy,
        })
        .unwrap();

        Self {
            dir,
            store,
            lock,
            windows,
            trash,
            engine,
            events,
        }
    }

    /// Tracked entity whose deadline already passed, backed by a real file.
    fn overdue_entity(&self, id: EntityId, name: &str) -> QueueEntity {
        let path = self.dir.path().join(name);
        fs::write(&path, b"payload").unwrap();
        let mut entity = QueueEntity::detected(id, path, 7, id);
        entity.status = EntityStatus::Scheduled;
        entity.deadline = Some(Utc::now() - ChronoDuration::seconds(5));
        self.store.upsert(&entity).unwrap();
        entity
    }

    fn status_of(&self, id: EntityId) -> EntityStatus {
        self.store.get(id).unwrap().unwrap().status
    }

    fn trash_calls(&self) -> Vec<PathBuf> {
        self.trash.calls.lock().clone()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.engine.shutdown();
    }
}

fn fast_policy() -> DeletionPolicyConfig {
    DeletionPolicyConfig {
        confirm_timeout_secs: 0,
        lock_probe_timeout_secs: 1,
        window_probe_timeout_secs: 1,
        ..DeletionPolicyConfig::default()
    }
}

/// Force the stored deadline into the past so the next firing is eligible.
fn backdate(store: &MemoryStore, id: EntityId) {
    let patch = EntityPatch {
        deadline: Some(Some(Utc::now() - ChronoDuration::seconds(5))),
        ..EntityPatch::default()
    };
    store.patch(id, &patch).unwrap();
}

// ──────────────────── happy path ────────────────────

#[test]
fn quiet_file_is_trashed_on_deadline() {
    let h = Harness::new(fast_policy());
    let entity = h.overdue_entity(1, "build.iso");

    h.engine.fire_now(1);

    assert_eq!(h.trash_calls(), vec![entity.path.clone()]);
    let after = h.store.get(1).unwrap().unwrap();
    assert_eq!(after.status, EntityStatus::Deleted);
    assert_eq!(after.deadline, None);

    let deleted = h
        .events
        .try_iter()
        .find(|e| matches!(e, EngineEvent::Deleted { .. }));
    assert!(deleted.is_some(), "deleted event should reach subscribers");
}

#[test]
fn missing_file_finalizes_without_touching_trash() {
    let h = Harness::new(fast_policy());
    let entity = h.overdue_entity(1, "gone.zip");
    fs::remove_file(&entity.path).unwrap();

    h.engine.fire_now(1);

    assert!(h.trash_calls().is_empty());
    assert_eq!(h.status_of(1), EntityStatus::Deleted);
}

// ──────────────────── eligibility guards ────────────────────

#[test]
fn pending_entity_never_fires() {
    let h = Harness::new(fast_policy());
    let mut entity = h.overdue_entity(1, "kept.pdf");
    entity.status = EntityStatus::Pending;
    h.store.upsert(&entity).unwrap();

    h.engine.fire_now(1);

    assert!(h.trash_calls().is_empty());
    assert_eq!(h.status_of(1), EntityStatus::Pending);
}

#[test]
fn future_deadline_rearms_instead_of_firing() {
    let h = Harness::new(fast_policy());
    let mut entity = h.overdue_entity(1, "later.mkv");
    let deadline = Utc::now() + ChronoDuration::hours(1);
    entity.deadline = Some(deadline);
    h.store.upsert(&entity).unwrap();

    h.engine.fire_now(1);

    assert!(h.trash_calls().is_empty());
    assert_eq!(h.status_of(1), EntityStatus::Scheduled);
    assert_eq!(h.engine.scheduler().scheduled_at(1), Some(deadline));
}

#[test]
fn unknown_id_is_a_no_op() {
    let h = Harness::new(fast_policy());
    h.engine.fire_now(42);
    assert!(h.trash_calls().is_empty());
}

// ──────────────────── lock retries ────────────────────

#[test]
fn locked_file_snoozes_then_fails_after_max_retries() {
    let h = Harness::new(fast_policy());
    h.overdue_entity(1, "held.db");
    h.lock.locked.store(true, Ordering::SeqCst);

    for attempt in 1..=3u32 {
        h.engine.fire_now(1);
        let after = h.store.get(1).unwrap().unwrap();
        assert_eq!(after.status, EntityStatus::Snoozed, "attempt {attempt}");
        assert_eq!(after.retry_count, attempt);
        assert!(after.deadline.unwrap() > Utc::now());
        backdate(&h.store, 1);
    }

    // Fourth firing exhausts the budget.
    h.engine.fire_now(1);
    let after = h.store.get(1).unwrap().unwrap();
    assert_eq!(after.status, EntityStatus::Failed);
    assert_eq!(after.deadline, None);
    assert!(after.error.as_deref().unwrap_or("").contains("DQH-2003"));
    assert!(h.trash_calls().is_empty());

    let failed = h
        .events
        .try_iter()
        .find(|e| matches!(e, EngineEvent::Failed { .. }));
    assert!(failed.is_some());
}

#[test]
fn trash_failure_counts_as_a_retry() {
    let h = Harness::new(fast_policy());
    h.overdue_entity(1, "stubborn.bin");
    h.trash.fail.store(true, Ordering::SeqCst);

    h.engine.fire_now(1);

    let after = h.store.get(1).unwrap().unwrap();
    assert_eq!(after.status, EntityStatus::Snoozed);
    assert_eq!(after.retry_count, 1);
    assert_eq!(h.trash_calls().len(), 1);
}

// ──────────────────── confirmation ────────────────────

#[test]
fn open_window_times_out_to_delete() {
    let h = Harness::new(fast_policy());
    let entity = h.overdue_entity(1, "open.txt");
    *h.windows.titles.lock() = vec!["editor".to_string()];

    h.engine.fire_now(1);

    // Zero timeout means the default action runs immediately.
    assert_eq!(h.trash_calls(), vec![entity.path.clone()]);
    assert_eq!(h.status_of(1), EntityStatus::Deleted);

    let confirm = h
        .events
        .try_iter()
        .find(|e| matches!(e, EngineEvent::ConfirmDelete { .. }));
    assert!(confirm.is_some(), "confirmation request should be emitted");
}

#[test]
fn keep_answer_parks_the_entry() {
    let h = Harness::new(DeletionPolicyConfig {
        confirm_timeout_secs: 10,
        ..fast_policy()
    });
    h.overdue_entity(1, "keepme.mp4");
    *h.windows.titles.lock() = vec!["player".to_string()];

    let engine = Arc::clone(&h.engine);
    let firing = thread::spawn(move || engine.fire_now(1));

    let start = Instant::now();
    while !h.engine.broker().is_pending(1) {
        assert!(start.elapsed() < Duration::from_secs(5), "no confirmation");
        thread::sleep(Duration::from_millis(10));
    }
    assert!(h.engine.resolve_confirmation(1, ConfirmDecision::Keep));
    firing.join().unwrap();

    let after = h.store.get(1).unwrap().unwrap();
    assert_eq!(after.status, EntityStatus::Pending);
    assert_eq!(after.deadline, None);
    assert!(h.trash_calls().is_empty());
}

#[test]
fn delete_answer_is_ignored_when_the_entry_was_cancelled_meanwhile() {
    let h = Harness::new(DeletionPolicyConfig {
        confirm_timeout_secs: 10,
        ..fast_policy()
    });
    h.overdue_entity(1, "raced.doc");
    *h.windows.titles.lock() = vec!["office".to_string()];

    let engine = Arc::clone(&h.engine);
    let firing = thread::spawn(move || engine.fire_now(1));

    let start = Instant::now();
    while !h.engine.broker().is_pending(1) {
        assert!(start.elapsed() < Duration::from_secs(5), "no confirmation");
        thread::sleep(Duration::from_millis(10));
    }
    // Another process flips the row out of confirming before answering.
    h.store
        .patch(
            1,
            &EntityPatch::status(EntityStatus::Pending).with_deadline(None),
        )
        .unwrap();
    h.engine.resolve_confirmation(1, ConfirmDecision::Delete);
    firing.join().unwrap();

    assert!(h.trash_calls().is_empty());
    assert_eq!(h.status_of(1), EntityStatus::Pending);
}

// ──────────────────── manual operations ────────────────────

#[test]
fn cancel_is_idempotent() {
    let h = Harness::new(fast_policy());
    h.overdue_entity(1, "manual.tar");

    let first = h.engine.cancel(1).unwrap();
    assert_eq!(first.status, EntityStatus::Pending);
    assert_eq!(first.deadline, None);

    let second = h.engine.cancel(1).unwrap();
    assert_eq!(second.status, EntityStatus::Pending);
}

#[test]
fn snooze_extends_from_the_later_of_deadline_and_now() {
    let h = Harness::new(fast_policy());
    let mut entity = h.overdue_entity(1, "snoozed.log");
    let future = Utc::now() + ChronoDuration::minutes(30);
    entity.deadline = Some(future);
    h.store.upsert(&entity).unwrap();

    let updated = h.engine.snooze(1).unwrap();
    assert_eq!(updated.status, EntityStatus::Snoozed);
    assert_eq!(updated.retry_count, 1);
    let expected = future + ChronoDuration::minutes(10);
    let drift = (updated.deadline.unwrap() - expected).num_seconds().abs();
    assert!(drift <= 1, "deadline should extend the existing one");
}

#[test]
fn set_deadline_resets_retries_and_clear_parks() {
    let h = Harness::new(fast_policy());
    let mut entity = h.overdue_entity(1, "retimed.img");
    entity.retry_count = 2;
    h.store.upsert(&entity).unwrap();

    let at = Utc::now() + ChronoDuration::hours(2);
    let updated = h.engine.set_deadline(1, Some(at)).unwrap();
    assert_eq!(updated.status, EntityStatus::Scheduled);
    assert_eq!(updated.retry_count, 0);
    assert_eq!(h.engine.scheduler().scheduled_at(1), Some(at));

    let cleared = h.engine.set_deadline(1, None).unwrap();
    assert_eq!(cleared.status, EntityStatus::Pending);
    assert_eq!(cleared.deadline, None);
    assert_eq!(h.engine.scheduler().scheduled_at(1), None);
}

#[test]
fn remove_entry_drops_the_record_but_not_the_file() {
    let h = Harness::new(fast_policy());
    let entity = h.overdue_entity(1, "untouched.csv");

    h.engine.remove_entry(1).unwrap();

    assert!(h.store.get(1).unwrap().is_none());
    assert!(entity.path.exists());
    assert!(matches!(
        h.engine.remove_entry(1),
        Err(DqhError::EntityNotFound { id: 1 })
    ));
}

// ──────────────────── startup and resync ────────────────────

#[test]
fn reconcile_staggers_overdue_entities() {
    let h = Harness::new(DeletionPolicyConfig {
        startup_stagger_ms: 2_000,
        ..fast_policy()
    });
    // A held lock turns the immediate firing into a snooze, leaving the
    // files untouched.
    h.lock.locked.store(true, Ordering::SeqCst);
    h.overdue_entity(1, "old-a.iso");
    h.overdue_entity(2, "old-b.iso");
    h.overdue_entity(3, "old-c.iso");
    let mut future = h.overdue_entity(4, "fresh.iso");
    let fresh_deadline = Utc::now() + ChronoDuration::hours(3);
    future.deadline = Some(fresh_deadline);
    h.store.upsert(&future).unwrap();

    let before = Utc::now();
    let restored = h.engine.reconcile_on_startup().unwrap();
    assert_eq!(restored, 4);
    assert_eq!(h.engine.scheduler().scheduled_at(4), Some(fresh_deadline));

    // Exactly one overdue entry lands in the immediate slot and fires right
    // away; the other two stay armed in later slots.
    let wait = Instant::now() + Duration::from_secs(2);
    let mut immediate = None;
    while Instant::now() < wait {
        let snoozed: Vec<EntityId> = h
            .store
            .all()
            .unwrap()
            .iter()
            .filter(|e| e.status == EntityStatus::Snoozed)
            .map(|e| e.id)
            .collect();
        if snoozed.len() == 1 {
            immediate = Some(snoozed[0]);
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    let immediate = immediate.expect("one overdue entry fires in the immediate slot");

    let mut later: Vec<_> = [1u64, 2, 3]
        .iter()
        .filter(|id| **id != immediate)
        .map(|id| {
            h.engine
                .scheduler()
                .scheduled_at(*id)
                .expect("later slots stay armed")
        })
        .collect();
    later.sort();
    assert!(
        later[0] >= before + ChronoDuration::milliseconds(1_000),
        "second slot is a full stagger out"
    );
    assert!(
        later[1] - later[0] >= ChronoDuration::milliseconds(1_000),
        "slots are spread a stagger apart"
    );
}

#[test]
fn reconcile_fires_lone_overdue_entry_immediately() {
    let h = Harness::new(DeletionPolicyConfig {
        startup_stagger_ms: 60_000,
        ..fast_policy()
    });
    h.lock.locked.store(true, Ordering::SeqCst);
    h.overdue_entity(1, "backlog.iso");

    h.engine.reconcile_on_startup().unwrap();

    // The first overdue slot carries no stagger delay, so with the lock held
    // the entry snoozes almost at once; a staggered first slot would leave it
    // scheduled for a minute.
    let wait = Instant::now() + Duration::from_secs(5);
    while h.status_of(1) != EntityStatus::Snoozed && Instant::now() < wait {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(
        h.status_of(1),
        EntityStatus::Snoozed,
        "first overdue slot must fire immediately"
    );
    assert_eq!(h.store.get(1).unwrap().unwrap().retry_count, 1);
}

#[test]
fn resync_aligns_jobs_with_database_edits() {
    let h = Harness::new(fast_policy());
    let mut entity = h.overdue_entity(1, "edited.pkg");
    let deadline = Utc::now() + ChronoDuration::hours(1);
    entity.deadline = Some(deadline);
    h.store.upsert(&entity).unwrap();

    // New deadline appears only in the store.
    h.engine.resync_jobs().unwrap();
    assert_eq!(h.engine.scheduler().scheduled_at(1), Some(deadline));

    // Cancel through the store; resync must drop the orphaned job.
    h.store
        .patch(
            1,
            &EntityPatch::status(EntityStatus::Pending).with_deadline(None),
        )
        .unwrap();
    h.engine.resync_jobs().unwrap();
    assert_eq!(h.engine.scheduler().scheduled_at(1), None);
}

#[test]
fn shutdown_resolves_outstanding_confirmations_as_keep() {
    let h = Harness::new(DeletionPolicyConfig {
        confirm_timeout_secs: 10,
        ..fast_policy()
    });
    h.overdue_entity(1, "shutdown.avi");
    *h.windows.titles.lock() = vec!["player".to_string()];

    let engine = Arc::clone(&h.engine);
    let firing = thread::spawn(move || engine.fire_now(1));

    let start = Instant::now();
    while !h.engine.broker().is_pending(1) {
        assert!(start.elapsed() < Duration::from_secs(5), "no confirmation");
        thread::sleep(Duration::from_millis(10));
    }
    h.engine.shutdown();
    firing.join().unwrap();

    assert!(h.trash_calls().is_empty());
    assert_eq!(h.status_of(1), EntityStatus::Pending);
}
