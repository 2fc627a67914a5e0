//! Directory watcher: turns raw filesystem noise into queue entities.
//!
//! Raw events are debounced per path so a file being written in chunks
//! settles into a single tracked entity. Disappearances open a rename grace
//! window keyed by inode; a reappearance inside the window is folded into the
//! existing entity, anything else is treated as an external removal.

#![allow(missing_docs)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use crossbeam_channel::{Sender, unbounded};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use parking_lot::Mutex;

use crate::core::config::WatchConfig;
use crate::core::errors::{DqhError, Result};
use crate::core::paths::resolve_absolute_path;
use crate::engine::events::{EngineEvent, EventBus};
use crate::engine::timers::{TimerKey, TimerPurpose, TimerToken, TimerWheel};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::store::entity::{
    EntityId, EntityPatch, EntityStatus, QueueEntity, WhitelistAction, WhitelistRule, first_match,
};
use crate::store::{EntityStore, IdGenerator};

/// Files the lock prober creates while probing; never tracked.
const PROBE_SUFFIX: &str = ".dqh-probe";

// ──────────────────── seams ────────────────────

/// Scheduler-side hooks the watcher drives when entities appear or vanish.
pub trait WatcherHooks: Send + Sync {
    fn cancel_job(&self, id: EntityId);
    fn schedule_job(&self, id: EntityId, fire_at: DateTime<Utc>);
}

/// Everything the watcher needs, injected for testability.
#[derive(Clone)]
pub struct WatcherDeps {
    pub store: Arc<dyn EntityStore>,
    pub ids: Arc<IdGenerator>,
    pub hooks: Arc<dyn WatcherHooks>,
    pub bus: Arc<EventBus>,
    pub activity: ActivityLoggerHandle,
    pub watch: WatchConfig,
    pub whitelist: Vec<WhitelistRule>,
}

// ──────────────────── raw events ────────────────────

/// Normalized filesystem event, stripped of backend-specific shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFsEvent {
    Appeared(PathBuf),
    Changed(PathBuf),
    Removed(PathBuf),
}

/// Flatten a notify event into raw events.
///
/// Rename halves arrive as separate Name(From)/Name(To) events on inotify;
/// Name(Both) carries both paths in order. Backends that only report
/// Name(Any) get resolved by checking existence.
fn classify_event(event: &Event) -> Vec<RawFsEvent> {
    match event.kind {
        EventKind::Create(_) => event
            .paths
            .iter()
            .map(|p| RawFsEvent::Appeared(p.clone()))
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .map(|p| RawFsEvent::Removed(p.clone()))
            .collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::To => event
                .paths
                .iter()
                .map(|p| RawFsEvent::Appeared(p.clone()))
                .collect(),
            RenameMode::From => event
                .paths
                .iter()
                .map(|p| RawFsEvent::Removed(p.clone()))
                .collect(),
            RenameMode::Both => {
                let mut out = Vec::new();
                if let Some(from) = event.paths.first() {
                    out.push(RawFsEvent::Removed(from.clone()));
                }
                if let Some(to) = event.paths.get(1) {
                    out.push(RawFsEvent::Appeared(to.clone()));
                }
                out
            }
            RenameMode::Any | RenameMode::Other => event
                .paths
                .iter()
                .map(|p| {
                    if p.exists() {
                        RawFsEvent::Appeared(p.clone())
                    } else {
                        RawFsEvent::Removed(p.clone())
                    }
                })
                .collect(),
        },
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => event
            .paths
            .iter()
            .map(|p| RawFsEvent::Changed(p.clone()))
            .collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

fn file_key_of(metadata: &fs::Metadata) -> u64 {
    #[cfg(unix)]
    {
        std::os::unix::fs::MetadataExt::ino(metadata)
    }
    #[cfg(not(unix))]
    {
        let _ = metadata;
        0
    }
}

// ──────────────────── core state machine ────────────────────

/// Watcher state machine, independent of the notify backend so tests can
/// drive it with synthetic events.
pub struct WatchCore {
    deps: WatcherDeps,
    wheel: TimerWheel,
    /// Paths inside their debounce window, not yet tracked.
    debouncing: Mutex<HashSet<PathBuf>>,
    /// Inode of a vanished tracked file, waiting for a rename to land.
    rename_table: Mutex<HashMap<u64, EntityId>>,
}

impl WatchCore {
    #[must_use]
    pub fn new(deps: WatcherDeps, wheel: TimerWheel) -> Self {
        Self {
            deps,
            wheel,
            debouncing: Mutex::new(HashSet::new()),
            rename_table: Mutex::new(HashMap::new()),
        }
    }

    pub fn handle_raw(&self, raw: RawFsEvent) {
        match raw {
            RawFsEvent::Appeared(path) => self.on_appeared(path),
            RawFsEvent::Changed(path) => self.on_changed(path),
            RawFsEvent::Removed(path) => self.on_removed(&path),
        }
    }

    pub fn handle_timer(&self, key: TimerKey) {
        match (key.purpose, key.token) {
            (TimerPurpose::Debounce, TimerToken::Path(path)) => self.on_settled(&path),
            (TimerPurpose::RenameWindow, TimerToken::Id(file_key)) => {
                self.on_rename_window_elapsed(file_key);
            }
            _ => {}
        }
    }

    fn debounce(&self) -> Duration {
        Duration::from_millis(self.deps.watch.debounce_ms)
    }

    fn rename_window(&self) -> Duration {
        Duration::from_millis(self.deps.watch.rename_window_ms)
    }

    fn ignored(path: &Path) -> bool {
        path.file_name()
            .is_some_and(|n| n.to_string_lossy().ends_with(PROBE_SUFFIX))
    }

    fn on_appeared(&self, path: PathBuf) {
        if Self::ignored(&path) {
            return;
        }
        self.debouncing.lock().insert(path.clone());
        let _ = self.wheel.arm(TimerKey::debounce(path), self.debounce());
    }

    fn on_changed(&self, path: PathBuf) {
        if Self::ignored(&path) {
            return;
        }
        // Writes during the debounce window keep pushing the window out.
        if self.debouncing.lock().contains(&path) {
            let _ = self.wheel.arm(TimerKey::debounce(path), self.debounce());
            return;
        }
        let Some(entity) = self.live_entity_at(&path) else {
            return;
        };
        let Ok(metadata) = fs::symlink_metadata(&path) else {
            return;
        };
        if metadata.len() != entity.size_bytes
            && matches!(
                self.deps
                    .store
                    .patch(entity.id, &EntityPatch::size(metadata.len())),
                Ok(Some(_))
            )
        {
            self.deps.bus.emit(&EngineEvent::QueueRefresh);
        }
    }

    fn on_removed(&self, path: &Path) {
        // Gone before it ever settled: forget it entirely.
        if self.debouncing.lock().remove(path) {
            let _ = self.wheel.disarm(TimerKey::debounce(path.to_path_buf()));
            return;
        }
        let Some(entity) = self.live_entity_at(path) else {
            return;
        };
        self.rename_table.lock().insert(entity.file_key, entity.id);
        let _ = self
            .wheel
            .arm(TimerKey::rename_window(entity.file_key), self.rename_window());
    }

    /// Debounce elapsed: the path has settled, decide what it is.
    fn on_settled(&self, path: &Path) {
        self.debouncing.lock().remove(path);
        let Ok(metadata) = fs::symlink_metadata(path) else {
            return;
        };
        if !metadata.is_file() {
            return;
        }
        let file_key = file_key_of(&metadata);

        // Same inode as a recently vanished entity: this is its new name.
        if let Some(id) = self.rename_table.lock().remove(&file_key) {
            let _ = self.wheel.disarm(TimerKey::rename_window(file_key));
            self.reconcile_rename(id, path, metadata.len());
            return;
        }

        if self.live_entity_at(path).is_some() {
            return;
        }
        self.track_new(path, metadata.len(), file_key);
    }

    fn reconcile_rename(&self, id: EntityId, path: &Path, size_bytes: u64) {
        let from = match self.deps.store.get(id) {
            Ok(Some(old)) => old.path.display().to_string(),
            _ => return,
        };
        if let Ok(Some(updated)) = self
            .deps
            .store
            .patch(id, &EntityPatch::rename(path.to_path_buf(), size_bytes))
        {
            self.deps.activity.log(ActivityEvent::Renamed {
                entity_id: id,
                from,
                to: updated.path.display().to_string(),
            });
            self.deps.bus.emit(&EngineEvent::QueueRefresh);
        }
    }

    fn track_new(&self, path: &Path, size_bytes: u64, file_key: u64) {
        let id = self.deps.ids.next_id();
        let mut entity = QueueEntity::detected(id, path.to_path_buf(), size_bytes, file_key);

        match first_match(&self.deps.whitelist, &entity.file_name) {
            Some(rule) if rule.action == WhitelistAction::NeverDelete => {
                entity.status = EntityStatus::Whitelisted;
                if self.upsert(&entity) {
                    self.deps.activity.log(ActivityEvent::Whitelisted {
                        entity_id: id,
                        rule: format!("{:?}={}", rule.matcher, rule.value),
                    });
                    self.deps.bus.emit(&EngineEvent::QueueRefresh);
                }
            }
            Some(rule) => {
                let deadline = Utc::now() + ChronoDuration::minutes(rule.minutes as i64);
                entity.status = EntityStatus::Scheduled;
                entity.deadline = Some(deadline);
                if self.upsert(&entity) {
                    self.deps.hooks.schedule_job(id, deadline);
                    self.log_new_file(&entity);
                    self.deps.bus.emit(&EngineEvent::NewFile { entity });
                }
            }
            None => {
                if self.upsert(&entity) {
                    self.log_new_file(&entity);
                    self.deps.bus.emit(&EngineEvent::NewFile { entity });
                }
            }
        }
    }

    /// Rename window closed with no reappearance: the file is really gone.
    fn on_rename_window_elapsed(&self, file_key: u64) {
        let Some(id) = self.rename_table.lock().remove(&file_key) else {
            return;
        };
        self.deps.hooks.cancel_job(id);
        let Ok(Some(entity)) = self.deps.store.get(id) else {
            return;
        };
        if entity.status.is_terminal() {
            return;
        }
        if let Ok(Some(updated)) = self.deps.store.patch(
            id,
            &EntityPatch::status(EntityStatus::Deleted).with_deadline(None),
        ) {
            self.deps.activity.log(ActivityEvent::ExternallyRemoved {
                entity_id: id,
                path: updated.path.display().to_string(),
            });
            self.deps.bus.emit(&EngineEvent::Deleted { entity: updated });
        }
    }

    fn live_entity_at(&self, path: &Path) -> Option<QueueEntity> {
        self.deps
            .store
            .all()
            .ok()?
            .into_iter()
            .find(|e| !e.status.is_terminal() && e.path == path)
    }

    fn upsert(&self, entity: &QueueEntity) -> bool {
        match self.deps.store.upsert(entity) {
            Ok(()) => true,
            Err(e) => {
                self.deps.activity.log(ActivityEvent::EngineError {
                    entity_id: Some(entity.id),
                    code: e.code().to_string(),
                    message: e.to_string(),
                });
                false
            }
        }
    }

    fn log_new_file(&self, entity: &QueueEntity) {
        self.deps.activity.log(ActivityEvent::NewFile {
            entity_id: entity.id,
            path: entity.path.display().to_string(),
            size_bytes: entity.size_bytes,
        });
    }
}

// ──────────────────── session plumbing ────────────────────

enum Msg {
    Raw(RawFsEvent),
    Timer(TimerKey),
    Stop,
}

struct Session {
    tx: Sender<Msg>,
    wheel: TimerWheel,
    // Held for its Drop; dropping unsubscribes from the kernel.
    _fs_watcher: RecommendedWatcher,
    join: Option<JoinHandle<()>>,
}

/// The watcher: owns one session at a time over a watched directory.
pub struct Watcher {
    deps: WatcherDeps,
    session: Mutex<Option<Session>>,
}

impl Watcher {
    #[must_use]
    pub fn new(deps: WatcherDeps) -> Self {
        Self {
            deps,
            session: Mutex::new(None),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.deps.watch.directory
    }

    /// Start watching. Restarts cleanly if already running.
    pub fn start(&self) -> Result<()> {
        self.stop();

        let directory = resolve_absolute_path(&self.deps.watch.directory);
        if !directory.is_dir() {
            return Err(DqhError::Watch {
                path: directory,
                details: "watched directory does not exist".to_string(),
            });
        }

        let (tx, rx) = unbounded();

        let wheel_tx = tx.clone();
        let wheel = TimerWheel::spawn(
            "dqh-watch-timers",
            Arc::new(move |key| {
                let _ = wheel_tx.send(Msg::Timer(key));
            }),
        )?;

        let notify_tx = tx.clone();
        let mut fs_watcher =
            notify::recommended_watcher(move |res: notify::Result<Event>| {
                if let Ok(event) = res {
                    for raw in classify_event(&event) {
                        let _ = notify_tx.send(Msg::Raw(raw));
                    }
                }
            })?;
        fs_watcher.watch(&directory, RecursiveMode::NonRecursive)?;

        let core = Arc::new(WatchCore::new(self.deps.clone(), wheel.clone()));
        let join = std::thread::Builder::new()
            .name("dqh-watch-loop".to_string())
            .spawn(move || {
                while let Ok(msg) = rx.recv() {
                    match msg {
                        Msg::Raw(raw) => core.handle_raw(raw),
                        Msg::Timer(key) => core.handle_timer(key),
                        Msg::Stop => break,
                    }
                }
            })
            .map_err(|e| DqhError::Runtime {
                details: format!("failed to spawn watch loop: {e}"),
            })?;

        *self.session.lock() = Some(Session {
            tx,
            wheel,
            _fs_watcher: fs_watcher,
            join: Some(join),
        });
        Ok(())
    }

    /// Stop watching. Idempotent; pending debounce windows are discarded.
    pub fn stop(&self) {
        let Some(mut session) = self.session.lock().take() else {
            return;
        };
        let _ = session.tx.send(Msg::Stop);
        session.wheel.shutdown();
        if let Some(join) = session.join.take() {
            let _ = join.join();
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.session.lock().is_some()
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.stop();
    }
}

// ──────────────────── tests ────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events::EventBus;
    use crate::store::memory::MemoryStore;
    use std::fs::File;
    use std::io::Write as _;

    #[derive(Default)]
    struct RecordingHooks {
        scheduled: Mutex<Vec<(EntityId, DateTime<Utc>)>>,
        cancelled: Mutex<Vec<EntityId>>,
    }

    impl WatcherHooks for RecordingHooks {
        fn cancel_job(&self, id: EntityId) {
            self.cancelled.lock().push(id);
        }
        fn schedule_job(&self, id: EntityId, fire_at: DateTime<Utc>) {
            self.scheduled.lock().push((id, fire_at));
        }
    }

    struct Fixture {
        core: WatchCore,
        store: Arc<MemoryStore>,
        hooks: Arc<RecordingHooks>,
        bus: Arc<EventBus>,
        dir: tempfile::TempDir,
    }

    fn fixture(whitelist: Vec<WhitelistRule>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let hooks = Arc::new(RecordingHooks::default());
        let bus = Arc::new(EventBus::new());
        let watch = WatchConfig {
            directory: dir.path().to_path_buf(),
            debounce_ms: 20,
            rename_window_ms: 100,
            notify_on_new_file: true,
        };
        let deps = WatcherDeps {
            store: store.clone() as Arc<dyn EntityStore>,
            ids: Arc::new(IdGenerator::starting_at(1)),
            hooks: hooks.clone() as Arc<dyn WatcherHooks>,
            bus: bus.clone(),
            activity: ActivityLoggerHandle::disabled(),
            watch,
            whitelist,
        };
        let wheel = TimerWheel::spawn("test-watch-timers", Arc::new(|_| {})).unwrap();
        Fixture {
            core: WatchCore::new(deps, wheel),
            store,
            hooks,
            bus,
            dir,
        }
    }

    fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    fn auto_delete_rule(ext: &str, minutes: u64) -> WhitelistRule {
        WhitelistRule {
            matcher: crate::store::entity::WhitelistMatch::Extension,
            value: ext.to_string(),
            action: WhitelistAction::AutoDeleteAfter,
            minutes,
            enabled: true,
        }
    }

    fn never_delete_rule(ext: &str) -> WhitelistRule {
        WhitelistRule {
            matcher: crate::store::entity::WhitelistMatch::Extension,
            value: ext.to_string(),
            action: WhitelistAction::NeverDelete,
            minutes: 0,
            enabled: true,
        }
    }

    #[test]
    fn settled_file_becomes_pending_entity() {
        let fx = fixture(Vec::new());
        let rx = fx.bus.subscribe();
        let path = write_file(fx.dir.path(), "download.iso", b"payload");

        fx.core.on_settled(&path);

        let all = fx.store.all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, EntityStatus::Pending);
        assert_eq!(all[0].size_bytes, 7);
        assert_eq!(all[0].deadline, None);
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            EngineEvent::NewFile { .. }
        ));
    }

    #[test]
    fn settling_twice_tracks_once() {
        let fx = fixture(Vec::new());
        let path = write_file(fx.dir.path(), "download.iso", b"x");
        fx.core.on_settled(&path);
        fx.core.on_settled(&path);
        assert_eq!(fx.store.all().unwrap().len(), 1);
    }

    #[test]
    fn vanished_before_settling_is_never_tracked() {
        let fx = fixture(Vec::new());
        let path = write_file(fx.dir.path(), "temp.part", b"x");
        fx.core.on_appeared(path.clone());
        fs::remove_file(&path).unwrap();
        fx.core.on_removed(&path);
        fx.core.on_settled(&path);
        assert!(fx.store.all().unwrap().is_empty());
    }

    #[test]
    fn auto_delete_rule_schedules_deadline() {
        let fx = fixture(vec![auto_delete_rule("iso", 30)]);
        let path = write_file(fx.dir.path(), "image.iso", b"x");

        fx.core.on_settled(&path);

        let entity = &fx.store.all().unwrap()[0];
        assert_eq!(entity.status, EntityStatus::Scheduled);
        let deadline = entity.deadline.expect("deadline set");
        let expect = Utc::now() + ChronoDuration::minutes(30);
        assert!((deadline - expect).num_seconds().abs() < 5);

        let scheduled = fx.hooks.scheduled.lock();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].0, entity.id);
    }

    #[test]
    fn never_delete_rule_whitelists_without_job() {
        let fx = fixture(vec![never_delete_rule("pdf")]);
        let path = write_file(fx.dir.path(), "report.pdf", b"x");

        fx.core.on_settled(&path);

        let entity = &fx.store.all().unwrap()[0];
        assert_eq!(entity.status, EntityStatus::Whitelisted);
        assert_eq!(entity.deadline, None);
        assert!(fx.hooks.scheduled.lock().is_empty());
    }

    #[test]
    fn rename_inside_window_preserves_entity() {
        let fx = fixture(Vec::new());
        let old_path = write_file(fx.dir.path(), "old-name.bin", b"abc");
        fx.core.on_settled(&old_path);
        let entity = fx.store.all().unwrap().remove(0);
        fx.store
            .patch(
                entity.id,
                &EntityPatch::status(EntityStatus::Scheduled).with_deadline(Some(Utc::now())),
            )
            .unwrap();

        let new_path = fx.dir.path().join("new-name.bin");
        fs::rename(&old_path, &new_path).unwrap();
        fx.core.on_removed(&old_path);
        fx.core.on_settled(&new_path);

        let all = fx.store.all().unwrap();
        assert_eq!(all.len(), 1, "rename must not create a second entity");
        assert_eq!(all[0].id, entity.id);
        assert_eq!(all[0].path, new_path);
        assert_eq!(all[0].file_name, "new-name.bin");
        // Deadline and status ride along.
        assert_eq!(all[0].status, EntityStatus::Scheduled);
        assert!(all[0].deadline.is_some());
        assert!(fx.hooks.cancelled.lock().is_empty());
    }

    #[test]
    fn removal_without_reappearance_finalizes_entity() {
        let fx = fixture(Vec::new());
        let path = write_file(fx.dir.path(), "gone.bin", b"abc");
        fx.core.on_settled(&path);
        let entity = fx.store.all().unwrap().remove(0);

        fs::remove_file(&path).unwrap();
        fx.core.on_removed(&path);
        fx.core.on_rename_window_elapsed(entity.file_key);

        let after = fx.store.get(entity.id).unwrap().unwrap();
        assert_eq!(after.status, EntityStatus::Deleted);
        assert_eq!(after.deadline, None);
        assert_eq!(fx.hooks.cancelled.lock().as_slice(), &[entity.id]);
    }

    #[test]
    fn rename_window_elapsing_twice_is_harmless() {
        let fx = fixture(Vec::new());
        let path = write_file(fx.dir.path(), "gone.bin", b"abc");
        fx.core.on_settled(&path);
        let entity = fx.store.all().unwrap().remove(0);
        fx.core.on_removed(&path);

        fx.core.on_rename_window_elapsed(entity.file_key);
        fx.core.on_rename_window_elapsed(entity.file_key);
        assert_eq!(fx.hooks.cancelled.lock().len(), 1);
    }

    #[test]
    fn content_change_refreshes_size() {
        let fx = fixture(Vec::new());
        let path = write_file(fx.dir.path(), "grow.bin", b"aa");
        fx.core.on_settled(&path);

        fs::write(&path, b"aaaa").unwrap();
        fx.core.on_changed(path.clone());

        assert_eq!(fx.store.all().unwrap()[0].size_bytes, 4);
    }

    #[test]
    fn probe_artifacts_are_ignored() {
        let fx = fixture(Vec::new());
        let path = write_file(fx.dir.path(), ".x.bin.dqh-probe", b"x");
        fx.core.on_appeared(path.clone());
        fx.core.on_settled(&path);
        assert!(fx.store.all().unwrap().is_empty());
    }

    #[test]
    fn directories_are_not_tracked() {
        let fx = fixture(Vec::new());
        let sub = fx.dir.path().join("subdir");
        fs::create_dir(&sub).unwrap();
        fx.core.on_settled(&sub);
        assert!(fx.store.all().unwrap().is_empty());
    }

    #[test]
    fn classify_create_and_remove() {
        let path = PathBuf::from("/dl/a");
        let create = Event::new(EventKind::Create(notify::event::CreateKind::File))
            .add_path(path.clone());
        assert_eq!(classify_event(&create), vec![RawFsEvent::Appeared(path.clone())]);

        let remove = Event::new(EventKind::Remove(notify::event::RemoveKind::File))
            .add_path(path.clone());
        assert_eq!(classify_event(&remove), vec![RawFsEvent::Removed(path)]);
    }

    #[test]
    fn classify_rename_both_orders_halves() {
        let from = PathBuf::from("/dl/a");
        let to = PathBuf::from("/dl/b");
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(from.clone())
            .add_path(to.clone());
        assert_eq!(
            classify_event(&event),
            vec![RawFsEvent::Removed(from), RawFsEvent::Appeared(to)]
        );
    }

    #[test]
    fn classify_ignores_access_and_metadata() {
        let path = PathBuf::from("/dl/a");
        let access = Event::new(EventKind::Access(notify::event::AccessKind::Read))
            .add_path(path.clone());
        assert!(classify_event(&access).is_empty());

        let meta = Event::new(EventKind::Modify(ModifyKind::Metadata(
            notify::event::MetadataKind::Permissions,
        )))
        .add_path(path);
        assert!(classify_event(&meta).is_empty());
    }

    #[test]
    fn watcher_requires_existing_directory() {
        let fx = fixture(Vec::new());
        let mut deps = fx.core.deps.clone();
        deps.watch.directory = PathBuf::from("/nonexistent/dqh-watch-dir");
        let watcher = Watcher::new(deps);
        let err = watcher.start().unwrap_err();
        assert_eq!(err.code(), "DQH-2001");
        assert!(!watcher.is_running());
    }

    #[test]
    fn end_to_end_detection_through_notify() {
        let fx = fixture(Vec::new());
        let rx = fx.bus.subscribe();
        let watcher = Watcher::new(fx.core.deps.clone());
        watcher.start().unwrap();

        write_file(fx.dir.path(), "real.iso", b"payload");

        // Debounce is 20ms; give the backend generous time to deliver.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let mut seen_new_file = false;
        while std::time::Instant::now() < deadline {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(EngineEvent::NewFile { entity }) => {
                    assert_eq!(entity.file_name, "real.iso");
                    seen_new_file = true;
                    break;
                }
                Ok(_) => {}
                Err(_) => {}
            }
        }
        watcher.stop();
        assert!(seen_new_file, "expected a NewFile event");
        assert_eq!(fx.store.all().unwrap().len(), 1);
    }
}
