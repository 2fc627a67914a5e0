//! Activity log: append-only JSONL written off the hot path.
//!
//! Callers hand events to a cheap cloneable handle; a dedicated worker thread
//! does the serialization and IO. The handle never blocks: when the queue is
//! full the event is counted as dropped instead.

#![allow(missing_docs)]

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use serde::Serialize;

use crate::core::errors::{DqhError, Result};
use crate::store::entity::EntityId;

const QUEUE_DEPTH: usize = 1024;

// ──────────────────── events ────────────────────

/// One structured activity record.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityEvent {
    // Watcher
    NewFile {
        entity_id: EntityId,
        path: String,
        size_bytes: u64,
    },
    Whitelisted {
        entity_id: EntityId,
        rule: String,
    },
    Renamed {
        entity_id: EntityId,
        from: String,
        to: String,
    },
    ExternallyRemoved {
        entity_id: EntityId,
        path: String,
    },

    // Deletion engine
    Deleted {
        entity_id: EntityId,
        path: String,
        reason: String,
    },
    Snoozed {
        entity_id: EntityId,
        until: DateTime<Utc>,
        attempt: u32,
    },
    ConfirmRequested {
        entity_id: EntityId,
        openers: String,
    },
    ConfirmResolved {
        entity_id: EntityId,
        kept: bool,
    },
    Cancelled {
        entity_id: EntityId,
    },
    DeadlineSet {
        entity_id: EntityId,
        deadline: Option<DateTime<Utc>>,
    },
    Removed {
        entity_id: EntityId,
    },
    Reconciled {
        restored: usize,
        overdue: usize,
    },
    EngineError {
        entity_id: Option<EntityId>,
        code: String,
        message: String,
    },

    // Daemon lifecycle
    DaemonStarted {
        directory: String,
    },
    DaemonStopped,
    ConfigReloaded,
}

#[derive(Serialize)]
struct ActivityRecord<'a> {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    event: &'a ActivityEvent,
}

// ──────────────────── handle ────────────────────

enum Msg {
    Event(ActivityEvent),
    Flush,
    Shutdown,
}

/// Cheap cloneable logging handle. `log` never blocks.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Option<Sender<Msg>>,
    dropped: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Handle that discards everything; used by tests and one-shot commands.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            tx: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn log(&self, event: ActivityEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(Msg::Event(event)) {
            Ok(()) => {}
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Events lost to a full or closed queue since startup.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ──────────────────── worker ────────────────────

/// Owner of the worker thread. Dropping without `shutdown` detaches the
/// worker; it exits when the last handle goes away.
pub struct ActivityLogger {
    handle: ActivityLoggerHandle,
    join: Mutex<Option<JoinHandle<()>>>,
    path: PathBuf,
}

impl ActivityLogger {
    /// Open the log for appending and start the worker thread.
    pub fn spawn(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| DqhError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| DqhError::io(path, source))?;

        let (tx, rx) = bounded(QUEUE_DEPTH);
        let join = std::thread::Builder::new()
            .name("dqh-activity-log".to_string())
            .spawn(move || run_worker(&rx, file))
            .map_err(|e| DqhError::Runtime {
                details: format!("failed to spawn activity logger: {e}"),
            })?;

        Ok(Self {
            handle: ActivityLoggerHandle {
                tx: Some(tx),
                dropped: Arc::new(AtomicU64::new(0)),
            },
            join: Mutex::new(Some(join)),
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn handle(&self) -> ActivityLoggerHandle {
        self.handle.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ask the worker to flush buffered lines to disk.
    pub fn flush(&self) {
        if let Some(tx) = &self.handle.tx {
            let _ = tx.send(Msg::Flush);
        }
    }

    /// Drain the queue and stop the worker.
    pub fn shutdown(&self) {
        if let Some(tx) = &self.handle.tx {
            let _ = tx.send(Msg::Shutdown);
        }
        if let Some(join) = self.join.lock().take() {
            let _ = join.join();
        }
    }
}

fn run_worker(rx: &Receiver<Msg>, file: File) {
    let mut writer = BufWriter::new(file);
    while let Ok(msg) = rx.recv() {
        match msg {
            Msg::Event(event) => {
                let record = ActivityRecord {
                    timestamp: Utc::now(),
                    event: &event,
                };
                match serde_json::to_string(&record) {
                    Ok(line) => {
                        // A failed write is not worth crashing the daemon.
                        let _ = writeln!(writer, "{line}");
                    }
                    Err(e) => {
                        eprintln!("activity log serialization failed: {e}");
                    }
                }
            }
            Msg::Flush => {
                let _ = writer.flush();
            }
            Msg::Shutdown => break,
        }
    }
    let _ = writer.flush();
}

// ──────────────────── tests ────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_land_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.jsonl");
        let logger = ActivityLogger::spawn(&path).unwrap();
        let handle = logger.handle();

        handle.log(ActivityEvent::NewFile {
            entity_id: 1,
            path: "/dl/a.iso".to_string(),
            size_bytes: 42,
        });
        handle.log(ActivityEvent::DaemonStopped);
        logger.shutdown();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "new_file");
        assert_eq!(first["entity_id"], 1);
        assert!(first["timestamp"].is_string());

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["type"], "daemon_stopped");
    }

    #[test]
    fn spawn_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deep/activity.jsonl");
        let logger = ActivityLogger::spawn(&path).unwrap();
        logger.shutdown();
        assert!(path.exists());
    }

    #[test]
    fn appends_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.jsonl");
        for _ in 0..2 {
            let logger = ActivityLogger::spawn(&path).unwrap();
            logger.handle().log(ActivityEvent::DaemonStopped);
            logger.shutdown();
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
    }

    #[test]
    fn disabled_handle_counts_nothing() {
        let handle = ActivityLoggerHandle::disabled();
        handle.log(ActivityEvent::DaemonStopped);
        assert_eq!(handle.dropped_events(), 0);
    }

    #[test]
    fn closed_queue_counts_drops() {
        let dir = tempfile::tempdir().unwrap();
        let logger = ActivityLogger::spawn(&dir.path().join("a.jsonl")).unwrap();
        let handle = logger.handle();
        logger.shutdown();

        handle.log(ActivityEvent::DaemonStopped);
        assert_eq!(handle.dropped_events(), 1);
    }
}
