//! Timer wheel: one thread multiplexing every armed timer in a component.
//!
//! Arming a key that is already armed replaces its deadline, so debounce
//! extension is a plain re-arm. Firing removes the key before the callback
//! runs; a callback never observes its own key as still armed.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;

use crate::core::errors::{DqhError, Result};
use crate::store::entity::EntityId;

/// Idle wait when nothing is armed. Any `Arm` command wakes the thread early.
const IDLE_WAIT: Duration = Duration::from_secs(3600);

const COMMAND_QUEUE_DEPTH: usize = 256;

// ──────────────────── keys ────────────────────

/// What a timer is for. Purposes never collide even when tokens match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerPurpose {
    /// Event-coalescing window for a newly appeared path.
    Debounce,
    /// Grace window after a disappearance, waiting for a rename to land.
    RenameWindow,
    /// A queue entity's deletion deadline.
    Deadline,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerToken {
    Path(PathBuf),
    Id(u64),
}

/// Identity of one armed timer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub purpose: TimerPurpose,
    pub token: TimerToken,
}

impl TimerKey {
    #[must_use]
    pub fn debounce(path: PathBuf) -> Self {
        Self {
            purpose: TimerPurpose::Debounce,
            token: TimerToken::Path(path),
        }
    }

    /// Keyed by file identity (inode), not path: the old path is gone.
    #[must_use]
    pub const fn rename_window(file_key: u64) -> Self {
        Self {
            purpose: TimerPurpose::RenameWindow,
            token: TimerToken::Id(file_key),
        }
    }

    #[must_use]
    pub const fn deadline(id: EntityId) -> Self {
        Self {
            purpose: TimerPurpose::Deadline,
            token: TimerToken::Id(id),
        }
    }
}

// ──────────────────── wheel ────────────────────

enum Cmd {
    Arm { key: TimerKey, after: Duration },
    Disarm { key: TimerKey },
    DisarmAll,
    Shutdown,
}

/// Handle to a timer thread. Cloneable; all clones drive the same thread.
#[derive(Clone)]
pub struct TimerWheel {
    tx: Sender<Cmd>,
    join: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TimerWheel {
    /// Spawn the timer thread. `on_fire` runs on that thread, so it should
    /// hand work off rather than block.
    pub fn spawn(
        name: &str,
        on_fire: Arc<dyn Fn(TimerKey) + Send + Sync>,
    ) -> Result<Self> {
        let (tx, rx) = bounded(COMMAND_QUEUE_DEPTH);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_wheel(&rx, on_fire.as_ref()))
            .map_err(|e| DqhError::Runtime {
                details: format!("failed to spawn timer thread {name}: {e}"),
            })?;
        Ok(Self {
            tx,
            join: Arc::new(Mutex::new(Some(handle))),
        })
    }

    /// Arm (or re-arm) a timer. Re-arming replaces the previous deadline.
    pub fn arm(&self, key: TimerKey, after: Duration) -> Result<()> {
        self.send(Cmd::Arm { key, after })
    }

    /// Disarm a timer if it is still armed. Disarming an unknown key is a no-op.
    pub fn disarm(&self, key: TimerKey) -> Result<()> {
        self.send(Cmd::Disarm { key })
    }

    pub fn disarm_all(&self) -> Result<()> {
        self.send(Cmd::DisarmAll)
    }

    /// Stop the thread and wait for it. Pending timers are discarded.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Cmd::Shutdown);
        if let Some(handle) = self.join.lock().take() {
            let _ = handle.join();
        }
    }

    fn send(&self, cmd: Cmd) -> Result<()> {
        self.tx.send(cmd).map_err(|_| DqhError::ChannelClosed {
            component: "timer-wheel",
        })
    }
}

fn run_wheel(rx: &Receiver<Cmd>, on_fire: &(dyn Fn(TimerKey) + Send + Sync)) {
    let mut armed: HashMap<TimerKey, Instant> = HashMap::new();

    loop {
        // Fire everything due before sleeping again.
        let now = Instant::now();
        let due: Vec<TimerKey> = armed
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in due {
            armed.remove(&key);
            on_fire(key);
        }

        let wait = armed
            .values()
            .min()
            .map_or(IDLE_WAIT, |at| at.saturating_duration_since(now));

        match rx.recv_timeout(wait) {
            Ok(Cmd::Arm { key, after }) => {
                armed.insert(key, Instant::now() + after);
            }
            Ok(Cmd::Disarm { key }) => {
                armed.remove(&key);
            }
            Ok(Cmd::DisarmAll) => armed.clear(),
            Ok(Cmd::Shutdown) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
}

// ──────────────────── tests ────────────────────
